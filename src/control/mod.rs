//! Response control protocol
//!
//! Callers shape the echo response with three request headers:
//!
//! - `Expect-Headers`: a JSON object of string pairs set as response headers
//! - `Expect-Status`: the decimal status code to respond with
//! - `Expect-Chunked`: any non-empty value requests an explicitly flushed,
//!   chunked response
//!
//! They are applied in that order. A 204 status ends the response before
//! any body is written, whatever else was requested. Malformed values are
//! logged and ignored.

use crate::http::ResponseWriter;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use std::collections::BTreeMap;
use tracing::warn;


/// Specifies the status code to send in the response
pub const HEADER_EXPECT_STATUS: &str = "Expect-Status";

/// Specifies a string:string map of headers to send in the response
pub const HEADER_EXPECT_HEADERS: &str = "Expect-Headers";

/// Specifies that the response be sent using chunked encoding
pub const HEADER_EXPECT_CHUNKED: &str = "Expect-Chunked";

/// Response-shaping instructions parsed from one request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlDirectives {
    /// Headers to inject, sorted by name
    pub headers: Option<Vec<(HeaderName, HeaderValue)>>,
    /// Status to respond with
    pub status: Option<StatusCode>,
    /// Whether the body must be flushed explicitly
    pub chunked: bool,
}

/// What the caller should do after [`ControlDirectives::apply_head`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadOutcome {
    /// Proceed to write the body
    Continue,
    /// A 204 status was written; the response must end without a body
    NoContent,
}

impl ControlDirectives {
    /// Parses the control headers of a request
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            headers: directive(headers, HEADER_EXPECT_HEADERS).and_then(parse_expect_headers),
            status: directive(headers, HEADER_EXPECT_STATUS).and_then(parse_expect_status),
            chunked: directive(headers, HEADER_EXPECT_CHUNKED).is_some(),
        }
    }

    /// Applies header injection and the status override, in that order
    pub fn apply_head(&self, writer: &mut dyn ResponseWriter) -> HeadOutcome {
        if let Some(injected) = &self.headers {
            let response_headers = writer.headers_mut();
            for (name, value) in injected {
                response_headers.insert(name.clone(), value.clone());
            }
        }

        if let Some(status) = self.status {
            writer.write_header(status);
            if status == StatusCode::NO_CONTENT {
                return HeadOutcome::NoContent;
            }
        }

        HeadOutcome::Continue
    }
}

/// First value of a control header; empty counts as absent
fn directive<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let value = headers.get(name)?;
    match value.to_str() {
        Ok("") => None,
        Ok(value) => Some(value),
        Err(e) => {
            warn!(header = name, error = %e, "Ignoring non-text control header");
            None
        }
    }
}

fn parse_expect_headers(raw: &str) -> Option<Vec<(HeaderName, HeaderValue)>> {
    let pairs: BTreeMap<String, String> = match serde_json::from_str(raw) {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!(error = %e, "Error parsing {}", HEADER_EXPECT_HEADERS);
            return None;
        }
    };

    let headers = pairs
        .into_iter()
        .filter_map(|(name, value)| {
            let parsed = HeaderName::from_bytes(name.as_bytes())
                .ok()
                .zip(HeaderValue::from_str(&value).ok());
            if parsed.is_none() {
                warn!(header = %name, "Skipping invalid {} entry", HEADER_EXPECT_HEADERS);
            }
            parsed
        })
        .collect();
    Some(headers)
}

fn parse_expect_status(raw: &str) -> Option<StatusCode> {
    let parsed = raw
        .trim()
        .parse::<u16>()
        .map_err(|e| e.to_string())
        .and_then(|code| StatusCode::from_u16(code).map_err(|e| e.to_string()));
    match parsed {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(value = raw, error = %e, "Error parsing {}", HEADER_EXPECT_STATUS);
            None
        }
    }
}
