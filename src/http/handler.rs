use super::request::EchoRequest;
use super::response::{ResponseWriter, write_error};
use crate::Result;
use crate::body::{self, EchoBody};
use crate::control::{ControlDirectives, HeadOutcome};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};

/// Writes the JSON echo of `request`, shaped by its control headers
///
/// Only the response head is decided here; the caller finishes the
/// response on its transport.
pub async fn serve_echo(request: &EchoRequest, writer: &mut dyn ResponseWriter) -> Result<()> {
    let echo = EchoBody::from_request(request);
    let directives = ControlDirectives::from_headers(request.headers());

    writer
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    if directives.apply_head(writer) == HeadOutcome::NoContent {
        return Ok(());
    }

    let mut encoded = body::encode(&echo).to_vec();
    encoded.push(b'\n');

    if directives.chunked {
        if writer.flusher().is_none() {
            write_error(writer, "Cannot send chunked response", StatusCode::INTERNAL_SERVER_ERROR).await?;
            return Ok(());
        }
        writer.write(&encoded).await?;
        if let Some(flusher) = writer.flusher() {
            flusher.flush().await?;
        }
    } else {
        writer.write(&encoded).await?;
    }

    Ok(())
}
