//! Chunked transfer-coding decoder shared by the server and the test client.

use super::request::RequestError;
use crate::security::SizeValidator;

/// Attempts to decode a complete chunked body from the start of `buf`.
///
/// Returns `Ok(None)` when more data is needed, or the decoded body and the
/// number of bytes consumed (chunks, last-chunk and trailer section).
pub fn decode_chunked(
    buf: &[u8],
    validator: &SizeValidator,
) -> Result<Option<(Vec<u8>, usize)>, RequestError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let (consumed, size) = match httparse::parse_chunk_size(&buf[pos..]) {
            Ok(httparse::Status::Complete(parsed)) => parsed,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(_) => return Err(RequestError::Malformed("invalid chunk size".to_string())),
        };
        pos += consumed;

        if size == 0 {
            return match skip_trailers(&buf[pos..]) {
                Some(len) => Ok(Some((body, pos + len))),
                None => Ok(None),
            };
        }

        let size = usize::try_from(size)
            .map_err(|_| RequestError::Malformed("chunk size overflow".to_string()))?;
        validator
            .validate_size(body.len().saturating_add(size))
            .map_err(RequestError::BodyTooLarge)?;
        if buf.len() < pos + size + 2 {
            return Ok(None);
        }
        body.extend_from_slice(&buf[pos..pos + size]);
        pos += size;
        if &buf[pos..pos + 2] != b"\r\n" {
            return Err(RequestError::Malformed("missing chunk terminator".to_string()));
        }
        pos += 2;
    }
}

/// Skips trailer fields up to and including the empty line.
fn skip_trailers(buf: &[u8]) -> Option<usize> {
    let mut pos = 0;
    loop {
        let line_end = buf[pos..].windows(2).position(|w| w == b"\r\n")?;
        pos += line_end + 2;
        if line_end == 0 {
            return Some(pos);
        }
    }
}

/// Frames `data` as a single chunk.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// The last-chunk marker with an empty trailer section.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";
