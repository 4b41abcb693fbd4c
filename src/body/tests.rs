use super::*;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn sample() -> EchoBody {
    EchoBody::new(
        "POST",
        "/submit",
        "/submit?x=1",
        "example.test:8080",
        "POST /submit?x=1 HTTP/1.1\r\nHost: example.test:8080\r\n\r\n",
    )
}

#[test]
fn test_encode_uses_stable_field_names() {
    let encoded = encode(&sample());
    let value: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
    let object = value.as_object().unwrap();

    assert_eq!(object.len(), 5);
    assert_eq!(object["method"], "POST");
    assert_eq!(object["path"], "/submit");
    assert_eq!(object["url"], "/submit?x=1");
    assert_eq!(object["host"], "example.test:8080");
    assert!(object["request"].as_str().unwrap().starts_with("POST /submit?x=1 HTTP/1.1\r\n"));
}

#[test]
fn test_decode_round_trip() {
    let body = sample();
    assert_eq!(decode(&encode(&body)).unwrap(), body);
}

#[test]
fn test_decode_tolerates_missing_fields() {
    let body = decode(br#"{"method":"GET"}"#).unwrap();
    assert_eq!(body.method(), "GET");
    assert_eq!(body.path(), "");
    assert_eq!(body.request(), "");
}

#[test]
fn test_decode_rejects_invalid_json() {
    assert!(matches!(decode(b"{not json"), Err(DecodeError::Json(_))));
}

#[test]
fn test_decode_rejects_non_object() {
    assert!(decode(b"[1, 2, 3]").is_err());
    assert!(decode(b"\"GET\"").is_err());
}

#[test]
fn test_decode_reader_accepts_trailing_newline() {
    let mut data = encode(&sample()).to_vec();
    data.push(b'\n');
    let body = decode_reader(Cursor::new(data)).unwrap();
    assert_eq!(body, sample());
}

#[test]
fn test_decode_reader_empty_stream() {
    assert!(matches!(
        decode_reader(Cursor::new(Vec::new())),
        Err(DecodeError::Io(_))
    ));
}

/// Reader that records when it is dropped
struct TrackedReader {
    inner: Cursor<Vec<u8>>,
    dropped: Arc<AtomicBool>,
}

impl Read for TrackedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        std::io::Read::read(&mut self.inner, buf)
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_decode_and_close_releases_stream_on_success() {
    let dropped = Arc::new(AtomicBool::new(false));
    let reader = TrackedReader {
        inner: Cursor::new(encode(&sample()).to_vec()),
        dropped: dropped.clone(),
    };

    let body = decode_and_close(reader).unwrap();
    assert_eq!(body.method(), "POST");
    assert!(dropped.load(Ordering::SeqCst));
}

#[test]
fn test_decode_and_close_releases_stream_on_failure() {
    let dropped = Arc::new(AtomicBool::new(false));
    let reader = TrackedReader {
        inner: Cursor::new(b"garbage".to_vec()),
        dropped: dropped.clone(),
    };

    assert!(decode_and_close(reader).is_err());
    assert!(dropped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_decode_and_close_async() {
    let data = encode(&sample()).to_vec();
    let body = decode_and_close_async(&data[..]).await.unwrap();
    assert_eq!(body, sample());

    assert!(decode_and_close_async(&b"{"[..]).await.is_err());
}
