//! Buffering of streamed request bodies
//!
//! The request body is a one-shot stream: [`RequestBodyReader`] takes it by
//! value, drains it frame by frame and hands back a [`BufferedBody`]. Once
//! read, the stream is gone, so the buffered copy is what gets forwarded to
//! the origin.

use crate::error::{GatewayError, Result};
use crate::models::BufferedBody;
use bytes::{Buf, Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Body;
use tracing::{debug, warn};

const REPLACEMENT: char = '\u{FFFD}';
const BOM: char = '\u{FEFF}';

/// Incremental UTF-8 decoder
///
/// Carries an incomplete multi-byte sequence from one chunk to the next, so a
/// character split across chunk boundaries decodes exactly as if the input
/// had arrived in one piece. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, keeping any trailing partial character
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.extend_from_slice(chunk);

        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to marks a prefix that is valid UTF-8
                    if let Ok(valid) = std::str::from_utf8(valid) {
                        out.push_str(valid);
                    }
                    match e.error_len() {
                        Some(len) => {
                            out.push(REPLACEMENT);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the input
                            self.pending.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Signal end of input
    ///
    /// A character still incomplete at this point can never be finished and
    /// decodes to a single U+FFFD.
    pub fn flush(&mut self) -> String {
        if self.pending.is_empty() {
            String::new()
        } else {
            self.pending.clear();
            REPLACEMENT.to_string()
        }
    }

    /// Whether a partial character is buffered
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Drains request bodies into memory
#[derive(Debug, Clone, Copy)]
pub struct RequestBodyReader {
    max_bytes: usize,
}

impl RequestBodyReader {
    /// Create a reader that decodes at most `max_bytes` of a body
    pub fn new(max_bytes: usize) -> Self {
        RequestBodyReader { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Read the whole body, keeping both the raw bytes and the decoded text
    ///
    /// A body larger than the limit is still drained completely so it can be
    /// forwarded, but it is not decoded: `text` stays empty and
    /// `over_limit` is set.
    ///
    /// # Errors
    /// [`GatewayError::StreamReadError`] if the stream fails mid-read
    pub async fn read_to_end<B>(&self, body: B) -> Result<BufferedBody>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let mut decoder = Utf8StreamDecoder::new();
        let mut text = String::new();
        let mut over_limit = false;
        let max_bytes = self.max_bytes;

        let bytes = drain(body, |received, chunk| {
            if over_limit {
                return;
            }
            if received > max_bytes {
                debug!(
                    "Request body exceeds limit, skipping decode: limit={}, received_at_least={}",
                    max_bytes, received
                );
                over_limit = true;
                text.clear();
                return;
            }
            text.push_str(&decoder.decode(chunk));
        })
        .await?;

        if !over_limit {
            // A character can be split exactly at the last chunk boundary
            text.push_str(&decoder.flush());
            if let Some(stripped) = text.strip_prefix(BOM) {
                text = stripped.to_string();
            }
        }

        debug!(
            "Buffered request body: bytes={}, chars={}, over_limit={}",
            bytes.len(),
            text.chars().count(),
            over_limit
        );

        Ok(BufferedBody {
            bytes,
            text,
            over_limit,
        })
    }

    /// Read the whole body without decoding it
    ///
    /// No limit applies; the bytes are only relayed.
    pub async fn read_bytes<B>(&self, body: B) -> Result<Bytes>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        drain(body, |_, _| {}).await
    }
}

/// Collect every data frame of `body`
///
/// `on_chunk` sees the running byte count including the chunk, then the chunk.
async fn drain<B, F>(body: B, mut on_chunk: F) -> Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    F: FnMut(usize, &[u8]),
{
    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::new();

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| {
            let e: Box<dyn std::error::Error + Send + Sync> = e.into();
            warn!("Request body stream failed after {} bytes: {}", buf.len(), e);
            GatewayError::StreamReadError(e.to_string())
        })?;

        // Trailers carry no body bytes
        let Ok(mut data) = frame.into_data() else {
            continue;
        };

        while data.has_remaining() {
            let chunk = data.chunk();
            let len = chunk.len();
            buf.extend_from_slice(chunk);
            on_chunk(buf.len(), chunk);
            data.advance(len);
        }
    }

    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;

    #[test]
    fn test_decoder_ascii() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(b"hello"), "hello");
        assert_eq!(decoder.flush(), "");
    }

    #[test]
    fn test_decoder_split_multibyte() {
        // "é" is 0xC3 0xA9, "€" is 0xE2 0x82 0xAC
        let mut decoder = Utf8StreamDecoder::new();
        let mut out = String::new();
        out.push_str(&decoder.decode(&[b'a', 0xC3]));
        assert!(decoder.has_pending());
        out.push_str(&decoder.decode(&[0xA9, 0xE2]));
        out.push_str(&decoder.decode(&[0x82]));
        out.push_str(&decoder.decode(&[0xAC, b'z']));
        out.push_str(&decoder.flush());
        assert_eq!(out, "aé€z");
    }

    #[test]
    fn test_decoder_invalid_bytes_replaced() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'a', 0xFF, b'b']), "a\u{FFFD}b");
    }

    #[test]
    fn test_decoder_flush_incomplete_tail() {
        let mut decoder = Utf8StreamDecoder::new();
        assert_eq!(decoder.decode(&[b'x', 0xF0, 0x9F]), "x");
        assert_eq!(decoder.flush(), "\u{FFFD}");
        assert!(!decoder.has_pending());
    }

    #[tokio::test]
    async fn test_read_full_body() {
        let reader = RequestBodyReader::new(1024);
        let body = Full::new(Bytes::from_static("{\"query\":\"{ hi }\"}".as_bytes()));
        let buffered = reader.read_to_end(body).await.unwrap();
        assert_eq!(buffered.text, "{\"query\":\"{ hi }\"}");
        assert_eq!(buffered.bytes, Bytes::from_static(b"{\"query\":\"{ hi }\"}"));
    }

    #[tokio::test]
    async fn test_read_body_over_limit_keeps_bytes() {
        let reader = RequestBodyReader::new(4);
        let body = Full::new(Bytes::from_static(b"12345"));
        let buffered = reader.read_to_end(body).await.unwrap();
        assert!(buffered.over_limit);
        assert_eq!(buffered.text, "");
        assert_eq!(buffered.bytes, Bytes::from_static(b"12345"));
    }

    #[tokio::test]
    async fn test_read_body_at_limit_is_decoded() {
        let reader = RequestBodyReader::new(5);
        let buffered = reader
            .read_to_end(Full::new(Bytes::from_static(b"12345")))
            .await
            .unwrap();
        assert!(!buffered.over_limit);
        assert_eq!(buffered.text, "12345");
    }

    #[tokio::test]
    async fn test_leading_bom_dropped_from_text_only() {
        let raw = Bytes::from_static(b"\xEF\xBB\xBF{\"query\":\"{ hi }\"}");
        let buffered = RequestBodyReader::new(1024)
            .read_to_end(Full::new(raw.clone()))
            .await
            .unwrap();
        assert_eq!(buffered.text, "{\"query\":\"{ hi }\"}");
        assert_eq!(buffered.bytes, raw);
    }

    #[tokio::test]
    async fn test_read_bytes_keeps_invalid_utf8() {
        let reader = RequestBodyReader::new(1024);
        let raw = Bytes::from_static(&[0xFF, 0xFE, b'{']);
        let bytes = reader.read_bytes(Full::new(raw.clone())).await.unwrap();
        assert_eq!(bytes, raw);
    }
}
