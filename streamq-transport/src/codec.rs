//! Payload codecs.
//!
//! A codec turns payload bytes into the item readers receive, and items back
//! into bytes for the dispatch path. Pollers call [`Codec::decode`] once per
//! fetched record; a failure skips that record only.

use bytes::Bytes;
use thiserror::Error;

/// Payload could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("decode failed: {message}")]
pub struct DecodeError {
    /// Error description.
    pub message: String,
}

impl DecodeError {
    /// Creates a decode error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Item could not be encoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("encode failed: {message}")]
pub struct EncodeError {
    /// Error description.
    pub message: String,
}

impl EncodeError {
    /// Creates an encode error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Narrow codec capability used by pollers and the dispatcher.
pub trait Codec: Send + Sync + 'static {
    /// Decoded item type.
    type Item: Send + Sync + 'static;

    /// Decodes a payload. `contract` names the expected type for external
    /// topics and is `None` for internal ones.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` when the payload is not a valid item.
    fn decode(&self, payload: &Bytes, contract: Option<&str>) -> Result<Self::Item, DecodeError>;

    /// Encodes an item into payload bytes.
    ///
    /// # Errors
    ///
    /// Returns `EncodeError` when the item cannot be encoded.
    fn encode(&self, item: &Self::Item) -> Result<Bytes, EncodeError>;
}

/// Passes payload bytes through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Bytes;

    fn decode(&self, payload: &Bytes, _contract: Option<&str>) -> Result<Bytes, DecodeError> {
        Ok(payload.clone())
    }

    fn encode(&self, item: &Bytes) -> Result<Bytes, EncodeError> {
        Ok(item.clone())
    }
}

/// Plain-text payloads; rejects invalid UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Codec;

impl Codec for Utf8Codec {
    type Item = String;

    fn decode(&self, payload: &Bytes, _contract: Option<&str>) -> Result<String, DecodeError> {
        std::str::from_utf8(payload)
            .map(str::to_owned)
            .map_err(|e| DecodeError::new(e.to_string()))
    }

    fn encode(&self, item: &String) -> Result<Bytes, EncodeError> {
        Ok(Bytes::copy_from_slice(item.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_codec_is_identity() {
        let payload = Bytes::from_static(b"\x00\xffraw");
        assert_eq!(BytesCodec.decode(&payload, None).unwrap(), payload);
        assert_eq!(BytesCodec.encode(&payload).unwrap(), payload);
    }

    #[test]
    fn test_utf8_codec() {
        let decoded = Utf8Codec
            .decode(&Bytes::from_static(b"hello"), Some("Greeting"))
            .unwrap();
        assert_eq!(decoded, "hello");
        assert_eq!(Utf8Codec.encode(&decoded).unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_utf8_codec_rejects_invalid_bytes() {
        let err = Utf8Codec
            .decode(&Bytes::from_static(b"\xff\xfe"), None)
            .unwrap_err();
        assert!(err.to_string().starts_with("decode failed"));
    }
}
