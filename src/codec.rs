//! Traits for encoding requests and decoding replies.
//!
//! A client is generic over a [`Codec`], which picks the wire format of
//! request bodies, the `Content-Type` and `Accept` headers, and the format
//! segment of the default operation path (`json/reply/{Name}`).
//!
//! [`Json`] is the codec used by default.

use serde::{de::DeserializeOwned, ser::Serialize};

/// A trait describing the ability to encode a request body
pub trait Encoder {
    /// The error potentially returned during encoding
    type Error: 'static + Send + Sync + std::error::Error;

    /// The `Content-Type` header value used during encoding
    const CONTENT_TYPE: &'static str;

    /// Encodes a `serde::ser::Serialize` type
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, Self::Error>;
}

/// A trait describing the ability to decode a reply body
pub trait Decoder {
    /// The error potentially returned during decoding
    type Error: 'static + Send + Sync + std::error::Error;

    /// Decodes a `serde::de::DeserializeOwned` type
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, Self::Error>;
}

/// An encoder and decoder pair that a client can be configured with.
pub trait Codec: Encoder + Decoder + Clone + Send + Sync + 'static {
    /// The format name used in default operation paths, e.g. `json`.
    const FORMAT: &'static str;
}

impl<E: Encoder> Encoder for &E {
    type Error = E::Error;

    const CONTENT_TYPE: &'static str = E::CONTENT_TYPE;

    #[inline]
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, Self::Error> {
        (**self).encode(value)
    }
}

impl<D: Decoder> Decoder for &D {
    type Error = D::Error;

    #[inline]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, Self::Error> {
        (**self).decode(bytes)
    }
}

/// An encoder and decoder for JSON-formatted bodies
#[derive(Clone, Copy, Debug, Default)]
pub struct Json;

impl Encoder for Json {
    type Error = serde_json::Error;

    const CONTENT_TYPE: &'static str = "application/json";

    #[inline]
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, Self::Error> {
        serde_json::to_vec(value)
    }
}

impl Decoder for Json {
    type Error = serde_json::Error;

    #[inline]
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, Self::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Codec for Json {
    const FORMAT: &'static str = "json";
}
