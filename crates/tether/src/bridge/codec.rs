//! Framed codec for the channel transport.
//!
//! Length-prefixed frames (4-byte big-endian) carrying one JSON document each.
//! Works over any AsyncRead/AsyncWrite (stdio, pipes, sockets).

use std::io;
use std::marker::PhantomData;

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Frames above this size are rejected in both directions.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

const LARGE_FRAME_BYTES: usize = 1024 * 1024;

pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _phantom: PhantomData<T>,
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .length_field_length(4)
                .max_frame_length(max)
                .new_codec(),
            _phantom: PhantomData,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.inner.max_frame_length()
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(bytes) = self.inner.decode(src)? else {
            return Ok(None);
        };
        tracing::trace!(frame_bytes = bytes.len(), "Decoding frame");
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json =
            serde_json::to_vec(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        tracing::trace!(frame_bytes = json.len(), "Encoding frame");
        if json.len() > LARGE_FRAME_BYTES {
            tracing::debug!(frame_kb = json.len() / 1024, "Large frame being encoded");
        }
        self.inner.encode(Bytes::from(json), dst)
    }
}
