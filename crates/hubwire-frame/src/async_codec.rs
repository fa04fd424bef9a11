//! `tokio_util::codec` adapter for record-separator framing.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{
    check_pending, encode_frame, find_separator, split_frame, Frame, DEFAULT_MAX_PAYLOAD,
};
use crate::error::{FrameError, Result};

/// Decodes [`Frame`]s from and encodes payloads into a byte stream.
///
/// Use with `FramedRead`/`FramedWrite`. The decoder remembers how far it has
/// already scanned, so a large frame arriving in many small reads is not
/// rescanned from the start on every read.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    max_payload_size: usize,
    next_index: usize,
}

impl RecordCodec {
    /// Create a codec with the default payload limit.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD)
    }

    /// Create a codec with an explicit payload limit.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            max_payload_size,
            next_index: 0,
        }
    }

    /// Maximum accepted payload size.
    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RecordCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let start = self.next_index.min(src.len());
        match find_separator(&src[start..]) {
            Some(offset) => {
                self.next_index = 0;
                split_frame(src, start + offset, self.max_payload_size).map(Some)
            }
            None => {
                self.next_index = src.len();
                check_pending(src.len(), self.max_payload_size)?;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(FrameError::Truncated { pending: src.len() }),
        }
    }
}

impl Encoder<Bytes> for RecordCodec {
    type Error = FrameError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(&payload, dst)
    }
}
