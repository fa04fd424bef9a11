use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Frame terminator: ASCII record separator.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One delimiter-bounded message, without its terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }
}

/// Encode a payload into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────────────┬──────────┐
/// │ Payload (N bytes)        │ 0x1E     │
/// │ never contains 0x1E      │ (1B)     │
/// └──────────────────────────┴──────────┘
/// ```
///
/// The whole frame is appended to `dst` in one step, so a writer flushing
/// `dst` never exposes half a message.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if let Some(offset) = find_separator(payload) {
        return Err(FrameError::DelimiterInPayload { offset });
    }
    dst.reserve(payload.len() + 1);
    dst.put_slice(payload);
    dst.put_u8(RECORD_SEPARATOR);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet; the
/// buffered bytes are left untouched for the next call. On success, consumes
/// the frame bytes and its terminator, leaving any following bytes in place.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    match find_separator(src) {
        Some(end) => split_frame(src, end, max_payload).map(Some),
        None => {
            check_pending(src.len(), max_payload)?;
            Ok(None)
        }
    }
}

pub(crate) fn find_separator(bytes: &[u8]) -> Option<usize> {
    bytes.iter().position(|&b| b == RECORD_SEPARATOR)
}

/// Split off the frame ending at `end` (the separator index).
pub(crate) fn split_frame(src: &mut BytesMut, end: usize, max_payload: usize) -> Result<Frame> {
    if end > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: end,
            max: max_payload,
        });
    }
    let payload = src.split_to(end).freeze();
    src.advance(1);
    Ok(Frame { payload })
}

/// An incomplete frame that already exceeds the limit can never become valid.
pub(crate) fn check_pending(pending: usize, max_payload: usize) -> Result<()> {
    if pending > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: pending,
            max: max_payload,
        });
    }
    Ok(())
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
