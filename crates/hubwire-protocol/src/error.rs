use crate::value::ValueKind;

/// A frame that could not be parsed into a hub message.
///
/// Carries the raw frame text and, when the frame still names one, the
/// invocation id so the failure can be answered with an error completion.
#[derive(Debug, thiserror::Error)]
#[error("{source} (source: {raw})")]
pub struct DecodeError {
    /// The frame as (lossy) text.
    pub raw: String,
    /// Invocation id found in the frame, if any.
    pub invocation_id: Option<String>,
    /// The underlying parse failure.
    #[source]
    pub source: serde_json::Error,
}

impl DecodeError {
    pub(crate) fn new(
        frame: &[u8],
        invocation_id: Option<String>,
        source: serde_json::Error,
    ) -> Self {
        Self {
            raw: String::from_utf8_lossy(frame).into_owned(),
            invocation_id,
            source,
        }
    }
}

/// A payload that does not fit the semantic type it is decoded into.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    /// The payload is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload's JSON kind does not match.
    #[error("expected {expected}, found {found}")]
    KindMismatch {
        expected: ValueKind,
        found: &'static str,
    },

    /// A number does not fit the target numeric type.
    #[error("{value} is out of range for {kind}")]
    OutOfRange { kind: ValueKind, value: String },
}

/// Errors that can occur while encoding or decoding hub messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// An inbound frame failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An outbound message failed to serialize.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Framing failed.
    #[error("frame error: {0}")]
    Frame(#[from] hubwire_frame::FrameError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
