use hubwire_protocol::{DecodeError, ValueError};

/// Errors that can occur in hub connection operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Read or write failure on the underlying stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Framing failure (oversized or cut-off frame).
    #[error("frame error: {0}")]
    Frame(hubwire_frame::FrameError),

    /// An outbound message could not be encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] hubwire_protocol::ProtocolError),

    /// An inbound frame could not be decoded. The connection stays usable.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The connection is closed.
    #[error(
        "connection closed{}",
        .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default()
    )]
    Closed { reason: Option<String> },

    /// Configuration rejected at construction.
    #[error("invalid hub configuration: {0}")]
    InvalidConfig(String),
}

impl HubError {
    /// True if the connection cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Frame(_) | Self::Closed { .. }
        )
    }
}

impl From<hubwire_frame::FrameError> for HubError {
    fn from(err: hubwire_frame::FrameError) -> Self {
        match err {
            hubwire_frame::FrameError::Io(io) => Self::Transport(io),
            other => Self::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, HubError>;

/// A failure scoped to one invocation.
///
/// The `Display` text becomes the `error` field of the completion sent back
/// to the caller, so variants describe the problem in client terms.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("unknown method '{0}'")]
    MissingMethod(String),

    #[error("method '{target}' expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        target: String,
        expected: usize,
        actual: usize,
    },

    #[error("error binding argument {index} of '{target}': {source}")]
    ArgumentDecode {
        target: String,
        index: usize,
        #[source]
        source: ValueError,
    },

    #[error("method '{target}' has {declared} streaming parameter(s) but the client announced {announced} stream id(s)")]
    TooManyStreams {
        target: String,
        declared: usize,
        announced: usize,
    },

    #[error("method '{target}' has more streaming parameters than the client will stream ({announced} stream id(s))")]
    MissingStreams { target: String, announced: usize },

    #[error("stream id '{0}' is already in use")]
    DuplicateStream(String),

    #[error("invocation id '{0}' is already in use")]
    DuplicateInvocation(String),

    #[error("error invoking '{target}': {detail}")]
    Application { target: String, detail: String },

    #[error("method '{0}' finished without producing a result")]
    NoResult(String),

    #[error("invalid invocation message: {0}")]
    Malformed(String),
}
