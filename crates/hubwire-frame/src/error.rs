/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload (or a buffered incomplete frame) exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// An outbound payload contains the record separator byte.
    #[error("payload contains the record separator at offset {offset}")]
    DelimiterInPayload { offset: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended on a frame boundary.
    #[error("end of stream")]
    EndOfStream,

    /// The stream ended with bytes of an incomplete frame still buffered.
    #[error("connection closed with {pending} bytes of an incomplete frame")]
    Truncated { pending: usize },
}

impl FrameError {
    /// True when the peer closed the stream, cleanly or mid-frame.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, FrameError::EndOfStream | FrameError::Truncated { .. })
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
