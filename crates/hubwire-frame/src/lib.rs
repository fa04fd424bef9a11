//! Record-separator message framing for hubwire.
//!
//! Every message on the wire is terminated by a single ASCII record
//! separator byte (`0x1E`). A frame never contains that byte internally,
//! so the reader only has to scan for it:
//! - complete frames are handed out whole
//! - an incomplete tail stays buffered and is prefixed to the next read
//!
//! No partial reads, no buffer management in user code.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::RecordCodec;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD, RECORD_SEPARATOR,
};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
