//! Bidirectional byte-stream connections for hubwire.
//!
//! The hub protocol only needs a raw duplex byte stream with a stable
//! connection identifier. This crate provides one over:
//! - TCP sockets
//! - Unix domain sockets (Linux/macOS)
//! - In-memory duplex pipes (tests, embedding)
//!
//! This is the lowest layer of hubwire. Everything else builds on top of
//! the [`ConnectionStream`] type provided here.

pub mod error;
pub mod listener;
pub mod traits;

pub use error::{Result, TransportError};
pub use listener::{connect, HubListener, ListenAddr};
pub use traits::ConnectionStream;
