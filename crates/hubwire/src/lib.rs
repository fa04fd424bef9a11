//! Server side of a JSON hub protocol.
//!
//! Clients invoke named methods on a long-lived connection. Messages are
//! JSON objects terminated by the ASCII record separator (`0x1E`). Methods
//! may return a value, resolve later, consume client streams, or stream
//! results back.
//!
//! # Crate Structure
//!
//! - [`transport`] — TCP, Unix socket and in-memory byte streams
//! - [`frame`] — record-separator framing
//! - [`protocol`] — hub messages and the two-pass JSON codec
//! - [`hub`] — connection state machine, dispatcher and stream routing (behind `hub` feature)

/// Re-export transport types.
pub mod transport {
    pub use hubwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hubwire_frame::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use hubwire_protocol::*;
}

/// Re-export hub types (requires `hub` feature).
#[cfg(feature = "hub")]
pub mod hub {
    pub use hubwire_hub::*;
}
