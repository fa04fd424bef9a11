//! Wire values of the `type` tag.
//!
//! Values outside 1-7 are decoded as a bare [`Envelope`](crate::Envelope)
//! so newer peers can add control messages without breaking older ones.

/// Call a hub method.
pub const INVOCATION: i64 = 1;

/// One item of a stream, in either direction.
pub const STREAM_ITEM: i64 = 2;

/// Terminal response to an invocation or stream.
pub const COMPLETION: i64 = 3;

/// Call a hub method whose results are streamed back.
pub const STREAM_INVOCATION: i64 = 4;

/// Abandon an outstanding invocation.
pub const CANCEL_INVOCATION: i64 = 5;

/// Keep-alive.
pub const PING: i64 = 6;

/// Connection shutdown.
pub const CLOSE: i64 = 7;

/// Returns a human-readable name for a message type.
pub fn message_type_name(message_type: i64) -> &'static str {
    match message_type {
        INVOCATION => "Invocation",
        STREAM_ITEM => "StreamItem",
        COMPLETION => "Completion",
        STREAM_INVOCATION => "StreamInvocation",
        CANCEL_INVOCATION => "CancelInvocation",
        PING => "Ping",
        CLOSE => "Close",
        _ => "Unknown",
    }
}
