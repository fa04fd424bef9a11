//! JSON hub protocol messages and codec.
//!
//! Each frame carries one JSON object tagged with an integer `type`. Decoding
//! is two-pass: a minimal envelope yields the tag, then the frame is parsed
//! again into the typed message. Invocation arguments stay encoded
//! ([`RawPayload`]) until the target method's parameter types are known.

pub mod codec;
pub mod error;
pub mod message;
pub mod message_type;
pub mod raw;
pub mod value;

pub use codec::{decode_message, encode_message, encode_payload};
pub use error::{DecodeError, ProtocolError, Result, ValueError};
pub use message::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, Envelope, HubMessage,
    InvocationMessage, StreamItemMessage,
};
pub use message_type::{
    message_type_name, CANCEL_INVOCATION, CLOSE, COMPLETION, INVOCATION, PING, STREAM_INVOCATION,
    STREAM_ITEM,
};
pub use raw::RawPayload;
pub use value::ValueKind;
