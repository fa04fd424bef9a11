//! Two-pass decode and atomic encode of hub messages.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{DecodeError, Result};
use crate::message::{
    CancelInvocationMessage, CloseMessage, CompletionMessage, Envelope, HubMessage,
    InvocationMessage, StreamItemMessage,
};
use crate::message_type::{
    CANCEL_INVOCATION, CLOSE, COMPLETION, INVOCATION, PING, STREAM_INVOCATION, STREAM_ITEM,
};

#[derive(Deserialize)]
struct InvocationIdOnly {
    #[serde(rename = "invocationId")]
    invocation_id: Option<String>,
}

/// Decode one frame (without its separator) into a typed message.
///
/// The first pass reads only the `type` tag. Unknown tags come back as
/// [`HubMessage::Other`]. When the typed pass fails, the returned error still
/// carries the invocation id if the frame names one.
pub fn decode_message(frame: &[u8]) -> std::result::Result<HubMessage, DecodeError> {
    let envelope: Envelope =
        serde_json::from_slice(frame).map_err(|err| DecodeError::new(frame, None, err))?;

    let message = match envelope.message_type {
        INVOCATION => HubMessage::Invocation(typed(frame)?),
        STREAM_INVOCATION => HubMessage::StreamInvocation(typed::<InvocationMessage>(frame)?),
        STREAM_ITEM => HubMessage::StreamItem(typed::<StreamItemMessage>(frame)?),
        COMPLETION => HubMessage::Completion(typed::<CompletionMessage>(frame)?),
        CANCEL_INVOCATION => HubMessage::CancelInvocation(typed::<CancelInvocationMessage>(frame)?),
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close(typed::<CloseMessage>(frame)?),
        _ => {
            tracing::trace!(
                message_type = envelope.message_type,
                "passing through unknown message type"
            );
            HubMessage::Other(envelope)
        }
    };

    Ok(message)
}

fn typed<T: DeserializeOwned>(frame: &[u8]) -> std::result::Result<T, DecodeError> {
    serde_json::from_slice(frame).map_err(|err| {
        let invocation_id = serde_json::from_slice::<InvocationIdOnly>(frame)
            .ok()
            .and_then(|only| only.invocation_id)
            .filter(|id| !id.is_empty());
        DecodeError::new(frame, invocation_id, err)
    })
}

/// Serialize a message to its JSON text, without the separator.
pub fn encode_payload(message: &HubMessage) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(message)?))
}

/// Serialize a message and append one complete frame to `dst`.
///
/// On error `dst` is left unchanged.
pub fn encode_message(message: &HubMessage, dst: &mut BytesMut) -> Result<()> {
    let payload = encode_payload(message)?;
    hubwire_frame::encode_frame(&payload, dst)?;
    Ok(())
}
