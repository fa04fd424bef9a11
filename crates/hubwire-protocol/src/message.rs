use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::message_type::{
    message_type_name, CANCEL_INVOCATION, CLOSE, COMPLETION, INVOCATION, PING, STREAM_INVOCATION,
    STREAM_ITEM,
};
use crate::raw::RawPayload;

/// Treats an explicit JSON `null` the same as an absent field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The minimal first-pass view of a frame: only the `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub message_type: i64,
}

/// A call to a hub method (`type` 1, or 4 for stream invocations).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    pub target: String,
    #[serde(default)]
    pub invocation_id: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub arguments: Vec<RawPayload>,
    #[serde(default, deserialize_with = "nullable")]
    pub stream_ids: Vec<String>,
}

impl InvocationMessage {
    /// A fire-and-forget invocation with the given arguments.
    pub fn new(target: impl Into<String>, arguments: Vec<RawPayload>) -> Self {
        Self {
            target: target.into(),
            invocation_id: None,
            arguments,
            stream_ids: Vec::new(),
        }
    }

    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }

    pub fn with_stream_ids(mut self, stream_ids: Vec<String>) -> Self {
        self.stream_ids = stream_ids;
        self
    }

    /// The invocation id, if the caller expects a completion.
    ///
    /// An empty id is treated the same as a missing one.
    pub fn invocation_id(&self) -> Option<&str> {
        self.invocation_id.as_deref().filter(|id| !id.is_empty())
    }

    /// True when no completion should be sent for this invocation.
    pub fn is_fire_and_forget(&self) -> bool {
        self.invocation_id().is_none()
    }
}

/// One item of a stream (`type` 2).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamItemMessage {
    pub invocation_id: String,
    #[serde(default = "RawPayload::null")]
    pub item: RawPayload,
}

impl StreamItemMessage {
    pub fn new(invocation_id: impl Into<String>, item: RawPayload) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            item,
        }
    }
}

/// Terminal response to an invocation or stream (`type` 3).
///
/// `result` and `error` are never both present; frames carrying both are
/// rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CompletionFields")]
pub struct CompletionMessage {
    pub invocation_id: String,
    pub result: Option<RawPayload>,
    pub error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletionFields {
    invocation_id: String,
    #[serde(default)]
    result: Option<RawPayload>,
    #[serde(default)]
    error: Option<String>,
}

impl TryFrom<CompletionFields> for CompletionMessage {
    type Error = String;

    fn try_from(fields: CompletionFields) -> Result<Self, Self::Error> {
        if fields.result.is_some() && fields.error.is_some() {
            return Err(format!(
                "completion {} carries both result and error",
                fields.invocation_id
            ));
        }
        Ok(Self {
            invocation_id: fields.invocation_id,
            result: fields.result,
            error: fields.error,
        })
    }
}

impl CompletionMessage {
    /// A successful completion; `None` means the method returned nothing.
    pub fn success(invocation_id: impl Into<String>, result: Option<RawPayload>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result,
            error: None,
        }
    }

    pub fn failure(invocation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            invocation_id: invocation_id.into(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Request to abandon an outstanding invocation (`type` 5).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelInvocationMessage {
    pub invocation_id: String,
}

/// Connection shutdown (`type` 7).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseMessage {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub allow_reconnect: bool,
}

/// Every message the hub protocol carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    StreamInvocation(InvocationMessage),
    StreamItem(StreamItemMessage),
    Completion(CompletionMessage),
    CancelInvocation(CancelInvocationMessage),
    Ping,
    Close(CloseMessage),
    /// A message with an unrecognized `type`, kept as its envelope.
    Other(Envelope),
}

impl HubMessage {
    /// The wire `type` tag.
    pub fn message_type(&self) -> i64 {
        match self {
            Self::Invocation(_) => INVOCATION,
            Self::StreamItem(_) => STREAM_ITEM,
            Self::Completion(_) => COMPLETION,
            Self::StreamInvocation(_) => STREAM_INVOCATION,
            Self::CancelInvocation(_) => CANCEL_INVOCATION,
            Self::Ping => PING,
            Self::Close(_) => CLOSE,
            Self::Other(envelope) => envelope.message_type,
        }
    }

    pub fn name(&self) -> &'static str {
        message_type_name(self.message_type())
    }

    /// The invocation id this message refers to, if any.
    pub fn invocation_id(&self) -> Option<&str> {
        match self {
            Self::Invocation(m) | Self::StreamInvocation(m) => m.invocation_id(),
            Self::StreamItem(m) => Some(&m.invocation_id),
            Self::Completion(m) => Some(&m.invocation_id),
            Self::CancelInvocation(m) => Some(&m.invocation_id),
            Self::Ping | Self::Close(_) | Self::Other(_) => None,
        }
    }
}

impl Serialize for HubMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.message_type())?;

        match self {
            Self::Invocation(m) | Self::StreamInvocation(m) => {
                if let Some(id) = &m.invocation_id {
                    map.serialize_entry("invocationId", id)?;
                }
                map.serialize_entry("target", &m.target)?;
                map.serialize_entry("arguments", &m.arguments)?;
                if !m.stream_ids.is_empty() {
                    map.serialize_entry("streamIds", &m.stream_ids)?;
                }
            }
            Self::StreamItem(m) => {
                map.serialize_entry("invocationId", &m.invocation_id)?;
                map.serialize_entry("item", &m.item)?;
            }
            Self::Completion(m) => {
                map.serialize_entry("invocationId", &m.invocation_id)?;
                if let Some(result) = &m.result {
                    map.serialize_entry("result", result)?;
                }
                if let Some(error) = &m.error {
                    map.serialize_entry("error", error)?;
                }
            }
            Self::CancelInvocation(m) => {
                map.serialize_entry("invocationId", &m.invocation_id)?;
            }
            Self::Close(m) => {
                if let Some(error) = &m.error {
                    map.serialize_entry("error", error)?;
                }
                if m.allow_reconnect {
                    map.serialize_entry("allowReconnect", &true)?;
                }
            }
            Self::Ping | Self::Other(_) => {}
        }

        map.end()
    }
}
