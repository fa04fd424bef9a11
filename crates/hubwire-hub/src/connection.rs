//! One logical hub connection: state machine, framed receive, serialized sends.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};

use futures_util::{SinkExt, StreamExt};
use hubwire_frame::{FrameError, RecordCodec};
use hubwire_protocol::{
    decode_message, encode_payload, CloseMessage, CompletionMessage, HubMessage,
    InvocationMessage, RawPayload, StreamItemMessage,
};
use hubwire_transport::ConnectionStream;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::config::HubConfig;
use crate::error::{HubError, Result};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const IDLE: u8 = 0;
const CONNECTED: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of a [`HubConnection`]. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connected,
    Closed,
}

/// A hub protocol connection over one bidirectional byte stream.
///
/// Receives are driven by a single reader; sends from any number of tasks
/// are serialized through one writer lock so frames never interleave.
pub struct HubConnection {
    id: String,
    state: AtomicU8,
    close_reason: StdMutex<Option<String>>,
    reader: Mutex<FramedRead<BoxedReader, RecordCodec>>,
    writer: Mutex<FramedWrite<BoxedWriter, RecordCodec>>,
}

impl HubConnection {
    /// Wrap any async byte stream.
    pub fn new<S>(stream: S, id: impl Into<String>, config: &HubConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);
        Self {
            id: id.into(),
            state: AtomicU8::new(IDLE),
            close_reason: StdMutex::new(None),
            reader: Mutex::new(FramedRead::new(
                reader,
                RecordCodec::with_max_payload(config.max_message_size),
            )),
            writer: Mutex::new(FramedWrite::new(
                writer,
                RecordCodec::with_max_payload(config.max_message_size),
            )),
        }
    }

    /// Wrap an accepted transport connection, keeping its id.
    pub fn from_stream(stream: ConnectionStream, config: &HubConfig) -> Self {
        let id = stream.connection_id().to_string();
        Self::new(stream, id, config)
    }

    /// Idle -> Connected. Has no effect in any other state.
    pub fn start(&self) {
        if self
            .state
            .compare_exchange(IDLE, CONNECTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tracing::debug!(connection_id = %self.id, "connection started");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.load(Ordering::Acquire) == CONNECTED
    }

    pub fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            IDLE => ConnectionState::Idle,
            CONNECTED => ConnectionState::Connected,
            _ => ConnectionState::Closed,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.id
    }

    /// Why the connection closed, if it has and a reason was recorded.
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close the connection and tell the client, best effort.
    ///
    /// The `Close` message allows reconnecting. A failed send is ignored.
    /// Closing an already closed connection does nothing.
    pub async fn close(&self, error: Option<&str>) {
        if !self.mark_closed(error.map(str::to_string)) {
            return;
        }

        let message = HubMessage::Close(CloseMessage {
            error: error.map(str::to_string),
            allow_reconnect: true,
        });
        if let Err(err) = self.write(&message).await {
            tracing::debug!(connection_id = %self.id, error = %err, "close message not delivered");
        }
    }

    /// Move to `Closed` without sending anything. Returns false if already closed.
    pub(crate) fn mark_closed(&self, reason: Option<String>) -> bool {
        if self.state.swap(CLOSED, Ordering::AcqRel) == CLOSED {
            return false;
        }
        *self
            .close_reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = reason.clone();
        tracing::debug!(
            connection_id = %self.id,
            reason = reason.as_deref().unwrap_or(""),
            "connection closed"
        );
        true
    }

    /// Wait for the next complete message.
    ///
    /// Returns `Ok(None)` when the client ends the stream. A frame that fails
    /// to decode yields [`HubError::Decode`] and leaves the connection usable;
    /// any framing or transport failure closes it.
    pub async fn receive(&self) -> Result<Option<HubMessage>> {
        self.ensure_open()?;

        let next = self.reader.lock().await.next().await;
        let frame = match next {
            None => return Ok(None),
            Some(Ok(frame)) => frame,
            Some(Err(FrameError::Truncated { pending })) => {
                tracing::warn!(connection_id = %self.id, pending, "stream ended mid-frame");
                return Ok(None);
            }
            Some(Err(err)) => {
                let err = HubError::from(err);
                self.mark_closed(Some(err.to_string()));
                return Err(err);
            }
        };

        tracing::trace!(connection_id = %self.id, len = frame.payload.len(), "frame received");
        Ok(Some(decode_message(&frame.payload)?))
    }

    /// Call a client method without expecting a completion.
    pub async fn send_invocation(
        &self,
        target: impl Into<String>,
        arguments: Vec<RawPayload>,
    ) -> Result<()> {
        self.send(&HubMessage::Invocation(InvocationMessage::new(
            target, arguments,
        )))
        .await
    }

    pub async fn send_stream_item(&self, invocation_id: &str, item: RawPayload) -> Result<()> {
        self.send(&HubMessage::StreamItem(StreamItemMessage::new(
            invocation_id,
            item,
        )))
        .await
    }

    /// Send a completion. An error takes precedence over a result.
    pub async fn send_completion(
        &self,
        invocation_id: &str,
        result: Option<RawPayload>,
        error: Option<String>,
    ) -> Result<()> {
        let completion = match error {
            Some(error) => CompletionMessage::failure(invocation_id, error),
            None => CompletionMessage::success(invocation_id, result),
        };
        self.send(&HubMessage::Completion(completion)).await
    }

    pub async fn send_ping(&self) -> Result<()> {
        self.send(&HubMessage::Ping).await
    }

    /// Send any message. Fails without writing if the connection is closed.
    pub async fn send(&self, message: &HubMessage) -> Result<()> {
        self.ensure_open()?;
        self.write(message).await
    }

    async fn write(&self, message: &HubMessage) -> Result<()> {
        let payload = encode_payload(message)?;
        let len = payload.len();

        let sent = self.writer.lock().await.send(payload).await;
        match sent {
            Ok(()) => {
                tracing::trace!(
                    connection_id = %self.id,
                    message_type = message.name(),
                    len,
                    "frame written"
                );
                Ok(())
            }
            Err(FrameError::Io(err)) => {
                tracing::error!(connection_id = %self.id, error = %err, "transport write failed");
                self.mark_closed(Some(err.to_string()));
                Err(HubError::Transport(err))
            }
            Err(err) => Err(HubError::Frame(err)),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state.load(Ordering::Acquire) == CLOSED {
            return Err(HubError::Closed {
                reason: self.close_reason(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for HubConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
