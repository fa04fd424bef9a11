//! Client-to-server stream routing.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use hubwire_protocol::{InvocationMessage, StreamItemMessage, ValueError, ValueKind};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::InvocationError;

struct Upstream {
    queue: mpsc::UnboundedSender<Value>,
    kind: ValueKind,
}

/// Registry of upstream channels keyed by stream id.
///
/// Entries are created when an invocation with streaming parameters is
/// bound and removed on the stream's completion, when the consuming method
/// drops its receiver, or when the connection closes.
///
/// Each entry owns a forwarding task that moves items from an unbounded
/// queue into the method's bounded channel. Routing an item never waits, so
/// a method that stops reading cannot stall the connection.
pub struct StreamMultiplexer {
    channels: Mutex<HashMap<String, Upstream>>,
    capacity: usize,
}

impl StreamMultiplexer {
    /// Create a registry whose channels buffer `capacity` items each.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a channel for the `stream_index`-th stream id of `invocation`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind_upstream(
        &self,
        invocation: &InvocationMessage,
        stream_index: usize,
        kind: ValueKind,
    ) -> Result<mpsc::Receiver<Value>, InvocationError> {
        let stream_id =
            invocation
                .stream_ids
                .get(stream_index)
                .ok_or_else(|| InvocationError::MissingStreams {
                    target: invocation.target.clone(),
                    announced: invocation.stream_ids.len(),
                })?;

        let mut channels = self.lock();
        if channels.contains_key(stream_id) {
            return Err(InvocationError::DuplicateStream(stream_id.clone()));
        }

        let (queue, pending) = mpsc::unbounded_channel();
        let (sender, receiver) = mpsc::channel(self.capacity);
        tokio::spawn(forward(stream_id.clone(), pending, sender));
        channels.insert(stream_id.clone(), Upstream { queue, kind });
        tracing::debug!(
            stream_id = %stream_id,
            method = %invocation.target,
            "upstream channel bound"
        );
        Ok(receiver)
    }

    /// Route one item to its channel without waiting.
    ///
    /// Items for unknown stream ids are dropped silently. Fails only when the
    /// item does not fit the channel's element type.
    pub fn on_stream_item(&self, message: StreamItemMessage) -> Result<(), ValueError> {
        let mut channels = self.lock();
        let Some(upstream) = channels.get(&message.invocation_id) else {
            tracing::trace!(stream_id = %message.invocation_id, "item for unknown stream ignored");
            return Ok(());
        };

        let item = upstream.kind.narrow_item(message.item.to_value()?)?;
        if upstream.queue.send(item).is_err() {
            tracing::debug!(
                stream_id = %message.invocation_id,
                "upstream receiver dropped; removing channel"
            );
            channels.remove(&message.invocation_id);
        }
        Ok(())
    }

    /// Close and forget the channel for `stream_id`. Returns true if one existed.
    ///
    /// Items already queued are still delivered before the consumer sees the end.
    pub fn on_stream_completion(&self, stream_id: &str) -> bool {
        let removed = self.lock().remove(stream_id).is_some();
        if removed {
            tracing::debug!(stream_id = %stream_id, "upstream channel completed");
        }
        removed
    }

    /// Close every channel, unblocking all consumers.
    pub fn close_all(&self) {
        let mut channels = self.lock();
        if !channels.is_empty() {
            tracing::debug!(count = channels.len(), "closing upstream channels");
        }
        channels.clear();
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.lock().contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Upstream>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Move queued items into the consumer's channel until either side goes away.
async fn forward(
    stream_id: String,
    mut pending: mpsc::UnboundedReceiver<Value>,
    sender: mpsc::Sender<Value>,
) {
    loop {
        let item = tokio::select! {
            _ = sender.closed() => break,
            item = pending.recv() => item,
        };
        let Some(item) = item else {
            break;
        };
        if sender.send(item).await.is_err() {
            break;
        }
    }
    tracing::trace!(stream_id = %stream_id, "upstream forwarder finished");
}
