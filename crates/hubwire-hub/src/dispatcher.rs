//! Invocation dispatch: lookup, argument binding, isolated execution, completion.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hubwire_protocol::{InvocationMessage, RawPayload};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::connection::HubConnection;
use crate::error::{HubError, InvocationError, Result};
use crate::registry::{HubArgs, MethodRegistry, MethodResult, MethodReturn, ParamType, Thunk};
use crate::streams::StreamMultiplexer;

const GENERIC_FAILURE: &str = "an unexpected error occurred";

/// Cancellation tokens of invocations still running, keyed by invocation id.
#[derive(Default)]
struct ActiveInvocations {
    next_seq: AtomicU64,
    tokens: Mutex<HashMap<String, (u64, CancellationToken)>>,
}

impl ActiveInvocations {
    /// Track a new invocation. Returns `None` while the id is still in use.
    fn register(&self, invocation_id: &str) -> Option<(u64, CancellationToken)> {
        match self.lock().entry(invocation_id.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                let token = CancellationToken::new();
                slot.insert((seq, token.clone()));
                Some((seq, token))
            }
        }
    }

    fn finish(&self, invocation_id: &str, seq: u64) {
        let mut tokens = self.lock();
        if tokens.get(invocation_id).is_some_and(|(s, _)| *s == seq) {
            tokens.remove(invocation_id);
        }
    }

    fn cancel(&self, invocation_id: &str) -> bool {
        match self.lock().remove(invocation_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        for (_, (_, token)) in self.lock().drain() {
            token.cancel();
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, CancellationToken)>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves inbound invocations against a [`MethodRegistry`] and answers them.
pub struct Dispatcher {
    connection: Arc<HubConnection>,
    registry: Arc<MethodRegistry>,
    streams: Arc<StreamMultiplexer>,
    active: Arc<ActiveInvocations>,
    detailed_errors: bool,
}

impl Dispatcher {
    pub fn new(
        connection: Arc<HubConnection>,
        registry: Arc<MethodRegistry>,
        streams: Arc<StreamMultiplexer>,
        config: &HubConfig,
    ) -> Self {
        Self {
            connection,
            registry,
            streams,
            active: Arc::new(ActiveInvocations::default()),
            detailed_errors: config.detailed_errors,
        }
    }

    /// Bind and start one invocation.
    ///
    /// Binding (lookup, argument decoding, upstream registration) happens
    /// before this returns, so stream items that follow the invocation on
    /// the wire always find their channel. The method itself runs on its own
    /// task. Binding failures, including an id that belongs to a still
    /// running invocation, are answered with an error completion; only a
    /// transport failure while sending it is returned.
    pub async fn dispatch(&self, invocation: InvocationMessage) -> Result<()> {
        let invocation_id = invocation.invocation_id().map(str::to_string);
        tracing::debug!(
            connection_id = %self.connection.connection_id(),
            method = %invocation.target,
            invocation_id = invocation_id.as_deref().unwrap_or(""),
            "dispatching invocation"
        );

        let registration = match invocation_id.as_deref() {
            Some(id) => match self.active.register(id) {
                Some(registration) => Some(registration),
                None => {
                    let err = InvocationError::DuplicateInvocation(id.to_string());
                    return self.reject(Some(id), &invocation.target, err).await;
                }
            },
            None => None,
        };

        match self.bind(&invocation) {
            Ok((thunk, args)) => {
                self.spawn(thunk, invocation.target, invocation_id, registration, args);
                Ok(())
            }
            Err(err) => {
                if let (Some(id), Some((seq, _))) = (&invocation_id, &registration) {
                    self.active.finish(id, *seq);
                }
                self.reject(invocation_id.as_deref(), &invocation.target, err).await
            }
        }
    }

    /// Answer an invocation with an error completion without running anything.
    ///
    /// Fire-and-forget invocations (no id) are only logged.
    pub async fn reject(
        &self,
        invocation_id: Option<&str>,
        target: &str,
        err: InvocationError,
    ) -> Result<()> {
        let Some(invocation_id) = invocation_id else {
            tracing::warn!(method = %target, error = %err, "fire-and-forget invocation rejected");
            return Ok(());
        };
        tracing::debug!(invocation_id, method = %target, error = %err, "invocation rejected");
        send_completion(&self.connection, invocation_id, Err(err)).await
    }

    /// Signal a running invocation to stop. Returns false for unknown ids.
    pub fn cancel(&self, invocation_id: &str) -> bool {
        let cancelled = self.active.cancel(invocation_id);
        tracing::debug!(invocation_id, cancelled, "cancel requested");
        cancelled
    }

    /// Cancel every running invocation.
    pub fn cancel_all(&self) {
        self.active.cancel_all();
    }

    /// Number of invocations with an id that have not completed yet.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn bind(
        &self,
        invocation: &InvocationMessage,
    ) -> std::result::Result<(Arc<Thunk>, HubArgs), InvocationError> {
        let target = &invocation.target;
        let method = self
            .registry
            .lookup(target)
            .ok_or_else(|| InvocationError::MissingMethod(target.clone()))?;

        let expected = method.value_param_count();
        if invocation.arguments.len() != expected {
            return Err(InvocationError::ArgumentCount {
                target: target.clone(),
                expected,
                actual: invocation.arguments.len(),
            });
        }

        let declared = method.upstream_param_count();
        if invocation.stream_ids.len() > declared {
            return Err(InvocationError::TooManyStreams {
                target: target.clone(),
                declared,
                announced: invocation.stream_ids.len(),
            });
        }

        // Decode every value before registering any channel so a bad
        // argument leaves no upstream behind.
        let mut values = Vec::with_capacity(expected);
        let value_kinds = method.params().iter().filter_map(|p| match p {
            ParamType::Value(kind) => Some(kind),
            ParamType::Upstream(_) => None,
        });
        for (index, (kind, raw)) in value_kinds.zip(&invocation.arguments).enumerate() {
            let value = kind
                .decode_argument(raw)
                .map_err(|source| InvocationError::ArgumentDecode {
                    target: target.clone(),
                    index,
                    source,
                })?;
            values.push(value);
        }

        let mut args = HubArgs::new();
        let mut values = values.into_iter();
        let mut bound_streams = 0;
        for param in method.params() {
            match param {
                ParamType::Value(_) => {
                    if let Some(value) = values.next() {
                        args.push_value(value);
                    }
                }
                ParamType::Upstream(kind) => {
                    match self.streams.bind_upstream(invocation, bound_streams, kind.clone()) {
                        Ok(receiver) => args.push_upstream(receiver),
                        Err(err) => {
                            for stream_id in &invocation.stream_ids[..bound_streams] {
                                self.streams.on_stream_completion(stream_id);
                            }
                            return Err(err);
                        }
                    }
                    bound_streams += 1;
                }
            }
        }

        Ok((method.thunk(), args))
    }

    fn spawn(
        &self,
        thunk: Arc<Thunk>,
        target: String,
        invocation_id: Option<String>,
        registration: Option<(u64, CancellationToken)>,
        args: HubArgs,
    ) {
        let task = InvocationTask {
            connection: Arc::clone(&self.connection),
            active: Arc::clone(&self.active),
            target,
            invocation_id,
            registration,
            detailed_errors: self.detailed_errors,
        };

        tokio::spawn(task.run(move || thunk(args)));
    }
}

/// How one invocation ended.
enum Outcome {
    Completed(Option<Value>),
    Failed(InvocationError),
    Cancelled,
}

struct InvocationTask {
    connection: Arc<HubConnection>,
    active: Arc<ActiveInvocations>,
    target: String,
    invocation_id: Option<String>,
    registration: Option<(u64, CancellationToken)>,
    detailed_errors: bool,
}

impl InvocationTask {
    async fn run(self, call: impl FnOnce() -> MethodResult + Send + 'static) {
        // Method bodies may block; keep them off the runtime's workers.
        let called =
            tokio::task::spawn_blocking(move || std::panic::catch_unwind(AssertUnwindSafe(call)))
                .await;
        let outcome = match called {
            Ok(Ok(Ok(returned))) => self.await_result(returned).await,
            Ok(Ok(Err(err))) => {
                tracing::error!(method = %self.target, error = %err, "method returned an error");
                Outcome::Failed(self.application_error(err.to_string()))
            }
            Ok(Err(panic)) => {
                let detail = panic_message(panic.as_ref());
                tracing::error!(method = %self.target, panic = %detail, "method panicked");
                Outcome::Failed(self.application_error(detail))
            }
            Err(err) => {
                tracing::error!(method = %self.target, error = %err, "method task failed");
                Outcome::Failed(self.application_error(err.to_string()))
            }
        };

        if let (Some(id), Some((seq, _))) = (&self.invocation_id, &self.registration) {
            self.active.finish(id, *seq);
        }

        let result = match outcome {
            Outcome::Cancelled => {
                tracing::debug!(method = %self.target, "invocation cancelled");
                return;
            }
            Outcome::Completed(value) => Ok(value),
            Outcome::Failed(err) => Err(err),
        };

        let Some(invocation_id) = &self.invocation_id else {
            if let Err(err) = result {
                tracing::warn!(method = %self.target, error = %err, "fire-and-forget invocation failed");
            }
            return;
        };

        if let Err(err) = send_completion(&self.connection, invocation_id, result).await {
            tracing::debug!(
                invocation_id = %invocation_id,
                error = %err,
                "completion not delivered"
            );
        }
    }

    async fn await_result(&self, returned: MethodReturn) -> Outcome {
        let cancelled = self
            .registration
            .as_ref()
            .map(|(_, token)| token.clone())
            .unwrap_or_default();

        match returned {
            MethodReturn::Unit => Outcome::Completed(None),
            MethodReturn::Value(value) => Outcome::Completed(Some(value)),
            MethodReturn::Values(values) => Outcome::Completed(Some(Value::Array(values))),
            MethodReturn::Pending(receiver) => tokio::select! {
                biased;
                _ = cancelled.cancelled() => Outcome::Cancelled,
                received = receiver => match received {
                    Ok(value) => Outcome::Completed(Some(value)),
                    Err(_) => Outcome::Failed(InvocationError::NoResult(self.target.clone())),
                },
            },
            MethodReturn::Stream(mut items) => loop {
                let item = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => return Outcome::Cancelled,
                    item = items.recv() => item,
                };
                let Some(item) = item else {
                    return Outcome::Completed(None);
                };
                let Some(invocation_id) = &self.invocation_id else {
                    continue;
                };
                let sent = match RawPayload::from_value(&item) {
                    Ok(item) => self.connection.send_stream_item(invocation_id, item).await,
                    Err(err) => Err(HubError::Protocol(err.into())),
                };
                if let Err(err) = sent {
                    if err.is_fatal() {
                        return Outcome::Cancelled;
                    }
                    return Outcome::Failed(self.application_error(err.to_string()));
                }
            },
        }
    }

    fn application_error(&self, detail: String) -> InvocationError {
        InvocationError::Application {
            target: self.target.clone(),
            detail: if self.detailed_errors {
                detail
            } else {
                GENERIC_FAILURE.to_string()
            },
        }
    }
}

async fn send_completion(
    connection: &HubConnection,
    invocation_id: &str,
    result: std::result::Result<Option<Value>, InvocationError>,
) -> Result<()> {
    match result {
        Ok(value) => {
            let payload = value
                .map(|value| RawPayload::from_value(&value))
                .transpose()
                .map_err(|err| HubError::Protocol(err.into()))?;
            connection
                .send_completion(invocation_id, payload, None)
                .await
        }
        Err(err) => {
            connection
                .send_completion(invocation_id, None, Some(err.to_string()))
                .await
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_text() {
        let payload: Box<dyn Any + Send> = Box::new("Don't panic!");
        assert_eq!(panic_message(payload.as_ref()), "Don't panic!");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42_u32);
        assert_eq!(panic_message(payload.as_ref()), "panic with non-string payload");
    }

    #[test]
    fn active_id_cannot_be_registered_twice() {
        let active = ActiveInvocations::default();
        let (_, token) = active.register("1").unwrap();
        assert!(active.register("1").is_none());

        assert!(active.cancel("1"));
        assert!(token.is_cancelled());
        assert!(!active.cancel("1"));
    }

    #[test]
    fn finish_only_removes_own_registration() {
        let active = ActiveInvocations::default();
        let (first, _) = active.register("1").unwrap();
        active.cancel("1");
        let (second, _) = active.register("1").unwrap();

        active.finish("1", first);
        assert_eq!(active.len(), 1);
        active.finish("1", second);
        assert_eq!(active.len(), 0);
    }

    #[test]
    fn cancel_all_cancels_every_token() {
        let active = ActiveInvocations::default();
        let (_, a) = active.register("a").unwrap();
        let (_, b) = active.register("b").unwrap();
        active.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(active.len(), 0);
    }
}
