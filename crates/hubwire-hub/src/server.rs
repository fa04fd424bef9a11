//! The per-connection receive loop.

use std::future::pending;
use std::sync::Arc;

use hubwire_protocol::HubMessage;
use hubwire_transport::ConnectionStream;
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use crate::config::HubConfig;
use crate::connection::HubConnection;
use crate::dispatcher::Dispatcher;
use crate::error::{HubError, InvocationError, Result};
use crate::registry::MethodRegistry;
use crate::streams::StreamMultiplexer;

/// Error text of the `Close` sent when a client stays silent too long.
pub const CLIENT_TIMEOUT_REASON: &str = "client timeout";

/// A method registry plus the settings every connection is served with.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<MethodRegistry>,
    config: HubConfig,
}

impl Hub {
    pub fn new(registry: MethodRegistry, config: HubConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            registry: Arc::new(registry),
            config,
        })
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Serve one accepted connection until it ends.
    pub async fn serve(&self, stream: ConnectionStream) -> Result<()> {
        let transport = stream.transport_name();
        let connection = Arc::new(HubConnection::from_stream(stream, &self.config));
        tracing::debug!(
            connection_id = %connection.connection_id(),
            transport,
            "serving connection"
        );
        serve_connection(connection, Arc::clone(&self.registry), &self.config).await
    }
}

/// Drive one connection: receive, route by message kind, keep alive, tear down.
///
/// Returns `Ok(())` when the client closes or ends the stream, or when the
/// client timeout fires. Returns the error when the transport fails. On every
/// exit all upstream channels are closed and all running invocations
/// cancelled.
pub async fn serve_connection(
    connection: Arc<HubConnection>,
    registry: Arc<MethodRegistry>,
    config: &HubConfig,
) -> Result<()> {
    let streams = Arc::new(StreamMultiplexer::new(config.upstream_buffer));
    let dispatcher = Dispatcher::new(
        Arc::clone(&connection),
        registry,
        Arc::clone(&streams),
        config,
    );

    connection.start();
    let result = receive_loop(&connection, &dispatcher, &streams, config).await;

    streams.close_all();
    dispatcher.cancel_all();
    match &result {
        Ok(()) => {
            connection.mark_closed(None);
        }
        Err(err) => {
            tracing::error!(connection_id = %connection.connection_id(), error = %err, "connection failed");
            connection.mark_closed(Some(err.to_string()));
        }
    }
    result
}

async fn receive_loop(
    connection: &HubConnection,
    dispatcher: &Dispatcher,
    streams: &StreamMultiplexer,
    config: &HubConfig,
) -> Result<()> {
    let mut keep_alive = config.keep_alive_interval.map(|period| {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut last_received = Instant::now();

    loop {
        let received = tokio::select! {
            received = connection.receive() => received,
            _ = tick(keep_alive.as_mut()) => {
                connection.send_ping().await?;
                continue;
            }
            _ = idle_deadline(config, last_received) => {
                tracing::warn!(connection_id = %connection.connection_id(), "client timed out");
                connection.close(Some(CLIENT_TIMEOUT_REASON)).await;
                return Ok(());
            }
        };

        let message = match received {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::debug!(connection_id = %connection.connection_id(), "client ended the stream");
                return Ok(());
            }
            Err(HubError::Decode(err)) => {
                last_received = Instant::now();
                match err.invocation_id.as_deref() {
                    Some(invocation_id) => {
                        dispatcher
                            .reject(
                                Some(invocation_id),
                                "",
                                InvocationError::Malformed(err.source.to_string()),
                            )
                            .await?;
                    }
                    None => {
                        tracing::warn!(
                            connection_id = %connection.connection_id(),
                            error = %err,
                            "dropping malformed frame"
                        );
                    }
                }
                continue;
            }
            Err(err) => return Err(err),
        };
        last_received = Instant::now();

        match message {
            HubMessage::Invocation(invocation) | HubMessage::StreamInvocation(invocation) => {
                dispatcher.dispatch(invocation).await?;
            }
            HubMessage::StreamItem(item) => {
                let stream_id = item.invocation_id.clone();
                if let Err(err) = streams.on_stream_item(item) {
                    tracing::warn!(stream_id = %stream_id, error = %err, "stream item rejected");
                }
            }
            HubMessage::Completion(completion) => {
                streams.on_stream_completion(&completion.invocation_id);
            }
            HubMessage::CancelInvocation(cancel) => {
                dispatcher.cancel(&cancel.invocation_id);
            }
            HubMessage::Ping => {
                tracing::trace!(connection_id = %connection.connection_id(), "ping received");
            }
            HubMessage::Close(close) => {
                tracing::debug!(
                    connection_id = %connection.connection_id(),
                    error = close.error.as_deref().unwrap_or(""),
                    "client closed the connection"
                );
                connection.mark_closed(close.error);
                return Ok(());
            }
            HubMessage::Other(envelope) => {
                tracing::debug!(
                    connection_id = %connection.connection_id(),
                    message_type = envelope.message_type,
                    "ignoring unknown message type"
                );
            }
        }
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn idle_deadline(config: &HubConfig, last_received: Instant) {
    match config.client_timeout {
        Some(timeout) => sleep_until(last_received + timeout).await,
        None => pending().await,
    }
}
