use std::time::Duration;

use hubwire_frame::DEFAULT_MAX_PAYLOAD;

use crate::error::{HubError, Result};

/// Default interval between server keep-alive pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Default time without any inbound frame before the server gives up.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of each upstream channel, in items.
pub const DEFAULT_UPSTREAM_BUFFER: usize = 16;

/// Per-connection hub behavior.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Maximum size of one inbound or outbound frame, in bytes.
    pub max_message_size: usize,
    /// Ping interval. `None` disables keep-alive pings.
    pub keep_alive_interval: Option<Duration>,
    /// Close the connection when nothing arrives for this long. `None` waits forever.
    pub client_timeout: Option<Duration>,
    /// Capacity of the channel a streaming parameter reads from. Items beyond
    /// it wait in a per-stream queue; the receive loop never blocks on them.
    pub upstream_buffer: usize,
    /// Send application error details to clients instead of a generic message.
    pub detailed_errors: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_PAYLOAD,
            keep_alive_interval: Some(DEFAULT_KEEP_ALIVE_INTERVAL),
            client_timeout: Some(DEFAULT_CLIENT_TIMEOUT),
            upstream_buffer: DEFAULT_UPSTREAM_BUFFER,
            detailed_errors: false,
        }
    }
}

impl HubConfig {
    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_client_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn with_upstream_buffer(mut self, items: usize) -> Self {
        self.upstream_buffer = items;
        self
    }

    pub fn with_detailed_errors(mut self, detailed: bool) -> Self {
        self.detailed_errors = detailed;
        self
    }

    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(HubError::InvalidConfig(
                "max_message_size must be greater than zero".to_string(),
            ));
        }
        if self.upstream_buffer == 0 {
            return Err(HubError::InvalidConfig(
                "upstream_buffer must be at least one item".to_string(),
            ));
        }
        if self.keep_alive_interval.is_some_and(|d| d.is_zero()) {
            return Err(HubError::InvalidConfig(
                "keep_alive_interval must be non-zero (use None to disable)".to_string(),
            ));
        }
        if self.client_timeout.is_some_and(|d| d.is_zero()) {
            return Err(HubError::InvalidConfig(
                "client_timeout must be non-zero (use None to disable)".to_string(),
            ));
        }
        Ok(())
    }
}
