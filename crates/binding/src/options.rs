//! Account and entity tuning configuration.
//!
//! These structs are consumed as opaque configuration by the listener; the
//! binding never reinterprets them. All fields have defaults so a partially
//! specified configuration file deserializes cleanly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Connection settings for a broker namespace.
///
/// Credentials are resolved by the messaging provider from the connection
/// name; they never pass through the binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBusAccount {
    /// Name of the connection setting the provider resolves credentials from.
    pub connection_name: String,
    /// Fully-qualified namespace, e.g. `"contoso.servicebus.windows.net"`.
    #[serde(default)]
    pub namespace: Option<String>,
}

impl ServiceBusAccount {
    /// Creates an account bound to a named connection.
    pub fn new(connection_name: impl Into<String>) -> Self {
        Self {
            connection_name: connection_name.into(),
            namespace: None,
        }
    }
}

impl Default for ServiceBusAccount {
    fn default() -> Self {
        Self::new("ServiceBus")
    }
}

/// How messages are taken off an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// Messages are locked on receive and must be settled.
    #[default]
    PeekLock,
    /// Messages are deleted on receive; no lock token is issued.
    ReceiveAndDelete,
}

/// What happens to in-flight invocations when a listener stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrainPolicy {
    /// Wait for in-flight invocations up to the drain timeout, then cancel
    /// and abandon whatever is left.
    #[default]
    Complete,
    /// Cancel in-flight invocations immediately and abandon their messages.
    Abandon,
}

/// Per-listener message handling settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageHandlerOptions {
    /// Maximum number of concurrent invocations per listener.
    pub max_concurrent_calls: usize,
    /// Complete the message automatically when the function succeeds.
    pub auto_complete: bool,
    /// How long a single receive call waits for messages, in milliseconds.
    pub receive_wait_ms: u64,
}

impl Default for MessageHandlerOptions {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 16,
            auto_complete: true,
            receive_wait_ms: 5_000,
        }
    }
}

/// Listener shutdown settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrainOptions {
    pub policy: DrainPolicy,
    /// Upper bound on waiting for in-flight invocations, in seconds.
    pub timeout_secs: u64,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            policy: DrainPolicy::Complete,
            timeout_secs: 30,
        }
    }
}

/// Entity-specific tuning shared by every trigger on an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceBusOptions {
    /// Number of messages the receiver may buffer ahead of the pump.
    /// Zero disables prefetching.
    pub prefetch_count: u32,
    pub receive_mode: ReceiveMode,
    pub message_handler: MessageHandlerOptions,
    pub drain: DrainOptions,
}

impl ServiceBusOptions {
    /// Maximum concurrent invocations, never less than one.
    pub fn max_concurrent_calls(&self) -> usize {
        self.message_handler.max_concurrent_calls.max(1)
    }

    /// Largest batch a single receive call may request given `free_slots`
    /// available concurrency slots.
    ///
    /// Bounded by the prefetch count when prefetching is enabled.
    pub fn receive_batch_size(&self, free_slots: usize) -> usize {
        let free = free_slots.max(1);
        match self.prefetch_count {
            0 => free,
            prefetch => free.min(prefetch as usize),
        }
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.message_handler.receive_wait_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: ServiceBusOptions =
            serde_json::from_value(serde_json::json!({ "prefetch_count": 4 })).unwrap();
        assert_eq!(options.prefetch_count, 4);
        assert!(options.message_handler.auto_complete);
        assert_eq!(options.receive_mode, ReceiveMode::PeekLock);
        assert_eq!(options.drain.policy, DrainPolicy::Complete);
    }

    #[test]
    fn test_batch_size_respects_prefetch_and_free_slots() {
        let mut options = ServiceBusOptions::default();
        assert_eq!(options.receive_batch_size(8), 8);
        assert_eq!(options.receive_batch_size(0), 1);

        options.prefetch_count = 3;
        assert_eq!(options.receive_batch_size(8), 3);
        assert_eq!(options.receive_batch_size(2), 2);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let mut options = ServiceBusOptions::default();
        options.message_handler.max_concurrent_calls = 0;
        assert_eq!(options.max_concurrent_calls(), 1);
    }
}
