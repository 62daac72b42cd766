//! Error and retry-policy types for the trigger-binding domain.
//!
//! [`BindingError`] covers conditions that stop a single dispatch before the
//! user function runs. [`PropertyError`] is the per-field read failure that the
//! binding data extractor absorbs. [`TransportError`] is what the messaging
//! provider ports report; it carries a [`RetryPolicy`] so the listener can
//! decide between backing off and faulting.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ParameterName;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by transport errors to let the message pump decide whether to
/// re-issue a receive without faulting the listener.
///
/// - `Retryable` errors: receive timeouts, throttling, lost connections.
/// - `NonRetryable` errors: entity not found, unauthorized, closed receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Property read errors
// ---------------------------------------------------------------------------

/// A message property could not be read in the message's current state.
///
/// Never escalated: the binding data extractor omits the affected field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// The property is a broker-assigned system property and the message was
    /// constructed locally rather than received from an entity.
    #[error("Property '{property}' is only available on received messages")]
    NotReceived {
        /// Name of the property that was read.
        property: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Binding errors
// ---------------------------------------------------------------------------

/// Errors that fail a dispatch before the user function is invoked.
///
/// Surfaced to the host's failure-reporting path; never retried by the
/// binding itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// The trigger value is neither a message nor convertible to one.
    #[error("Unable to convert trigger value of kind '{value_kind}' to a message")]
    Conversion {
        /// Kind of the rejected trigger value (e.g. `"bytes"`).
        value_kind: &'static str,
    },

    /// The argument binding could not produce the function parameter from
    /// the message (e.g. body is not valid UTF-8 or not valid JSON).
    #[error("Unable to bind parameter '{parameter}': {reason}")]
    Argument {
        /// Parameter that failed to bind.
        parameter: ParameterName,
        /// Human-readable description of the failure.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

/// Errors reported by the messaging provider and receiver ports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The broker entity does not exist.
    #[error("Messaging entity '{entity_path}' was not found")]
    EntityNotFound {
        /// Path of the missing entity.
        entity_path: String,
    },

    /// The receiver has been closed and can no longer be used.
    #[error("Receiver for '{entity_path}' is closed")]
    Closed {
        /// Path of the entity the receiver was attached to.
        entity_path: String,
    },

    /// The lock on a message expired or the token is unknown.
    #[error("Lock '{lock_token}' is not held")]
    LockLost {
        /// The stale lock token.
        lock_token: String,
    },

    /// A transient communication failure; the operation may be retried.
    #[error("Transient transport failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Delay requested by the broker, if any.
        retry_after: Option<Duration>,
    },

    /// A permanent communication or authorization failure.
    #[error("Transport failure: {message}")]
    Fatal {
        /// Description of the failure.
        message: String,
    },
}

impl TransportError {
    /// Returns the retry policy for this error.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transient { retry_after, .. } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::LockLost { .. } => RetryPolicy::Retryable { after: None },
            Self::EntityNotFound { .. } | Self::Closed { .. } | Self::Fatal { .. } => {
                RetryPolicy::NonRetryable
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = TransportError::Transient {
            message: "timeout".into(),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(
            err.retry_policy(),
            RetryPolicy::Retryable {
                after: Some(Duration::from_secs(2))
            }
        );
    }

    #[test]
    fn test_missing_entity_is_not_retryable() {
        let err = TransportError::EntityNotFound {
            entity_path: "orders".into(),
        };
        assert_eq!(err.retry_policy(), RetryPolicy::NonRetryable);
    }
}
