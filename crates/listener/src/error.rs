//! Listener lifecycle errors.

use binding::{ListenerId, TransportError};
use thiserror::Error;

use crate::ListenerState;

/// Errors raised while creating, starting or stopping a listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The cancellation signal fired before the operation completed.
    #[error("Listener for '{entity_path}' was cancelled before it was ready")]
    Cancelled {
        /// Path of the entity the listener was being created for.
        entity_path: String,
    },

    /// The messaging provider failed to open the entity.
    #[error("Failed to open listener for '{entity_path}': {source}")]
    Transport {
        entity_path: String,
        #[source]
        source: TransportError,
    },

    /// The requested lifecycle transition is not valid from the current state.
    #[error("Listener {listener} cannot move from {from} to {to}")]
    InvalidState {
        listener: ListenerId,
        from: ListenerState,
        to: ListenerState,
    },
}
