//! Job host errors.

use std::path::PathBuf;

use binding::TransportError;
use listener::ListenerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Function '{function}' is misconfigured: {reason}")]
    InvalidFunction { function: String, reason: String },

    #[error("Function '{name}' is declared more than once")]
    DuplicateFunction { name: String },

    #[error("Messaging entity setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Listener for function '{function}' failed: {source}")]
    Listener {
        function: String,
        #[source]
        source: ListenerError,
    },

    #[error("Failed to read seed file '{}': {source}", path.display())]
    SeedFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Seed file '{}' line {line}: {reason}", path.display())]
    SeedMessage {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
