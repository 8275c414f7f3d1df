use thiserror::Error;
use uuid::Uuid;

use crate::orchestrator::SessionState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The volume device could not be opened. Fatal for a listening session.
    #[error("Failed to open volume {volume}: {source}")]
    VolumeOpen {
        volume: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Session {id} is in state {state:?}, expected {expected:?}")]
    InvalidState {
        id: Uuid,
        state: SessionState,
        expected: SessionState,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
