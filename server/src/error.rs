//! Error taxonomy for demo recording, retention and the directory protocol

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("Invalid filename: {0}")]
    InvalidName(String),

    #[error("Already recording")]
    AlreadyRecording,

    #[error("Must be in a level to record")]
    NotInGame,

    #[error("{0}")]
    NoQualifyingClient(String),

    #[error("No players left, stopping server side demo recording")]
    NoViewersRemaining,

    #[error("No {0} demo recording in progress")]
    NotRecording(&'static str),

    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Failed to encode demo message: {0}")]
    Encode(#[from] bincode::Error),
}

impl DemoError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        DemoError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type DemoResult<T> = Result<T, DemoError>;
