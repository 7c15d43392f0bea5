//! Error types for the cover downloader.
//!
//! Structural absence in the host tree is never an error here; the attachment
//! engine reports it as an `Evaluation` outcome instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The user dismissed a save prompt. Callers swallow this one.
    #[error("Save cancelled by user")]
    Cancelled,

    #[error("No artwork available for the current track")]
    NoArtwork,

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot unusable: {0}")]
    Snapshot(String),
}

impl CoverError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CoverError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoverError::Cancelled)
    }
}

pub type Result<T, E = CoverError> = std::result::Result<T, E>;
