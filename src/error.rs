use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The capture device or file could not be opened or configured.
    #[error("capture unavailable: {reason}")]
    CaptureUnavailable { reason: String },

    #[error("failed to load artifact {}: {source}", .path.display())]
    Artifact {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The artifacts parsed but disagree with the training schema.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn capture(reason: impl std::fmt::Display) -> Self {
        Error::CaptureUnavailable {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn artifact(
        path: impl Into<PathBuf>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Artifact {
            path: path.into(),
            source: Box::new(source),
        }
    }
}
