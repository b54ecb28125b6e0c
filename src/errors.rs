use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    #[error("inference request failed: {0}")]
    Transport(String),

    #[error("inference service is rate limiting requests")]
    RateLimited,

    #[error("no images found for prompt '{0}'")]
    NoImages(String),

    #[error("artifact I/O failed for {path:?}: {source}")]
    ArtifactIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed trigger record: {0}")]
    TriggerMalformed(String),

    #[error("video not found: {0:?}")]
    VideoNotFound(PathBuf),

    #[error("cannot open video stream {path:?}: {reason}")]
    VideoStream { path: PathBuf, reason: String },

    #[error("video encoder failed: {0}")]
    Encoder(String),

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Other(String),
}

impl PipelineError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn artifact_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactIo {
            path: path.into(),
            source,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(value.to_string())
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
