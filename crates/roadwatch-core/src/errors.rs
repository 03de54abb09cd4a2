/// Errors raised by the vision collaborators (frame decoding, detection,
/// encoding). Every variant is terminal for the session that hit it.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("failed to open video {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("image encode failed: {0}")]
    Encode(String),
    #[error("failed to load model: {0}")]
    ModelLoad(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl VisionError {
    pub fn open(path: &std::path::Path, reason: impl std::fmt::Display) -> Self {
        Self::Open {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Open { .. } => "open",
            Self::Decode(_) => "decode",
            Self::Inference(_) => "inference",
            Self::Encode(_) => "encode",
            Self::ModelLoad(_) => "model_load",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

/// Reasons a client's first WebSocket message is rejected.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum StartMessageError {
    #[error("start message is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("start message is missing `session_id`")]
    MissingSessionId,
    #[error("start message is missing `path`")]
    MissingPath,
}
