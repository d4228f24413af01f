use serde::{Deserialize, Serialize};

// ============================================================================
// Error Kinds (stable codes for the host adapter)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidArgument,
    ModelLoadFailure,
    InferenceFailure,
    UnsupportedFormat,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::ModelLoadFailure => "MODEL_LOAD_FAILURE",
            Self::InferenceFailure => "INFERENCE_FAILURE",
            Self::UnsupportedFormat => "UNSUPPORTED_FORMAT",
        }
    }

    /// Whether the cached model is dropped when this kind of error occurs.
    ///
    /// Inference failures are call-scoped: the model may still be valid.
    #[must_use]
    pub const fn invalidates_model(self) -> bool {
        matches!(self, Self::ModelLoadFailure)
    }
}

// ============================================================================
// DetectError
// ============================================================================

#[derive(thiserror::Error, Debug)]
pub enum DetectError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to load {format} model from {path}: {reason}")]
    ModelLoad {
        path: String,
        format: String,
        reason: String,
    },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("unsupported model format {0:?}, expected \"onnx\" or \"tflite\"")]
    UnsupportedFormat(String),
}

impl DetectError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        DetectError::InvalidArgument(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        DetectError::Inference(msg.into())
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::ModelLoad { .. } => ErrorKind::ModelLoadFailure,
            Self::Inference(_) => ErrorKind::InferenceFailure,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;
