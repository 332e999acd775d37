use crate::NetError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("Network error: {0}")]
    Network(NetError),

    #[error("Render process crashed")]
    RendererCrash,

    #[error("Renderer timed out after {0:?}")]
    RendererTimeout(Duration),

    #[error("Unhandled engine event: {0}")]
    UnhandledEvent(String),

    #[error("Content extraction failed: {0}")]
    Extraction(String),

    #[error("Image capture failed: {0}")]
    Capture(String),

    #[error("Engine pool is empty while the queue is not saturated")]
    PoolExhausted,

    #[error("Engine pool is shutting down")]
    ShuttingDown,

    #[error("Engine launch failed: {0}")]
    EngineLaunch(String),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Task queue is closed")]
    QueueClosed,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl RenderError {
    /// Stable machine-readable code, used in logs, metrics labels and the
    /// JSON error body.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Network(_) => "NETWORK_ERROR",
            RenderError::RendererCrash => "RENDERER_CRASH",
            RenderError::RendererTimeout(_) => "RENDERER_TIMEOUT",
            RenderError::UnhandledEvent(_) => "UNHANDLED_EVENT",
            RenderError::Extraction(_) => "EXTRACTION_ERROR",
            RenderError::Capture(_) => "CAPTURE_ERROR",
            RenderError::PoolExhausted => "POOL_EXHAUSTED",
            RenderError::ShuttingDown => "SHUTTING_DOWN",
            RenderError::EngineLaunch(_) => "ENGINE_LAUNCH_FAILED",
            RenderError::Engine(_) => "ENGINE_ERROR",
            RenderError::InvalidJob(_) => "INVALID_JOB",
            RenderError::QueueClosed => "QUEUE_CLOSED",
            RenderError::Internal(_) => "INTERNAL_ERROR",
            RenderError::Configuration(_) => "CONFIGURATION_ERROR",
            RenderError::IoError(_) => "IO_ERROR",
            RenderError::SerializationError(_) => "SERIALIZATION_ERROR",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RenderError::InvalidJob(_) => ErrorSeverity::Low,
            RenderError::Network(_) => ErrorSeverity::Low,
            RenderError::RendererTimeout(_) => ErrorSeverity::Medium,
            RenderError::RendererCrash => ErrorSeverity::High,
            RenderError::EngineLaunch(_) => ErrorSeverity::High,
            RenderError::Configuration(_) => ErrorSeverity::High,
            RenderError::PoolExhausted => ErrorSeverity::Critical,
            _ => ErrorSeverity::Medium,
        }
    }

    /// HTTP status the request layer answers with for this failure
    pub fn http_status(&self) -> u16 {
        match self {
            RenderError::InvalidJob(_) => 400,
            RenderError::Network(_) | RenderError::RendererCrash => 502,
            RenderError::QueueClosed | RenderError::ShuttingDown => 503,
            RenderError::RendererTimeout(_) => 524,
            _ => 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<NetError> for RenderError {
    fn from(err: NetError) -> Self {
        RenderError::Network(err)
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for RenderError {
    fn from(err: serde_json::Error) -> Self {
        RenderError::SerializationError(err.to_string())
    }
}

impl From<image::ImageError> for RenderError {
    fn from(err: image::ImageError) -> Self {
        RenderError::Capture(err.to_string())
    }
}
