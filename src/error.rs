//! Error types for the scanning pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for scanning operations.
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while sampling, reading or reporting on a video.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Cannot open video source {path:?}: {reason}")]
    UnreadableSource { path: PathBuf, reason: String },

    #[error("Video reports an unusable frame rate: {0}")]
    UnknownRate(String),

    #[error("Failed to decode video stream: {0}")]
    Decode(String),

    #[error("Text extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Failed to initialize OCR engine: {0}")]
    OcrInit(String),

    #[error("Failed to start OCR worker pool: {0}")]
    WorkerPool(String),

    #[error("Invalid scan configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ScanError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::UnreadableSource {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn decode(message: impl ToString) -> Self {
        Self::Decode(message.to_string())
    }

    pub fn extraction(message: impl ToString) -> Self {
        Self::ExtractionFailure(message.to_string())
    }

    /// Short name of the pipeline stage that produced this error.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::UnreadableSource { .. } => "open",
            Self::UnknownRate(_) => "rate",
            Self::Decode(_) => "decode",
            Self::ExtractionFailure(_) => "extract",
            Self::OcrInit(_) => "ocr-init",
            Self::WorkerPool(_) => "workers",
            Self::InvalidConfig(_) => "config",
            Self::Io(_) | Self::Json(_) => "output",
        }
    }

    /// True when the failure points at the input file itself (bad file or metadata).
    pub fn is_source_error(&self) -> bool {
        matches!(self, Self::UnreadableSource { .. } | Self::UnknownRate(_))
    }
}
