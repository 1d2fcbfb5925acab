//! Error types for the scanning pipeline
//!
//! Capture errors never leave the capture loop. Service errors are
//! classified exactly once, at the point of catch, into a [`SessionError`].

use std::time::Duration;
use thiserror::Error;

/// Camera or OCR failure inside one capture tick
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera capture failed: {0}")]
    Camera(String),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("image decoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a remote collaborator
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Terminal failure of one identification session
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("identification failed: {0}")]
    IdentificationFailed(String),

    #[error("API quota exceeded, retry in {}s", .wait.as_secs())]
    QuotaExceeded { wait: Duration },

    #[error("image generation failed: {0}")]
    ImageGenerationFailed(String),

    #[error("image not ready after {attempts} polling attempts")]
    PollTimeout {
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("cancelled")]
    Cancelled,
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("capture interval must be at least {min_ms}ms, got {got_ms}ms")]
    CaptureIntervalTooShort { min_ms: u64, got_ms: u64 },

    #[error("max poll attempts must be > 0")]
    NoPollAttempts,

    #[error("max blocks must be > 0")]
    NoBlockBudget,

    #[error("environment variable {name} is invalid: {value}")]
    EnvVar { name: String, value: String },
}

pub type CaptureResult<T> = Result<T, CaptureError>;
pub type ServiceResult<T> = Result<T, ServiceError>;
