//! Core pipeline for menupic
//!
//! This crate maps OCR text blocks from captured menu photos onto the
//! on-screen overlay, and turns a tap on that overlay into an identified
//! dish with a generated illustration.

pub mod camera;
pub mod capture_loop;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod ocr;
pub mod poll;
pub mod quota;
pub mod reconcile;
pub mod scene;
pub mod session;
pub mod tap;
pub mod types;

pub use capture_loop::{CaptureLoop, IdleProbe, SkipReason, TickOutcome};
pub use collaborators::{Camera, DishIdentifier, ImageGenerator, TextRecognizer};
pub use config::{CaptureConfig, PipelineConfig, SessionConfig};
pub use error::{CaptureError, ConfigError, ServiceError, SessionError};
pub use scene::{OverlayScene, SharedScene};
pub use session::{IdentificationMachine, IdentificationSession, Rejection, SessionOutcome, SessionState};
pub use types::*;
