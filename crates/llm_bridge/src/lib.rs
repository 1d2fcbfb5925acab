//! Service bridge for menupic
//!
//! HTTP clients for the remote collaborators of the identification
//! session: Gemini for grouping OCR fragments into a dish, Black Forest
//! Labs FLUX for the dish illustration, and a client for the key-holding
//! proxy server that fronts both.
//!
//! Copyright (c) 2025 Michael A Wright

mod http;

pub mod flux;
pub mod gemini;
pub mod prompt;
pub mod proxy;

pub use flux::{FluxClient, FluxConfig, FluxRequest};
pub use gemini::{GeminiClient, GeminiConfig};
pub use proxy::{ProxyClient, ProxyConfig};
