//! Pipeline configuration
//!
//! Defaults hold the reference timings; `from_env` overrides them.

use crate::error::ConfigError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Shortest capture interval accepted by [`CaptureConfig::validate`]
pub const MIN_CAPTURE_INTERVAL: Duration = Duration::from_millis(300);

/// Capture loop configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Delay between the end of one tick and the start of the next
    pub interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
        }
    }
}

impl CaptureConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(ms) = env_u64("MENUPIC_CAPTURE_INTERVAL_MS")? {
            config.interval = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval < MIN_CAPTURE_INTERVAL {
            return Err(ConfigError::CaptureIntervalTooShort {
                min_ms: MIN_CAPTURE_INTERVAL.as_millis() as u64,
                got_ms: self.interval.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// Identification session configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Poll calls made before giving up on an image
    pub max_poll_attempts: u32,
    /// Sleep between poll attempts
    pub poll_delay: Duration,
    /// Timeout applied to each individual poll call
    pub poll_request_timeout: Duration,
    /// Cooldown applied when a quota error carries no retry delay
    pub default_quota_cooldown: Duration,
    /// Most text blocks sent to the identification service
    pub max_blocks: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_poll_attempts: 10,
            poll_delay: Duration::from_millis(2000),
            poll_request_timeout: Duration::from_secs(20),
            default_quota_cooldown: Duration::from_secs(30),
            max_blocks: 50,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(n) = env_number::<u32>("MENUPIC_MAX_POLL_ATTEMPTS")? {
            config.max_poll_attempts = n;
        }
        if let Some(ms) = env_u64("MENUPIC_POLL_DELAY_MS")? {
            config.poll_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("MENUPIC_POLL_TIMEOUT_SECS")? {
            config.poll_request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = env_u64("MENUPIC_QUOTA_COOLDOWN_SECS")? {
            config.default_quota_cooldown = Duration::from_secs(secs);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_poll_attempts == 0 {
            return Err(ConfigError::NoPollAttempts);
        }
        if self.max_blocks == 0 {
            return Err(ConfigError::NoBlockBudget);
        }
        Ok(())
    }
}

/// Main pipeline configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub session: SessionConfig,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            capture: CaptureConfig::from_env()?,
            session: SessionConfig::from_env()?,
        })
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    env_number(name)
}

fn env_number<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => parse_number(name, value).map(Some),
        Err(_) => Ok(None),
    }
}

/// Out-of-range values are rejected rather than wrapped
fn parse_number<T: FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::EnvVar {
        name: name.to_string(),
        value,
    })
}
