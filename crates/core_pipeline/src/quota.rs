//! Quota / rate-limit classification for identification failures

use crate::error::{ServiceError, SessionError};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static QUOTA_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"quota|exceeded|429").expect("static regex"));

// `"retryDelay":"15s"`, `"retry-after":"15"`, `Retry-After: 15`
static RETRY_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r#"retrydelay"?\s*:\s*"?(\d+)s"#).expect("static regex"),
        Regex::new(r#"retry-after"?\s*:\s*"?(\d+)s?"#).expect("static regex"),
        Regex::new(r"retry-?after\s*[:=]\s*(\d+)").expect("static regex"),
    ]
});

/// A detected rate-limit signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSignal {
    /// Delay suggested by the service, if it sent one
    pub retry_after: Option<Duration>,
}

/// Look for a rate-limit signal in error text and an optional HTTP status.
pub fn detect_quota(text: &str, status: Option<u16>) -> Option<QuotaSignal> {
    let lowered = text.to_lowercase();
    if status != Some(429) && !QUOTA_PATTERN.is_match(&lowered) {
        return None;
    }

    let retry_after = RETRY_PATTERNS.iter().find_map(|pattern| {
        pattern
            .captures(&lowered)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(Duration::from_secs)
    });

    Some(QuotaSignal { retry_after })
}

/// Map an identification failure to exactly one session error kind.
pub fn classify_identification_error(error: &ServiceError, default_cooldown: Duration) -> SessionError {
    match detect_quota(&error.to_string(), error.status()) {
        Some(signal) => SessionError::QuotaExceeded {
            wait: signal.retry_after.unwrap_or(default_cooldown),
        },
        None => SessionError::IdentificationFailed(error.to_string()),
    }
}
