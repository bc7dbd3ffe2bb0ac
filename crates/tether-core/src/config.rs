//! Binding configuration.

use std::time::Duration;

/// Default time a request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Environment variable overriding the request timeout, in milliseconds.
pub const REQUEST_TIMEOUT_ENV: &str = "TETHER_REQUEST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingConfig {
    /// How long a request waits for a reply. `Duration::ZERO` disables the timeout.
    pub request_timeout: Duration,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl BindingConfig {
    /// Defaults, with the request timeout taken from `TETHER_REQUEST_TIMEOUT_MS` when set.
    pub fn from_env() -> Self {
        let raw = std::env::var(REQUEST_TIMEOUT_ENV).ok();
        Self {
            request_timeout: request_timeout_from(raw.as_deref()),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

fn request_timeout_from(raw: Option<&str>) -> Duration {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_parsing() {
        assert_eq!(request_timeout_from(None), DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(request_timeout_from(Some("250")), Duration::from_millis(250));
        assert_eq!(request_timeout_from(Some("0")), Duration::ZERO);
        assert_eq!(request_timeout_from(Some("soon")), DEFAULT_REQUEST_TIMEOUT);
    }
}
