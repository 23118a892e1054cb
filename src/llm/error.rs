//! Provider errors and the connection-only retry policy.
//!
//! A request is retried only when it never reached the server (refused,
//! reset, timed out). Anything the server answered, and any body we could
//! not parse, goes back to the caller on the first attempt.

use std::time::Duration;

/// What went wrong with a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// HTTP 429
    RateLimited,
    /// HTTP 5xx
    ServerError,
    /// Other HTTP 4xx: bad request, auth, unknown model
    ClientError,
    /// No response: connect failure, reset socket or timeout
    NetworkError,
    /// The request could not be built or sent for a non-connection reason
    RequestError,
    /// Response body did not match the vendor's schema
    ParseError,
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::RequestError => "Request error",
            LlmErrorKind::ParseError => "Parse error",
        };
        f.write_str(label)
    }
}

/// Map an unsuccessful HTTP status to its kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}

/// Error from a provider API call.
#[derive(Debug)]
pub struct LlmError {
    pub kind: LlmErrorKind,
    /// HTTP status, when the server answered
    pub status_code: Option<u16>,
    pub message: String,
}

impl LlmError {
    fn new(kind: LlmErrorKind, message: String) -> Self {
        Self {
            kind,
            status_code: None,
            message,
        }
    }

    /// The server answered with a non-success `status_code`.
    pub fn from_status(status_code: u16, body: &str) -> Self {
        Self {
            kind: classify_http_status(status_code),
            status_code: Some(status_code),
            message: body.to_string(),
        }
    }

    pub fn network_error(message: String) -> Self {
        Self::new(LlmErrorKind::NetworkError, message)
    }

    pub fn request_error(message: String) -> Self {
        Self::new(LlmErrorKind::RequestError, message)
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(LlmErrorKind::ParseError, message)
    }

    /// Classify a `reqwest` send failure.
    pub fn from_send(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::network_error(format!("Request timeout: {}", error))
        } else if error.is_connect() {
            Self::network_error(format!("Connection failed: {}", error))
        } else {
            Self::request_error(format!("Request failed: {}", error))
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        self.kind == LlmErrorKind::NetworkError
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for LlmError {}

/// Backoff for connection failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether `error` on attempt `attempt` (0-based) earns another try.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_connection_failure() && attempt < self.max_retries
    }

    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_http_status(429), LlmErrorKind::RateLimited);
        assert_eq!(classify_http_status(503), LlmErrorKind::ServerError);
        assert_eq!(classify_http_status(401), LlmErrorKind::ClientError);
        let err = LlmError::from_status(404, "no such model");
        assert_eq!(err.kind, LlmErrorKind::ClientError);
        assert_eq!(err.to_string(), "Client error (HTTP 404): no such model");
    }

    #[test]
    fn only_connection_failures_are_retried() {
        let config = RetryConfig::default();
        assert!(config.should_retry(&LlmError::network_error("refused".into()), 0));
        assert!(!config.should_retry(&LlmError::network_error("refused".into()), 3));
        assert!(!config.should_retry(&LlmError::from_status(429, "slow down"), 0));
        assert!(!config.should_retry(&LlmError::from_status(503, "busy"), 0));
        assert!(!config.should_retry(&LlmError::request_error("bad redirect".into()), 0));
        assert!(!config.should_retry(&LlmError::parse_error("garbage".into()), 0));
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
        assert_eq!(config.delay_for(10), Duration::from_secs(30));
    }
}
