// src/error.rs
//! Error taxonomy shared by every phase and adapter.
//!
//! Adapters translate transport failures into these variants; phases decide
//! from the variant whether to retry, defer, absorb or abort.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// Connection reset, timeout, 5xx. Retried with backoff.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Provider throttling (HTTP 429 or quota message).
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Rejected credentials. Never retried.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Malformed row or payload.
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Archive append succeeded but the active-ledger delete did not.
    #[error("partial commit: {0}")]
    PartialCommit(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Any other non-retryable provider response.
    #[error("provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Whether the retry policy may try the same call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::RateLimited { .. })
    }

    /// Errors that end the run when they surface from Collecting.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AuthFailure(_) | Self::Config(_))
    }

    /// Short label used in logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthFailure(_) => "auth_failure",
            Self::DataIntegrity(_) => "data_integrity",
            Self::PartialCommit(_) => "partial_commit",
            Self::Config(_) => "config",
            Self::Provider(_) => "provider",
        }
    }

    /// Map a non-success HTTP status to the taxonomy.
    pub fn from_status(
        status: reqwest::StatusCode,
        retry_after: Option<Duration>,
        body: &str,
    ) -> Self {
        let snippet: String = body.chars().take(200).collect();
        let msg = format!("HTTP {status}: {snippet}");
        match status.as_u16() {
            401 | 403 => Self::AuthFailure(msg),
            429 => Self::RateLimited {
                message: msg,
                retry_after,
            },
            408 | 500..=599 => Self::TransientNetwork(msg),
            _ => Self::Provider(msg),
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::DataIntegrity(format!("undecodable response: {e}"));
        }
        if let Some(status) = e.status() {
            return Self::from_status(status, None, "");
        }
        // timeouts, connect and request-building failures all look like a dead link
        Self::TransientNetwork(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for PipelineError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::TransientNetwork("call timed out".to_string())
    }
}

/// Read a `Retry-After` header given in seconds. Values that do not fit a
/// `Duration` (negative, NaN, absurdly large) are ignored.
pub fn retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Turn a finished response into `Ok(response)` or a classified error.
pub async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = retry_after_header(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    Err(PipelineError::from_status(status, retry_after, &body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert!(matches!(
            PipelineError::from_status(StatusCode::UNAUTHORIZED, None, ""),
            PipelineError::AuthFailure(_)
        ));
        assert!(matches!(
            PipelineError::from_status(StatusCode::FORBIDDEN, None, ""),
            PipelineError::AuthFailure(_)
        ));
        let limited = PipelineError::from_status(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(3)),
            "slow down",
        );
        assert_eq!(limited.kind(), "rate_limited");
        assert!(limited.is_retryable());
        assert!(PipelineError::from_status(StatusCode::BAD_GATEWAY, None, "").is_retryable());
        assert!(!PipelineError::from_status(StatusCode::BAD_REQUEST, None, "").is_retryable());
    }

    fn retry_after(value: &str) -> Option<Duration> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::RETRY_AFTER,
            reqwest::header::HeaderValue::from_str(value).unwrap(),
        );
        retry_after_header(&headers)
    }

    #[test]
    fn retry_after_parses_seconds_and_ignores_garbage() {
        assert_eq!(retry_after("3"), Some(Duration::from_secs(3)));
        assert_eq!(retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
        assert_eq!(retry_after("1e30"), None);
        assert_eq!(retry_after("-1"), None);
        assert_eq!(retry_after("NaN"), None);
        assert_eq!(retry_after("inf"), None);
        assert_eq!(retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(retry_after_header(&reqwest::header::HeaderMap::new()), None);
    }

    #[test]
    fn only_auth_and_config_are_fatal() {
        assert!(PipelineError::AuthFailure("x".into()).is_fatal());
        assert!(PipelineError::Config("x".into()).is_fatal());
        assert!(!PipelineError::TransientNetwork("x".into()).is_fatal());
        assert!(!PipelineError::rate_limited("x").is_fatal());
    }
}
