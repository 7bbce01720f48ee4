//! Explicit outcome values for a single delivery attempt.
//!
//! The executor folds every transport error, timeout, and HTTP status into
//! one of these variants; nothing on the delivery path propagates as an
//! error past the executor boundary.

/// Result of one HTTP delivery attempt.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    /// HTTP status in [200, 300).
    Success {
        status_code: i32,
        response_body: String,
        response_time_ms: i32,
    },
    /// Any other status, a timeout, or a connection failure. Counted
    /// against the retry budget; all failures retry uniformly.
    RetryableFailure {
        error_message: String,
        status_code: Option<i32>,
        response_body: Option<String>,
        response_time_ms: Option<i32>,
    },
}

impl AttemptOutcome {
    /// True for a 2xx outcome.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Classify an HTTP response.
    #[must_use]
    pub fn from_response(status_code: i32, body: String, response_time_ms: i32) -> Self {
        if (200..300).contains(&status_code) {
            Self::Success {
                status_code,
                response_body: body,
                response_time_ms,
            }
        } else {
            Self::RetryableFailure {
                error_message: format!("HTTP {status_code}"),
                status_code: Some(status_code),
                response_body: Some(body),
                response_time_ms: Some(response_time_ms),
            }
        }
    }
}
