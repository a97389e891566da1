use std::time::Duration;

/// Body sent with every `429 Too Many Requests` rejection.
pub const REJECTION_BODY: &str = "Rate limit was exceeded. Please try again later.";

/// Errors produced by the gate and the Tower Slide middleware stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// The request was rejected due to rate limiting.
    ///
    /// The duration indicates when the client should retry.
    /// When the `axum` feature is enabled, this converts to `429 Too Many Requests`
    /// with a `Retry-After` header.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: Duration,
    },

    /// The request was held back but exceeded the maximum allowed wait time.
    ///
    /// When the `axum` feature is enabled, this converts to `408 Request Timeout`.
    #[error("Request timed out waiting for rate limit capacity")]
    Timeout,

    /// An unexpected error occurred in the inner service.
    ///
    /// The string contains the `Display` representation of the inner error.
    /// When the `axum` feature is enabled, this converts to `500 Internal Server Error`.
    #[error("Internal service error: {0}")]
    Inner(String),
}

impl GateError {
    /// Whole seconds for a `Retry-After` header, rounded up and never zero.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => {
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                Some(secs.max(1))
            }
            _ => None,
        }
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for GateError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let retry_after = self.retry_after_secs();
        let (status, msg) = match self {
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, REJECTION_BODY.to_string()),
            Self::Timeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            Self::Inner(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let mut response = (status, msg).into_response();
        if let Some(secs) = retry_after {
            response.headers_mut().insert(
                axum::http::header::RETRY_AFTER,
                axum::http::HeaderValue::from(secs),
            );
        }
        response
    }
}
