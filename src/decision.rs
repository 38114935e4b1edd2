//! Rate limit decisions and their response metadata.

use chrono::{DateTime, Utc};

/// The per-request verdict produced by the gate.
///
/// Derived fresh on every check and never persisted. The mounting
/// service surfaces it to callers, conventionally via [`headers`].
///
/// [`headers`]: RateLimitDecision::headers
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the guarded operation may proceed.
    pub allowed: bool,
    /// The configured budget for the window.
    pub limit: u32,
    /// Slots left in the current window after this request.
    pub remaining: u32,
    /// When the current window expires and the counter restarts.
    pub reset_at: DateTime<Utc>,
    /// Seconds the caller should wait before retrying. Set on denials only.
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    /// Render the decision as conventional rate limit response headers.
    ///
    /// Allowed decisions produce the `X-RateLimit-*` triple; denials add
    /// `Retry-After`.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at.timestamp().to_string()),
        ];

        if let Some(secs) = self.retry_after {
            headers.push(("Retry-After", secs.to_string()));
        }

        headers
    }
}

/// How the guarded operation turned out, reported back through
/// [`RateLimiter::settle`](crate::gate::RateLimiter::settle).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The downstream operation succeeded (conventionally HTTP 2xx).
    Success,
    /// The downstream operation failed.
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_allowed_decision_headers() {
        let decision = RateLimitDecision {
            allowed: true,
            limit: 10,
            remaining: 7,
            reset_at: Utc::now() + Duration::seconds(30),
            retry_after: None,
        };

        let headers = decision.headers();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], ("X-RateLimit-Limit", "10".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "7".to_string()));
        assert_eq!(headers[2].0, "X-RateLimit-Reset");
    }

    #[test]
    fn test_denied_decision_includes_retry_after() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: Utc::now() + Duration::seconds(42),
            retry_after: Some(42),
        };

        let headers = decision.headers();
        assert_eq!(headers.len(), 4);
        assert_eq!(headers[3], ("Retry-After", "42".to_string()));
    }
}
