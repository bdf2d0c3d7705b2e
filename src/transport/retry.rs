//! Retry policy and the dispatching layer that applies it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ApiRequest, CallOptions, Transport};
use crate::error::{Error, Result};
use crate::schema::responses::{api_error, decode_envelope, ApiEnvelope};

/// Bounded exponential backoff.
///
/// The delay before retry `n` (1-based) is `base_delay * 2^(n-1)`, capped at
/// `max_delay`. A retry is skipped when it would push the accumulated wait
/// past `max_total_wait`.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use kling::transport::RetryPolicy;
///
/// let policy = RetryPolicy::default();
/// assert_eq!(policy.delay_for(1), Duration::from_secs(1));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(4));
/// assert_eq!(policy.delay_for(8), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Upper bound for the sum of all delays of one call.
    pub max_total_wait: Duration,
    /// Retry calls that are not idempotent (creates).
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_total_wait: Duration::from_secs(30),
            retry_non_idempotent: false,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn budget(&self, request: &ApiRequest, options: &CallOptions) -> u32 {
        let allow = request.is_idempotent()
            || options
                .retry_non_idempotent
                .unwrap_or(self.retry_non_idempotent);
        if allow {
            options.max_retries.unwrap_or(self.max_retries)
        } else {
            0
        }
    }
}

/// Bookkeeping for one dispatched call.
#[derive(Debug, Default)]
pub(crate) struct RetryContext {
    attempts: u32,
    total_wait: Duration,
}

impl RetryContext {
    /// Delay before the next attempt, or `None` if `error` is final.
    fn next_delay(&self, policy: &RetryPolicy, budget: u32, error: &Error) -> Option<Duration> {
        if !error.is_retryable() || self.attempts > budget {
            return None;
        }
        let delay = policy.delay_for(self.attempts);
        if self.total_wait + delay > policy.max_total_wait {
            return None;
        }
        Some(delay)
    }
}

/// Performs backoff waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspends for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Adds credentials to requests, sends them with retries, and decodes the
/// response envelope.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
    api_key: String,
    timeout: Duration,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    pub fn new(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            sleeper,
            policy,
            api_key: api_key.into(),
            timeout,
        }
    }

    /// Retry policy in effect.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Sleeper used for backoff and polling waits.
    pub fn sleeper(&self) -> &Arc<dyn Sleeper> {
        &self.sleeper
    }

    /// Sends `request` and returns the decoded success envelope.
    ///
    /// Connection failures, timeouts and 5xx responses are retried within
    /// the policy budget. 4xx responses and envelope errors are returned
    /// immediately as [`Error::Api`].
    pub async fn execute(&self, mut request: ApiRequest, options: &CallOptions) -> Result<ApiEnvelope> {
        request.add_header("Authorization", format!("Bearer {}", self.api_key));
        request.add_header("Content-Type", "application/json");
        request.add_header("Accept", "application/json");
        if request.timeout.is_none() {
            request.timeout = Some(options.timeout.unwrap_or(self.timeout));
        }

        let budget = self.policy.budget(&request, options);
        let mut ctx = RetryContext::default();
        loop {
            ctx.attempts += 1;
            debug!(
                method = %request.method,
                path = %request.path,
                attempt = ctx.attempts,
                "sending request"
            );

            let error = match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    return decode_envelope(response.status, &response.body);
                },
                Ok(response) => api_error(response.status, &response.body),
                Err(failure) => Error::Transport {
                    kind: failure.kind,
                    message: failure.message,
                    attempts: ctx.attempts,
                },
            };

            let Some(delay) = ctx.next_delay(&self.policy, budget, &error) else {
                if error.is_retryable() {
                    warn!(
                        path = %request.path,
                        attempts = ctx.attempts,
                        waited_ms = ctx.total_wait.as_millis() as u64,
                        error = %error,
                        "giving up on request"
                    );
                }
                return Err(error);
            };

            warn!(
                path = %request.path,
                attempt = ctx.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "request failed, retrying"
            );
            ctx.total_wait += delay;
            self.sleeper.sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportErrorKind;
    use serde_json::json;

    fn server_error() -> Error {
        Error::Api {
            status: 503,
            code: None,
            message: "unavailable".to_string(),
            request_id: None,
        }
    }

    #[test]
    fn delays_double_and_cap() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay_for(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
        assert_eq!(policy.delay_for(200), Duration::from_secs(10));
    }

    #[test]
    fn creates_do_not_retry_by_default() {
        let policy = RetryPolicy::default();
        let create = ApiRequest::post("/v1/videos/text2video", json!({}));
        let get = ApiRequest::get("/v1/videos/text2video/t");

        assert_eq!(policy.budget(&create, &CallOptions::default()), 0);
        assert_eq!(policy.budget(&get, &CallOptions::default()), 3);
        assert_eq!(
            policy.budget(&create, &CallOptions::default().retry_non_idempotent(true)),
            3
        );
        assert_eq!(policy.budget(&get, &CallOptions::default().max_retries(1)), 1);
    }

    #[test]
    fn next_delay_respects_budget_and_total_wait() {
        let policy = RetryPolicy {
            max_total_wait: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        let mut ctx = RetryContext {
            attempts: 1,
            ..RetryContext::default()
        };
        assert_eq!(
            ctx.next_delay(&policy, 3, &server_error()),
            Some(Duration::from_secs(1))
        );

        ctx.attempts = 3;
        ctx.total_wait = Duration::from_secs(3);
        // 3s waited + 4s would exceed the 5s cap.
        assert_eq!(ctx.next_delay(&policy, 3, &server_error()), None);

        ctx.attempts = 4;
        ctx.total_wait = Duration::ZERO;
        assert_eq!(ctx.next_delay(&policy, 3, &server_error()), None);
    }

    #[test]
    fn final_errors_are_not_delayed() {
        let ctx = RetryContext {
            attempts: 1,
            ..RetryContext::default()
        };
        let policy = RetryPolicy::default();
        let not_found = Error::Api {
            status: 404,
            code: None,
            message: "missing".to_string(),
            request_id: None,
        };
        assert_eq!(ctx.next_delay(&policy, 3, &not_found), None);

        let builder = Error::Transport {
            kind: TransportErrorKind::Builder,
            message: "bad header".to_string(),
            attempts: 1,
        };
        assert_eq!(ctx.next_delay(&policy, 3, &builder), None);
    }
}
