//! Bounded retries for upstream calls.
//!
//! Each attempt is classified into a [`CallOutcome`] by the caller. Transient
//! failures back off exponentially with jitter, rate-limit outcomes sleep for
//! the upstream cooldown without spending an attempt, and a per-executor
//! circuit breaker stops calls to an upstream that keeps failing.

use crate::error::CoreError;
use crate::error_utils::ErrorExt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Calls allowed for transient failures, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Ceiling for a single backoff sleep.
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Up to this fraction of the backoff is added as random jitter.
    pub jitter_factor: f64,
    /// Consecutive failed operations that open the breaker. 0 disables it.
    pub failure_threshold: u32,
    /// How long an open breaker waits before letting a probe through.
    pub recovery_timeout_s: u64,
    /// Upstream cooldowns honored per operation before giving up.
    pub max_rate_limit_waits: u32,
    /// Longest single cooldown we agree to sleep.
    pub max_rate_limit_wait_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            failure_threshold: 5,
            recovery_timeout_s: 60,
            max_rate_limit_waits: 5,
            max_rate_limit_wait_ms: 900_000,
        }
    }
}

impl RetryConfig {
    /// Listing and token calls. Reddit's rate window is ten minutes, so
    /// cooldowns are allowed to run long.
    pub fn reddit() -> Self {
        Self {
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            jitter_factor: 0.2,
            failure_threshold: 3,
            recovery_timeout_s: 120,
            max_rate_limit_waits: 10,
            ..Self::default()
        }
    }

    /// One classification request.
    pub fn llm() -> Self {
        Self {
            max_delay_ms: 20_000,
            jitter_factor: 0.25,
            max_rate_limit_waits: 3,
            max_rate_limit_wait_ms: 120_000,
            ..Self::default()
        }
    }

    /// Sleep between failed pipeline cycles. Never gives up.
    pub fn cycle() -> Self {
        Self {
            max_attempts: u32::MAX,
            base_delay_ms: 5000,
            max_delay_ms: 300_000,
            jitter_factor: 0.2,
            failure_threshold: 0,
            recovery_timeout_s: 0,
            max_rate_limit_waits: 0,
            max_rate_limit_wait_ms: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    /// One probe call is allowed through.
    HalfOpen,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            state: CircuitBreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            threshold: config.failure_threshold,
            cooldown: Duration::from_secs(config.recovery_timeout_s),
        }
    }

    pub fn allow_request(&mut self) -> bool {
        let cooled_down = self
            .opened_at
            .is_some_and(|opened| opened.elapsed() >= self.cooldown);
        if self.state == CircuitBreakerState::Open && cooled_down {
            debug!("Circuit half-open, letting a probe through");
            self.state = CircuitBreakerState::HalfOpen;
        }
        self.state != CircuitBreakerState::Open
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitBreakerState::Closed {
            info!("Probe succeeded, circuit closed");
        }
        self.state = CircuitBreakerState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trip = match self.state {
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Closed => {
                self.threshold > 0 && self.consecutive_failures >= self.threshold
            }
            CircuitBreakerState::Open => false,
        };
        if trip {
            warn!(failures = self.consecutive_failures, "Circuit opened");
            self.state = CircuitBreakerState::Open;
            self.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Exponential backoff.
    Retry,
    /// Wait the upstream-specified cooldown, then repeat.
    RetryWithDelay(Duration),
    NoRetry,
}

pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    error.retry_strategy()
}

/// Backoff before the retry following `attempt` (zero-based), with jitter,
/// capped at `max_delay_ms`.
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let exponent = attempt.min(32) as i32;
    let backoff_ms = (config.base_delay_ms as f64 * config.backoff_multiplier.powi(exponent))
        .min(config.max_delay_ms as f64);
    let jitter_ms = fastrand::u64(0..=(backoff_ms * config.jitter_factor) as u64);
    Duration::from_millis(backoff_ms as u64 + jitter_ms)
        .min(Duration::from_millis(config.max_delay_ms))
}

/// Outcome of a single upstream call, classified for the retry loop.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    RateLimited { retry_after: Duration, error: CoreError },
    Transient(CoreError),
    Permanent(CoreError),
}

impl<T> From<Result<T, CoreError>> for CallOutcome<T> {
    fn from(result: Result<T, CoreError>) -> Self {
        let error = match result {
            Ok(value) => return CallOutcome::Ok(value),
            Err(error) => error,
        };
        match error.retry_strategy() {
            RetryStrategy::Retry => CallOutcome::Transient(error),
            RetryStrategy::RetryWithDelay(retry_after) => {
                CallOutcome::RateLimited { retry_after, error }
            }
            RetryStrategy::NoRetry => CallOutcome::Permanent(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryFailureReason {
    /// Transient failures used up `max_attempts`.
    Exhausted,
    /// Upstream kept rate limiting past `max_rate_limit_waits`.
    RateLimitExhausted,
    Permanent,
    /// Rejected by the breaker without calling upstream.
    CircuitOpen,
}

/// Why a retried operation gave up, and what it last saw.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub reason: RetryFailureReason,
    pub error: CoreError,
}

/// Counters over the executor's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Extra calls made after a transient failure.
    pub retries: u64,
    /// Operations that succeeded only after retrying.
    pub recovered: u64,
    pub gave_up: u64,
    pub cooldowns: u64,
    pub rejected_by_breaker: u64,
}

#[derive(Debug)]
struct ExecutorState {
    breaker: CircuitBreaker,
    stats: RetryStats,
}

#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    state: Mutex<ExecutorState>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        let state = Mutex::new(ExecutorState {
            breaker: CircuitBreaker::new(&config),
            stats: RetryStats::default(),
        });
        Self { config, state }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub async fn stats(&self) -> RetryStats {
        self.state.lock().await.stats.clone()
    }

    pub async fn breaker_state(&self) -> CircuitBreakerState {
        self.state.lock().await.breaker.state()
    }

    /// Run `call` until it succeeds or the retry budget is spent.
    ///
    /// A rate-limited outcome repeats the same call after the cooldown and
    /// counts against `max_rate_limit_waits`, not `max_attempts`.
    pub async fn execute<F, Fut, T>(&self, operation: &str, call: F) -> Result<T, RetryFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = CallOutcome<T>>,
    {
        {
            let mut state = self.state.lock().await;
            if !state.breaker.allow_request() {
                state.stats.rejected_by_breaker += 1;
                warn!(operation, "Circuit open, call skipped");
                return Err(RetryFailure {
                    attempts: 0,
                    reason: RetryFailureReason::CircuitOpen,
                    error: CoreError::Internal {
                        message: format!("circuit breaker open for {operation}"),
                    },
                });
            }
        }

        let mut attempts = 0u32;
        let mut cooldowns = 0u32;

        let failure = loop {
            attempts += 1;
            let error = match call().await {
                CallOutcome::Ok(value) => {
                    let mut state = self.state.lock().await;
                    state.breaker.record_success();
                    if attempts > 1 {
                        state.stats.retries += u64::from(attempts - 1);
                        state.stats.recovered += 1;
                        info!(operation, attempts, "Recovered after retrying");
                    }
                    return Ok(value);
                }
                CallOutcome::Permanent(error) => {
                    break RetryFailure {
                        attempts,
                        reason: RetryFailureReason::Permanent,
                        error,
                    };
                }
                CallOutcome::RateLimited { retry_after, error } => {
                    attempts -= 1;
                    cooldowns += 1;
                    if cooldowns > self.config.max_rate_limit_waits {
                        break RetryFailure {
                            attempts,
                            reason: RetryFailureReason::RateLimitExhausted,
                            error,
                        };
                    }
                    let wait = retry_after.min(Duration::from_millis(self.config.max_rate_limit_wait_ms));
                    self.state.lock().await.stats.cooldowns += 1;
                    warn!(
                        operation,
                        wait_ms = wait.as_millis() as u64,
                        "Upstream cooldown, repeating the call"
                    );
                    sleep(wait).await;
                    continue;
                }
                CallOutcome::Transient(error) => error,
            };

            if attempts >= self.config.max_attempts {
                break RetryFailure {
                    attempts,
                    reason: RetryFailureReason::Exhausted,
                    error,
                };
            }
            let delay = calculate_delay(attempts - 1, &self.config);
            debug!(
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient failure, backing off"
            );
            sleep(delay).await;
        };

        {
            let mut state = self.state.lock().await;
            state.breaker.record_failure();
            state.stats.gave_up += 1;
        }
        error!(
            operation,
            attempts = failure.attempts,
            reason = ?failure.reason,
            error = %failure.error,
            "Giving up"
        );
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LlmError, RedditApiError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    fn server_error() -> CoreError {
        CoreError::RedditApi(RedditApiError::ServerError { status_code: 500 })
    }

    #[test]
    fn test_presets() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 1000);

        let reddit = RetryConfig::reddit();
        assert_eq!(reddit.max_attempts, 3);
        assert_eq!(reddit.base_delay_ms, 2000);
        assert_eq!(reddit.jitter_factor, 0.2);

        let cycle = RetryConfig::cycle();
        assert_eq!(cycle.failure_threshold, 0);
        assert_eq!(cycle.max_attempts, u32::MAX);
    }

    #[test]
    fn test_breaker_opens_at_threshold() {
        let config = RetryConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let mut breaker = CircuitBreaker::new(&config);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_breaker_disabled_with_zero_threshold() {
        let mut breaker = CircuitBreaker::new(&RetryConfig::cycle());
        for _ in 0..10 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_breaker_probe_after_cooldown() {
        let config = RetryConfig {
            failure_threshold: 1,
            recovery_timeout_s: 0,
            ..Default::default()
        };
        let mut breaker = CircuitBreaker::new(&config);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        assert!(breaker.allow_request());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn test_strategy_per_error() {
        assert_eq!(
            get_retry_strategy(&CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                retry_after: 60
            })),
            RetryStrategy::RetryWithDelay(Duration::from_secs(60))
        );
        assert_eq!(
            get_retry_strategy(&CoreError::RedditApi(RedditApiError::AuthenticationFailed {
                reason: "invalid_grant".to_string(),
            })),
            RetryStrategy::NoRetry
        );
        assert_eq!(get_retry_strategy(&server_error()), RetryStrategy::Retry);
        assert_eq!(
            get_retry_strategy(&CoreError::Llm(LlmError::ServiceUnavailable {
                provider: "openai".to_string(),
                status_code: 503,
            })),
            RetryStrategy::Retry
        );
        assert_eq!(
            get_retry_strategy(&CoreError::Llm(LlmError::AuthenticationFailed {
                provider: "openai".to_string(),
            })),
            RetryStrategy::NoRetry
        );
        assert_eq!(
            get_retry_strategy(&CoreError::FeedUnavailable {
                attempts: 3,
                reason: "502".to_string(),
            }),
            RetryStrategy::NoRetry
        );
    }

    #[test]
    fn test_call_outcome_from_result() {
        let ok: CallOutcome<i32> = Ok(1).into();
        assert!(matches!(ok, CallOutcome::Ok(1)));

        let limited: CallOutcome<i32> =
            Err(CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 7 })).into();
        assert!(matches!(
            limited,
            CallOutcome::RateLimited { retry_after, .. } if retry_after == Duration::from_secs(7)
        ));

        let transient: CallOutcome<i32> = Err(server_error()).into();
        assert!(matches!(transient, CallOutcome::Transient(_)));

        let permanent: CallOutcome<i32> =
            Err(CoreError::RedditApi(RedditApiError::InvalidToken)).into();
        assert!(matches!(permanent, CallOutcome::Permanent(_)));
    }

    #[test]
    fn test_backoff_doubles_until_capped() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..Default::default()
        };

        let delays: Vec<u64> = [0, 1, 2, 3, 10, u32::MAX]
            .into_iter()
            .map(|attempt| calculate_delay(attempt, &config).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let config = RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.5,
            ..Default::default()
        };

        for _ in 0..20 {
            let delay = calculate_delay(1, &config);
            assert!(delay >= Duration::from_millis(2000));
            assert!(delay <= Duration::from_millis(3000));
        }
    }

    #[tokio::test]
    async fn test_first_call_succeeds() {
        let executor = RetryExecutor::new(fast_config(3));

        let result = executor.execute("listing", || async { CallOutcome::Ok(42) }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(executor.stats().await, RetryStats::default());
    }

    #[tokio::test]
    async fn test_recovers_after_two_transient_failures() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = executor
            .execute("listing", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        CallOutcome::Transient(server_error())
                    } else {
                        CallOutcome::Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = executor.stats().await;
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.recovered, 1);
    }

    #[tokio::test]
    async fn test_always_transient_stops_at_max_attempts() {
        let executor = RetryExecutor::new(fast_config(4));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<i32, RetryFailure> = executor
            .execute("listing", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    CallOutcome::Transient(server_error())
                }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.reason, RetryFailureReason::Exhausted);
        assert_eq!(failure.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_repeated() {
        let executor = RetryExecutor::new(fast_config(3));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<i32, RetryFailure> = executor
            .execute("token", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    CallOutcome::Permanent(CoreError::RedditApi(
                        RedditApiError::AuthenticationFailed {
                            reason: "invalid_grant".to_string(),
                        },
                    ))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().reason, RetryFailureReason::Permanent);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executor.stats().await.gave_up, 1);
    }

    #[tokio::test]
    async fn test_cooldowns_do_not_consume_attempts() {
        let executor = RetryExecutor::new(fast_config(1));
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result = executor
            .execute("listing", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        CallOutcome::RateLimited {
                            retry_after: Duration::from_millis(2),
                            error: CoreError::RedditApi(RedditApiError::RateLimitExceeded {
                                retry_after: 0,
                            }),
                        }
                    } else {
                        CallOutcome::Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.stats().await.cooldowns, 2);
    }

    #[tokio::test]
    async fn test_cooldowns_are_bounded() {
        let mut config = fast_config(3);
        config.max_rate_limit_waits = 2;
        let executor = RetryExecutor::new(config);

        let result: Result<(), RetryFailure> = executor
            .execute("listing", || async {
                CallOutcome::RateLimited {
                    retry_after: Duration::from_millis(1),
                    error: CoreError::RedditApi(RedditApiError::RateLimitExceeded { retry_after: 0 }),
                }
            })
            .await;

        let failure = result.unwrap_err();
        assert_eq!(failure.reason, RetryFailureReason::RateLimitExhausted);
        assert_eq!(failure.attempts, 0);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_the_call() {
        let config = RetryConfig {
            max_attempts: 2,
            failure_threshold: 2,
            base_delay_ms: 1,
            ..Default::default()
        };
        let executor = RetryExecutor::new(config);

        for _ in 0..2 {
            let result: Result<i32, RetryFailure> = executor
                .execute("listing", || async { CallOutcome::Transient(server_error()) })
                .await;
            assert!(result.is_err());
        }
        assert_eq!(executor.breaker_state().await, CircuitBreakerState::Open);

        let calls = AtomicU32::new(0);
        let blocked = executor
            .execute("listing", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { CallOutcome::Ok(42) }
            })
            .await;
        let failure = blocked.unwrap_err();
        assert_eq!(failure.reason, RetryFailureReason::CircuitOpen);
        assert_eq!(failure.attempts, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(executor.stats().await.rejected_by_breaker, 1);
    }
}
