//! Client-side pacing for the Reddit API.
//!
//! A token bucket keeps the client under the OAuth quota. Once Reddit's own
//! `X-Ratelimit-*` headers report the window as spent, every caller waits for
//! the advertised reset instead.

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    /// Bucket capacity.
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    /// 100 requests per minute per OAuth client.
    pub fn reddit_oauth() -> Self {
        Self {
            max_requests: 100,
            time_window: Duration::from_secs(60),
            burst_allowance: 10,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    tokens: f64,
    refilled_at: Instant,
    paused_until: Option<Instant>,
    reported_remaining: Option<f64>,
    requests_sent: u64,
    throttled: u64,
}

#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    refill_per_sec: f64,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let refill_per_sec = config.max_requests as f64 / config.time_window.as_secs_f64();
        let state = Mutex::new(LimiterState {
            tokens: config.burst_allowance as f64,
            refilled_at: Instant::now(),
            paused_until: None,
            reported_remaining: None,
            requests_sent: 0,
            throttled: 0,
        });
        Self {
            config,
            refill_per_sec,
            state,
        }
    }

    fn refill(&self, state: &mut LimiterState, now: Instant) {
        let earned = now.duration_since(state.refilled_at).as_secs_f64() * self.refill_per_sec;
        state.tokens = (state.tokens + earned).min(self.config.burst_allowance as f64);
        state.refilled_at = now;
    }

    /// Take one token without waiting, or say how long until one is free.
    pub async fn try_acquire(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        if let Some(remaining) = state.paused_until.and_then(|until| until.checked_duration_since(now)) {
            return Err(remaining);
        }
        self.refill(&mut state, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            state.requests_sent += 1;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec))
        }
    }

    /// Wait for a token. Returns how long the caller was held back.
    pub async fn acquire(&self) -> Duration {
        let started = Instant::now();
        while let Err(wait) = self.try_acquire().await {
            debug!(wait_ms = wait.as_millis() as u64, "Pacing Reddit request");
            sleep(wait).await;
        }
        started.elapsed()
    }

    /// Hold every caller for `duration`. Never shortens a pause already in place.
    pub async fn pause_for(&self, duration: Duration) {
        let until = Instant::now() + duration;
        let mut state = self.state.lock().await;
        if state.paused_until.map_or(true, |current| current < until) {
            state.paused_until = Some(until);
        }
    }

    /// Feed in `X-Ratelimit-Remaining` and `X-Ratelimit-Reset` from a response.
    pub async fn observe_headers(&self, remaining: Option<f64>, reset_secs: Option<u64>) {
        let Some(remaining) = remaining else {
            return;
        };
        self.state.lock().await.reported_remaining = Some(remaining);
        if remaining >= 1.0 {
            return;
        }
        if let Some(reset_secs) = reset_secs {
            warn!(reset_secs, "Reddit quota spent for this window, holding requests");
            self.pause_for(Duration::from_secs(reset_secs)).await;
        }
    }

    pub async fn record_throttled(&self) {
        self.state.lock().await.throttled += 1;
    }

    pub async fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        self.refill(&mut state, now);

        RateLimitStatus {
            available_tokens: state.tokens as u32,
            max_tokens: self.config.burst_allowance,
            requests_per_minute: self.config.max_requests,
            requests_sent: state.requests_sent,
            throttled: state.throttled,
            reported_remaining: state.reported_remaining,
            paused_for: state.paused_until.and_then(|until| until.checked_duration_since(now)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub requests_per_minute: u32,
    pub requests_sent: u64,
    /// 429 responses seen.
    pub throttled: u64,
    /// Last `X-Ratelimit-Remaining` Reddit sent.
    pub reported_remaining: Option<f64>,
    pub paused_for: Option<Duration>,
}

impl RateLimitStatus {
    pub fn utilization_percentage(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        let used = self.max_tokens.saturating_sub(self.available_tokens);
        used as f64 / self.max_tokens as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_requests: u32, burst_allowance: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_requests,
            time_window: Duration::from_secs(60),
            burst_allowance,
        }
    }

    #[tokio::test]
    async fn test_burst_then_empty() {
        let limiter = RateLimiter::new(config(60, 5));

        for _ in 0..5 {
            assert!(limiter.try_acquire().await.is_ok());
        }
        let wait = limiter.try_acquire().await.unwrap_err();
        assert!(wait <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_tokens_refill_over_time() {
        // Ten tokens per second.
        let limiter = RateLimiter::new(config(600, 2));

        assert!(limiter.try_acquire().await.is_ok());
        assert!(limiter.try_acquire().await.is_ok());
        assert!(limiter.try_acquire().await.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(limiter.try_acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_status_counts_requests() {
        let limiter = RateLimiter::new(RateLimitConfig::reddit_oauth());

        limiter.acquire().await;
        limiter.acquire().await;
        limiter.record_throttled().await;

        let status = limiter.status().await;
        assert_eq!(status.max_tokens, 10);
        assert_eq!(status.requests_per_minute, 100);
        assert_eq!(status.available_tokens, 8);
        assert_eq!(status.requests_sent, 2);
        assert_eq!(status.throttled, 1);
        assert!(status.utilization_percentage() > 0.0);
        assert!(status.paused_for.is_none());
    }

    #[tokio::test]
    async fn test_spent_window_holds_callers() {
        let limiter = RateLimiter::new(RateLimitConfig::reddit_oauth());

        limiter.observe_headers(Some(42.0), Some(30)).await;
        let status = limiter.status().await;
        assert!(status.paused_for.is_none());
        assert_eq!(status.reported_remaining, Some(42.0));

        limiter.observe_headers(Some(0.0), Some(1)).await;
        assert!(limiter.status().await.paused_for.is_some());

        let waited = limiter.acquire().await;
        assert!(waited >= Duration::from_millis(900));
    }

    #[tokio::test]
    async fn test_shorter_pause_does_not_override_longer() {
        let limiter = RateLimiter::new(RateLimitConfig::reddit_oauth());
        limiter.pause_for(Duration::from_secs(30)).await;
        limiter.pause_for(Duration::from_millis(10)).await;

        let paused_for = limiter.status().await.paused_for.unwrap();
        assert!(paused_for > Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_headers_without_remaining_are_ignored() {
        let limiter = RateLimiter::new(RateLimitConfig::reddit_oauth());
        limiter.observe_headers(None, Some(600)).await;

        let status = limiter.status().await;
        assert!(status.paused_for.is_none());
        assert!(status.reported_remaining.is_none());
    }
}
