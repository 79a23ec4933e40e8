use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;

/// How a single Reddit request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RequestOutcome {
    Success,
    /// HTTP 429.
    Throttled,
    HttpError(u16),
    /// No response at all: DNS, connect, timeout.
    Transport,
}

#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub endpoint: String,
    pub latency: Duration,
    pub outcome: RequestOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EndpointMetrics {
    pub requests: u64,
    pub failures: u64,
    pub total_latency: Duration,
    pub slowest: Duration,
}

impl EndpointMetrics {
    pub fn average_latency(&self) -> Duration {
        average(self.total_latency, self.requests)
    }

    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        (self.requests - self.failures) as f64 / self.requests as f64
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub rate_limited_requests: u64,
    pub total_latency: Duration,
    pub last_request_at: Option<SystemTime>,
    pub by_endpoint: BTreeMap<String, EndpointMetrics>,
}

impl ApiMetrics {
    pub fn average_latency(&self) -> Duration {
        average(self.total_latency, self.total_requests)
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => total / count,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

/// Request accounting for the Reddit client, keyed by endpoint path.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: RwLock<ApiMetrics>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, record: RequestRecord) {
        let mut metrics = self.metrics.write().await;
        let failed = record.outcome != RequestOutcome::Success;

        metrics.total_requests += 1;
        metrics.total_latency += record.latency;
        metrics.last_request_at = Some(SystemTime::now());
        if failed {
            metrics.failed_requests += 1;
        } else {
            metrics.successful_requests += 1;
        }
        if record.outcome == RequestOutcome::Throttled {
            metrics.rate_limited_requests += 1;
        }

        let endpoint = metrics.by_endpoint.entry(record.endpoint).or_default();
        endpoint.requests += 1;
        endpoint.failures += u64::from(failed);
        endpoint.total_latency += record.latency;
        endpoint.slowest = endpoint.slowest.max(record.latency);
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn endpoint(&self, endpoint: &str) -> Option<EndpointMetrics> {
        self.metrics.read().await.by_endpoint.get(endpoint).cloned()
    }

    pub async fn reset_metrics(&self) {
        *self.metrics.write().await = ApiMetrics::default();
    }

    pub async fn log_summary(&self) {
        let metrics = self.metrics.read().await;
        debug!(
            total = metrics.total_requests,
            failed = metrics.failed_requests,
            rate_limited = metrics.rate_limited_requests,
            avg_ms = metrics.average_latency().as_millis() as u64,
            "Reddit request totals"
        );
        for (path, endpoint) in &metrics.by_endpoint {
            debug!(
                endpoint = %path,
                requests = endpoint.requests,
                success_rate = endpoint.success_rate(),
                slowest_ms = endpoint.slowest.as_millis() as u64,
                "Reddit endpoint"
            );
        }
    }
}
