use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::crawler::task::TaskStatus;

/// Crawl metrics collector, shared by every worker of a service
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    /// In-memory metrics store
    metrics: Arc<Mutex<Metrics>>,
}

/// Metrics data structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metrics {
    /// Start time of the metrics collection
    pub start_time: DateTime<Utc>,

    /// Tasks claimed by a worker
    pub tasks_started: usize,

    /// Tasks that reached a final state, by state
    pub task_outcomes: HashMap<TaskStatus, usize>,

    /// Link fetches performed
    pub link_fetches: usize,

    /// Link fetches that never got a response
    pub failed_link_fetches: usize,

    /// HTTP status code counts of link fetches
    pub status_codes: HashMap<u16, usize>,

    /// Total time spent in link fetches, in milliseconds
    pub total_fetch_ms: u64,

    /// Slowest link fetch, in milliseconds
    pub slowest_fetch_ms: u64,
}

impl Metrics {
    /// Mean link fetch duration in milliseconds
    pub fn mean_fetch_ms(&self) -> f64 {
        if self.link_fetches == 0 {
            0.0
        } else {
            self.total_fetch_ms as f64 / self.link_fetches as f64
        }
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let metrics = Metrics {
            start_time: Utc::now(),
            ..Default::default()
        };

        Self {
            metrics: Arc::new(Mutex::new(metrics)),
        }
    }

    /// Record a link fetch; `status_code` is `None` for transport errors
    pub async fn record_link_fetch(&self, status_code: Option<u16>, duration_ms: u64) {
        let mut metrics = self.metrics.lock().await;

        metrics.link_fetches += 1;
        match status_code {
            Some(code) => *metrics.status_codes.entry(code).or_default() += 1,
            None => metrics.failed_link_fetches += 1,
        }

        metrics.total_fetch_ms += duration_ms;
        metrics.slowest_fetch_ms = metrics.slowest_fetch_ms.max(duration_ms);
    }

    /// Record that a worker claimed a task
    pub async fn record_task_started(&self) {
        self.metrics.lock().await.tasks_started += 1;
    }

    /// Record the final state of a task
    pub async fn record_task_outcome(&self, status: TaskStatus) {
        let mut metrics = self.metrics.lock().await;
        *metrics.task_outcomes.entry(status).or_default() += 1;
    }

    /// Start timing a request
    pub fn start_timer(&self) -> RequestTimer {
        RequestTimer {
            start: Instant::now(),
        }
    }

    /// Get all metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Request timer for measuring request durations
pub struct RequestTimer {
    /// Start time of the request
    start: Instant,
}

impl RequestTimer {
    /// End timing and get the duration in milliseconds
    pub fn end(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
