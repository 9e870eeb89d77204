//! Per-target fetch run records.
//!
//! Records are kept in memory for a bounded recent window and mirrored to the
//! `metrics` facade so the Prometheus exporter sees the same numbers.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::SearchId;

/// Records older than this are dropped.
const RETENTION_HOURS: i64 = 24;

/// One fetch run against a single target.
#[derive(Debug, Clone, Serialize)]
pub struct FetchRunMetrics {
    pub search_id: SearchId,
    pub platform: String,
    pub target: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub items_fetched: usize,
    pub items_failed: usize,
    pub sub_items_fetched: usize,
    pub sub_items_failed: usize,
    pub targets_succeeded: usize,
    pub targets_failed: usize,
    pub errors: Vec<String>,
    pub retry_count: u32,
}

impl FetchRunMetrics {
    #[must_use]
    pub fn start(search_id: &SearchId, platform: &str, target: &str) -> Self {
        Self {
            search_id: search_id.clone(),
            platform: platform.to_string(),
            target: target.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            items_fetched: 0,
            items_failed: 0,
            sub_items_fetched: 0,
            sub_items_failed: 0,
            targets_succeeded: 0,
            targets_failed: 0,
            errors: Vec::new(),
            retry_count: 0,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Fraction of fetched units that succeeded; 1.0 when nothing was attempted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let ok = self.items_fetched + self.sub_items_fetched;
        let total = ok + self.items_failed + self.sub_items_failed;
        if total == 0 {
            1.0
        } else {
            ok as f64 / total as f64
        }
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_seconds(&self) -> f64 {
        self.finished_at
            .map_or(0.0, |end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub period_hours: i64,
    pub total_runs: usize,
    pub total_items_fetched: usize,
    pub total_sub_items_fetched: usize,
    pub total_errors: usize,
    pub average_success_rate: f64,
    pub average_duration_seconds: f64,
    pub total_retries: u64,
}

pub struct MetricsCollector {
    max_records: usize,
    records: Mutex<VecDeque<FetchRunMetrics>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, mut run: FetchRunMetrics) {
        if run.finished_at.is_none() {
            run.finish();
        }

        let labels = [
            ("platform", run.platform.clone()),
            ("outcome", if run.targets_failed > 0 { "failed" } else { "success" }.to_string()),
        ];
        metrics::counter!("fetch_runs_total", &labels).increment(1);
        metrics::counter!("fetch_items_total", "platform" => run.platform.clone())
            .increment(run.items_fetched as u64);
        metrics::counter!("fetch_sub_items_total", "platform" => run.platform.clone())
            .increment(run.sub_items_fetched as u64);
        metrics::counter!("fetch_retries_total", "platform" => run.platform.clone())
            .increment(u64::from(run.retry_count));
        metrics::histogram!("fetch_run_duration_seconds", "platform" => run.platform.clone())
            .record(run.duration_seconds());

        let cutoff = Utc::now() - Duration::hours(RETENTION_HOURS);
        let mut records = self.lock();
        records.push_back(run);

        while records
            .front()
            .is_some_and(|r| r.started_at < cutoff || records.len() > self.max_records)
        {
            records.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<FetchRunMetrics>> {
        // A panic while holding the lock leaves the data usable.
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn search_metrics(&self, search_id: &SearchId) -> Vec<FetchRunMetrics> {
        self.lock()
            .iter()
            .filter(|r| &r.search_id == search_id)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn recent(&self, hours: i64) -> Vec<FetchRunMetrics> {
        let cutoff = Utc::now() - Duration::hours(hours);
        self.lock()
            .iter()
            .filter(|r| r.started_at >= cutoff)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn summary(&self, hours: i64) -> MetricsSummary {
        Self::summarize(&self.recent(hours), hours)
    }

    #[must_use]
    pub fn platform_summary(&self, platform: &str, hours: i64) -> MetricsSummary {
        let runs: Vec<_> = self
            .recent(hours)
            .into_iter()
            .filter(|r| r.platform == platform)
            .collect();
        Self::summarize(&runs, hours)
    }

    #[allow(clippy::cast_precision_loss)]
    fn summarize(runs: &[FetchRunMetrics], hours: i64) -> MetricsSummary {
        let durations: Vec<f64> = runs
            .iter()
            .map(FetchRunMetrics::duration_seconds)
            .filter(|d| *d > 0.0)
            .collect();

        let average_success_rate = if runs.is_empty() {
            1.0
        } else {
            runs.iter().map(FetchRunMetrics::success_rate).sum::<f64>() / runs.len() as f64
        };

        let average_duration_seconds = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        MetricsSummary {
            period_hours: hours,
            total_runs: runs.len(),
            total_items_fetched: runs.iter().map(|r| r.items_fetched).sum(),
            total_sub_items_fetched: runs.iter().map(|r| r.sub_items_fetched).sum(),
            total_errors: runs.iter().map(|r| r.errors.len()).sum(),
            average_success_rate,
            average_duration_seconds,
            total_retries: runs.iter().map(|r| u64::from(r.retry_count)).sum(),
        }
    }
}
