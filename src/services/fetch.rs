//! Multi-target harvest that tolerates partial failure.
//!
//! A failing target never discards items already collected from other
//! targets, and a failing comment fetch never discards its post. Failures are
//! returned as a manifest next to the partial results.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use super::metrics::{FetchRunMetrics, MetricsCollector};
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use crate::clients::{GLOBAL_TARGET, PlatformConnector};
use crate::domain::{FetchParams, PlatformItem, SearchId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub target: String,
    /// Set when the failure concerns the sub-items of one item.
    pub item_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub items: Vec<PlatformItem>,
    pub sub_items: Vec<PlatformItem>,
    pub failures: Vec<FetchFailure>,
    /// Retries across every call in this harvest.
    pub retries: u32,
    /// Targets whose item listing succeeded only after at least one retry.
    pub recovered_targets: usize,
}

impl FetchOutcome {
    /// Items followed by sub-items.
    #[must_use]
    pub fn all_items(&self) -> Vec<PlatformItem> {
        self.items
            .iter()
            .chain(self.sub_items.iter())
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn target_failures(&self) -> usize {
        self.failures.iter().filter(|f| f.item_id.is_none()).count()
    }
}

pub struct FetchOrchestrator {
    connector: Arc<dyn PlatformConnector>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl FetchOrchestrator {
    #[must_use]
    pub fn new(
        connector: Arc<dyn PlatformConnector>,
        limiter: Arc<RateLimiter>,
        policy: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            connector,
            limiter,
            policy,
            metrics,
        }
    }

    #[must_use]
    pub fn source(&self) -> &'static str {
        self.connector.source()
    }

    /// Fetches every target in order. Never fails: errors end up in
    /// [`FetchOutcome::failures`].
    pub async fn fetch(
        &self,
        search_id: &SearchId,
        targets: &[String],
        params: &FetchParams,
    ) -> FetchOutcome {
        let start = Instant::now();
        let global = [GLOBAL_TARGET.to_string()];
        let targets = if targets.is_empty() { &global[..] } else { targets };

        let mut outcome = FetchOutcome::default();
        for target in targets {
            self.fetch_target(search_id, target, params, &mut outcome)
                .await;
        }

        info!(
            event = "fetch_finished",
            search_id = %search_id,
            targets = targets.len(),
            items = outcome.items.len(),
            sub_items = outcome.sub_items.len(),
            failures = outcome.failures.len(),
            retries = outcome.retries,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Fetch finished"
        );

        outcome
    }

    async fn fetch_target(
        &self,
        search_id: &SearchId,
        target: &str,
        params: &FetchParams,
        outcome: &mut FetchOutcome,
    ) {
        let connector = &self.connector;
        let mut run = FetchRunMetrics::start(search_id, connector.source(), target);

        let report = self
            .policy
            .execute(&self.limiter, "fetch_items", || {
                connector.fetch_items(target, params)
            })
            .await;
        run.retry_count += report.retries();
        outcome.retries += report.retries();

        let items = match report.result {
            Ok(items) => {
                if report.attempts > 1 {
                    outcome.recovered_targets += 1;
                }
                items
            }
            Err(e) => {
                warn!(
                    search_id = %search_id,
                    subreddit = target,
                    attempts = report.attempts,
                    error = %e,
                    "Target failed, continuing with remaining targets"
                );
                run.items_failed += 1;
                run.targets_failed = 1;
                run.errors.push(e.to_string());
                outcome.failures.push(FetchFailure {
                    target: target.to_string(),
                    item_id: None,
                    error: e.to_string(),
                });
                self.metrics.record(run);
                return;
            }
        };

        run.items_fetched = items.len();
        run.targets_succeeded = 1;

        if params.include_sub_items && params.sub_item_limit > 0 {
            for item in &items {
                let report = self
                    .policy
                    .execute(&self.limiter, "fetch_sub_items", || {
                        connector.fetch_sub_items(item, params)
                    })
                    .await;
                run.retry_count += report.retries();
                outcome.retries += report.retries();

                match report.result {
                    Ok(sub_items) => {
                        run.sub_items_fetched += sub_items.len();
                        outcome.sub_items.extend(sub_items);
                    }
                    Err(e) => {
                        warn!(
                            search_id = %search_id,
                            item_id = %item.id,
                            error = %e,
                            "Failed to fetch comments"
                        );
                        run.sub_items_failed += 1;
                        run.errors.push(format!("Post {}: {e}", item.id));
                        outcome.failures.push(FetchFailure {
                            target: target.to_string(),
                            item_id: Some(item.id.clone()),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        outcome.items.extend(items);
        self.metrics.record(run);
    }
}
