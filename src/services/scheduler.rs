use anyhow::Result;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{Duration, MissedTickBehavior, interval};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};

use super::scrape::ScrapeService;
use crate::config::SchedulerConfig;
use crate::db::Store;
use crate::domain::Search;

/// Counts for one pass over the due searches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub leads_created: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    scrape: Arc<ScrapeService>,
    store: Store,
    config: SchedulerConfig,
    running: Arc<RwLock<bool>>,
    // Held for the duration of a tick so ticks never overlap.
    tick_guard: Arc<Mutex<()>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(scrape: Arc<ScrapeService>, store: Store, config: SchedulerConfig) -> Self {
        Self {
            scrape,
            store,
            config,
            running: Arc::new(RwLock::new(false)),
            tick_guard: Arc::new(Mutex::new(())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        if !self.config.enabled {
            info!("Scheduler is disabled in config");
            return Ok(());
        }

        *self.running.write().await = true;
        info!("Starting background scheduler");

        if let Some(cron_expr) = &self.config.cron_expression {
            self.run_with_cron(cron_expr).await
        } else {
            self.run_with_interval().await
        }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        info!("Scheduler stop requested");
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn run_with_cron(&self, cron_expr: &str) -> Result<()> {
        let mut sched = JobScheduler::new().await?;

        let scheduler = self.clone();
        let job = Job::new_async(cron_expr, move |_uuid, _lock| {
            let scheduler = scheduler.clone();
            Box::pin(async move {
                if !scheduler.is_running().await {
                    return;
                }
                scheduler.guarded_tick().await;
            })
        })?;

        sched.add(job).await?;
        sched.start().await?;
        info!("Scheduler running with cron: {}", cron_expr);

        loop {
            if !self.is_running().await {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        sched.shutdown().await?;
        Ok(())
    }

    async fn run_with_interval(&self) -> Result<()> {
        let interval_secs = self.config.check_interval_seconds.max(1);
        info!("Scheduler running: checking due searches every {}s", interval_secs);

        let mut check_interval = interval(Duration::from_secs(interval_secs));
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            check_interval.tick().await;
            if !self.is_running().await {
                break;
            }
            self.guarded_tick().await;
        }

        Ok(())
    }

    async fn guarded_tick(&self) {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("Previous tick still running, skipping");
            return;
        };

        if let Err(e) = self.tick().await {
            error!(event = "job_failed", job_name = "check_searches", error = %e, "Scheduled check failed");
        }
    }

    /// Runs one pass immediately, regardless of whether the loop is active.
    pub async fn run_once(&self) -> Result<TickSummary> {
        let _guard = self.tick_guard.lock().await;
        self.tick().await
    }

    /// Processes every due search. One search failing never stops the others.
    async fn tick(&self) -> Result<TickSummary> {
        let start = std::time::Instant::now();
        info!(event = "job_started", job_name = "check_searches", "Checking due searches");

        let due = self.store.list_due_searches(Utc::now()).await?;
        let processed = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let leads = AtomicUsize::new(0);

        futures::stream::iter(due.iter().cloned())
            .for_each_concurrent(self.config.max_concurrent_searches.max(1), |search| {
                let (processed, skipped, failed, leads) = (&processed, &skipped, &failed, &leads);
                async move {
                    match self.process_due(search).await {
                        DueOutcome::Skipped => skipped.fetch_add(1, Ordering::Relaxed),
                        DueOutcome::Failed => failed.fetch_add(1, Ordering::Relaxed),
                        DueOutcome::Completed(n) => {
                            leads.fetch_add(n, Ordering::Relaxed);
                            processed.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            })
            .await;

        let summary = TickSummary {
            due: due.len(),
            processed: processed.into_inner(),
            skipped: skipped.into_inner(),
            failed: failed.into_inner(),
            leads_created: leads.into_inner(),
        };

        info!(
            event = "job_finished",
            job_name = "check_searches",
            due = summary.due,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            leads = summary.leads_created,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Scheduled check finished"
        );

        Ok(summary)
    }

    async fn process_due(&self, search: Search) -> DueOutcome {
        let token = match self.scrape.try_start(&search) {
            Ok(token) => token,
            Err(reason) => {
                debug!(search_id = %search.id, reason = %reason, "Skipping due search");
                return DueOutcome::Skipped;
            }
        };

        let search_id = search.id.clone();
        match self.scrape.execute_job(search, token).await {
            Ok(report) => DueOutcome::Completed(report.leads_created),
            Err(e) => {
                warn!(search_id = %search_id, error = %e, "Scheduled scrape failed, continuing");
                DueOutcome::Failed
            }
        }
    }
}

enum DueOutcome {
    Completed(usize),
    Skipped,
    Failed,
}
