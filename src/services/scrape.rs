//! The scrape pipeline and its trigger surface.
//!
//! One run of a search goes fetch, dedup filter, analysis, lead persistence
//! and dedup marking, then records the run on the search. [`ScrapeService`]
//! also owns the job lifecycle around a run so on-demand triggers and the
//! scheduler share the same rules.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use super::analysis::{AnalysisContext, Analyzer};
use super::dedup::DedupLedger;
use super::fetch::{FetchFailure, FetchOrchestrator};
use super::job_tracker::{JobSnapshot, JobToken, JobTracker, StartDecision, StartRejection};
use super::notify::Notifier;
use crate::config::PlatformConfig;
use crate::db::{NewLead, SavedLead, Store};
use crate::domain::events::NotificationEvent;
use crate::domain::{PlatformItem, ScrapeStatus, Search, SearchId};

/// Errors surfaced by scrape triggers.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Search not found: {0}")]
    NotFound(SearchId),

    #[error("{0}")]
    Rejected(StartRejection),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for ScrapeError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<sea_orm::DbErr>() {
            Ok(db) => Self::Database(db),
            Err(other) => Self::Internal(format!("{other:#}")),
        }
    }
}

impl ScrapeError {
    /// HTTP-equivalent status for callers exposing this over an API.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Rejected(StartRejection::Disabled) => 400,
            Self::Rejected(_) => 409,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }
}

/// Answer to an on-demand trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ScrapeDecision {
    Accepted,
    Rejected(StartRejection),
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeReport {
    pub search_id: SearchId,
    pub items_fetched: usize,
    pub sub_items_fetched: usize,
    /// Items below the search's score or age threshold; never analyzed.
    pub items_skipped: usize,
    pub new_items: usize,
    pub leads_created: usize,
    /// Items whose analysis or persistence failed; they stay unmarked.
    pub item_failures: usize,
    pub fetch_failures: Vec<FetchFailure>,
    pub retries: u32,
    pub recovered_targets: usize,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeStatusView {
    pub search_id: SearchId,
    pub is_running: bool,
    pub can_start: bool,
    pub reason: Option<String>,
    pub cooldown_remaining_minutes: Option<i64>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub last_status: Option<ScrapeStatus>,
    pub last_error: Option<String>,
    pub job: Option<JobSnapshot>,
}

#[derive(Clone)]
pub struct ScrapeService {
    store: Store,
    orchestrator: Arc<FetchOrchestrator>,
    ledger: Arc<DedupLedger>,
    analyzer: Arc<dyn Analyzer>,
    tracker: JobTracker,
    notifier: Arc<dyn Notifier>,
    max_items_per_search: u32,
    max_sub_items_per_item: u32,
}

impl ScrapeService {
    #[must_use]
    pub fn new(
        store: Store,
        orchestrator: Arc<FetchOrchestrator>,
        analyzer: Arc<dyn Analyzer>,
        tracker: JobTracker,
        notifier: Arc<dyn Notifier>,
        platform: &PlatformConfig,
    ) -> Self {
        Self {
            ledger: Arc::new(DedupLedger::new(store.clone())),
            store,
            orchestrator,
            analyzer,
            tracker,
            notifier,
            max_items_per_search: platform.max_items_per_search,
            max_sub_items_per_item: platform.max_sub_items_per_item,
        }
    }

    #[must_use]
    pub const fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    /// Checks the start rules and registers the job. On success the caller
    /// owns the job and must finish it through [`Self::execute_job`] with the
    /// returned token.
    pub fn try_start(&self, search: &Search) -> Result<JobToken, StartRejection> {
        if !search.enabled {
            return Err(StartRejection::Disabled);
        }

        if let StartDecision::Rejected(reason) =
            self.tracker.can_start(&search.id, search.last_run_at)
        {
            return Err(reason);
        }

        // Lost a race with another trigger between the check and here.
        self.tracker
            .start_job(&search.id)
            .ok_or(StartRejection::AlreadyRunning)
    }

    async fn load(&self, search_id: &SearchId) -> Result<Search, ScrapeError> {
        self.store
            .get_search(search_id)
            .await?
            .ok_or_else(|| ScrapeError::NotFound(search_id.clone()))
    }

    /// Starts a run in the background. Conflicts are answered immediately,
    /// never queued.
    pub async fn request_scrape(&self, search_id: &SearchId) -> Result<ScrapeDecision, ScrapeError> {
        let search = self.load(search_id).await?;

        let token = match self.try_start(&search) {
            Ok(token) => token,
            Err(reason) => {
                info!(search_id = %search_id, reason = %reason, "Scrape request rejected");
                return Ok(ScrapeDecision::Rejected(reason));
            }
        };

        let service = self.clone();
        tokio::spawn(async move {
            // Outcome is logged and persisted by execute_job.
            let _ = service.execute_job(search, token).await;
        });

        Ok(ScrapeDecision::Accepted)
    }

    /// Same rules as [`Self::request_scrape`] but waits for the run.
    pub async fn scrape_now(&self, search_id: &SearchId) -> Result<ScrapeReport, ScrapeError> {
        let search = self.load(search_id).await?;
        let token = self.try_start(&search).map_err(ScrapeError::Rejected)?;
        self.execute_job(search, token).await
    }

    pub async fn get_status(&self, search_id: &SearchId) -> Result<ScrapeStatusView, ScrapeError> {
        let search = self.load(search_id).await?;

        let rejection = if search.enabled {
            match self.tracker.can_start(search_id, search.last_run_at) {
                StartDecision::Allowed => None,
                StartDecision::Rejected(reason) => Some(reason),
            }
        } else {
            Some(StartRejection::Disabled)
        };

        Ok(ScrapeStatusView {
            search_id: search.id.clone(),
            is_running: self.tracker.is_job_running(search_id),
            can_start: rejection.is_none(),
            reason: rejection.as_ref().map(ToString::to_string),
            cooldown_remaining_minutes: rejection
                .as_ref()
                .and_then(StartRejection::cooldown_remaining_minutes),
            last_run: search.last_run_at,
            next_run: search.next_run_at,
            last_status: search.last_status,
            last_error: search.last_error,
            job: self.tracker.job_status(search_id),
        })
    }

    /// Runs a search whose job was already started and finishes the job with
    /// the outcome. Status and run times are persisted on the search, unless
    /// the job was superseded while it ran.
    pub async fn execute_job(
        &self,
        search: Search,
        token: JobToken,
    ) -> Result<ScrapeReport, ScrapeError> {
        let search_id = search.id.clone();

        if let Err(e) = self
            .store
            .set_scrape_status(&search_id, ScrapeStatus::Running, None)
            .await
        {
            warn!(search_id = %search_id, error = %e, "Failed to persist running status");
        }
        self.notifier.notify(NotificationEvent::ScrapeStarted {
            search_id: search_id.clone(),
            search_name: search.name.clone(),
        });

        let outcome = self.run_search(&search).await;

        // A newer run owns the search now; its own outcome is what counts.
        if !self.tracker.is_current(&search_id, token) {
            warn!(
                search_id = %search_id,
                "Job was superseded while running, discarding its outcome"
            );
            return outcome.map_err(Into::into);
        }

        let outcome = match outcome {
            Ok(report) => self.record_run(&search).await.map(|()| report),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(report) => {
                if let Err(e) = self
                    .store
                    .set_scrape_status(&search_id, ScrapeStatus::Completed, None)
                    .await
                {
                    warn!(search_id = %search_id, error = %e, "Failed to persist completed status");
                }
                self.tracker.complete_job(&search_id, token, true, None);

                self.notifier.notify(NotificationEvent::ScrapeCompleted {
                    search_id: search_id.clone(),
                    search_name: search.name.clone(),
                    items_fetched: report.items_fetched + report.sub_items_fetched,
                    new_items: report.new_items,
                    leads_created: report.leads_created,
                    failures: report.fetch_failures.len() + report.item_failures,
                    duration_seconds: report.duration_seconds,
                });
                Ok(report)
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(
                    event = "job_failed",
                    search_id = %search_id,
                    error = %message,
                    "Scrape failed"
                );

                if let Err(db) = self
                    .store
                    .set_scrape_status(&search_id, ScrapeStatus::Failed, Some(&message))
                    .await
                {
                    warn!(search_id = %search_id, error = %db, "Failed to persist failed status");
                }
                self.tracker
                    .complete_job(&search_id, token, false, Some(message.clone()));

                self.notifier.notify(NotificationEvent::ScrapeFailed {
                    search_id,
                    search_name: search.name,
                    error: message,
                });
                Err(e.into())
            }
        }
    }

    /// Records a finished run: `last_run_at` and the next due time.
    async fn record_run(&self, search: &Search) -> anyhow::Result<()> {
        let finished_at = Utc::now();
        self.store
            .save_search_state(
                &search.id,
                finished_at,
                search.schedule.next_run_after(finished_at),
            )
            .await
    }

    /// The pipeline itself. Fetch problems are partial results, not errors;
    /// only ledger lookups can fail it. Recording the run on the search is
    /// left to [`Self::execute_job`].
    pub async fn run_search(&self, search: &Search) -> anyhow::Result<ScrapeReport> {
        let start = Instant::now();
        let params = search.params.clamped(
            search.targets.len(),
            self.max_items_per_search,
            self.max_sub_items_per_item,
        );

        let fetched = self
            .orchestrator
            .fetch(&search.id, &search.targets, &params)
            .await;
        let now = Utc::now();
        let fetched_total = fetched.items.len() + fetched.sub_items.len();
        let candidates: Vec<PlatformItem> = fetched
            .all_items()
            .into_iter()
            .filter(|item| params.admits(item, now))
            .collect();
        let items_skipped = fetched_total - candidates.len();
        let fresh = self.ledger.filter(&search.id, candidates).await?;

        let context = AnalysisContext {
            keywords: search.keywords.clone(),
            patterns: search.patterns.clone(),
        };

        let mut leads_created = 0;
        let mut item_failures = 0;
        for item in &fresh {
            match self.process_item(search, item, &context).await {
                Ok(true) => leads_created += 1,
                Ok(false) => {}
                Err(e) => {
                    item_failures += 1;
                    warn!(
                        search_id = %search.id,
                        item_id = %item.id,
                        error = %e,
                        "Failed to process item, will retry next run"
                    );
                }
            }
        }

        let duration = start.elapsed();
        let report = ScrapeReport {
            search_id: search.id.clone(),
            items_fetched: fetched.items.len(),
            sub_items_fetched: fetched.sub_items.len(),
            items_skipped,
            new_items: fresh.len(),
            leads_created,
            item_failures,
            recovered_targets: fetched.recovered_targets,
            retries: fetched.retries,
            fetch_failures: fetched.failures,
            duration_seconds: duration.as_secs_f64(),
        };

        metrics::counter!("leads_created_total")
            .increment(u64::try_from(leads_created).unwrap_or(u64::MAX));
        info!(
            event = "scrape_finished",
            search_id = %search.id,
            items = report.items_fetched,
            sub_items = report.sub_items_fetched,
            skipped = report.items_skipped,
            new_items = report.new_items,
            leads = report.leads_created,
            fetch_failures = report.fetch_failures.len(),
            item_failures,
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Scrape finished"
        );

        Ok(report)
    }

    /// Analyzes one new item, stores a lead if it is one, then marks it.
    /// Returns whether a new lead was created.
    async fn process_item(
        &self,
        search: &Search,
        item: &PlatformItem,
        context: &AnalysisContext,
    ) -> anyhow::Result<bool> {
        let analysis = self.analyzer.analyze(&item.text(), context).await?;

        let mut created = false;
        if let Some(result) = &analysis {
            let saved = self
                .store
                .save_lead(NewLead {
                    search_id: search.id.clone(),
                    source: item.source.clone(),
                    source_type: item.kind.as_str().to_string(),
                    source_id: item.id.clone(),
                    parent_item_id: item.parent_item_id.clone(),
                    title: item.title.clone(),
                    content: item.body.clone(),
                    author: item.author.clone(),
                    url: item.url.clone(),
                    target: item.target.clone(),
                    matched_keywords: result.matched_keywords.clone(),
                    detected_pattern: result.detected_pattern.clone(),
                    opportunity_type: result.opportunity_type.clone(),
                    relevance_score: result.relevance_score,
                })
                .await?;

            if let SavedLead::Created(lead) = saved {
                created = true;
                self.notifier.notify(NotificationEvent::LeadCreated {
                    search_id: search.id.clone(),
                    lead_id: lead.id,
                    source_id: lead.source_id,
                    url: lead.url,
                    title: lead.title,
                    author: lead.author,
                    relevance_score: lead.relevance_score,
                    matched_keywords: lead.matched_keywords,
                });
            }
        }

        self.ledger
            .mark(&search.id, item, analysis.is_some())
            .await?;
        Ok(created)
    }
}
