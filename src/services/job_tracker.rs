//! In-process registry of scrape jobs.
//!
//! Guarantees at most one active job per search, enforces the cooldown between
//! runs and self-heals jobs whose worker died without reporting back. Finished
//! jobs stay queryable for a retention window and are then reaped.
//!
//! The registry lives in one process; running several scheduler replicas
//! against the same database would need a durable lock instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::JobsConfig;
use crate::domain::SearchId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Identifies one run of a search. Only the holder of the token of the
/// current job can finish it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct JobToken(u64);

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub token: JobToken,
    pub search_id: SearchId,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// Snapshot returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: Job,
    pub elapsed_seconds: f64,
}

/// Why a job may not start right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StartRejection {
    AlreadyRunning,
    Cooldown { remaining_seconds: i64 },
    Disabled,
}

impl StartRejection {
    /// Whole minutes left in the cooldown, rounded up.
    #[must_use]
    pub const fn cooldown_remaining_minutes(&self) -> Option<i64> {
        match self {
            Self::Cooldown { remaining_seconds } => Some((*remaining_seconds + 59) / 60),
            _ => None,
        }
    }
}

impl std::fmt::Display for StartRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "Job already running for this search"),
            Self::Cooldown { .. } => write!(
                f,
                "Cooldown period not met. Wait {} more minutes",
                self.cooldown_remaining_minutes().unwrap_or_default()
            ),
            Self::Disabled => write!(f, "Search is disabled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartDecision {
    Allowed,
    Rejected(StartRejection),
}

impl StartDecision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<Mutex<HashMap<SearchId, Job>>>,
    next_token: Arc<AtomicU64>,
    cooldown: Duration,
    stale_timeout: Duration,
    retention: Duration,
}

impl JobTracker {
    #[must_use]
    pub fn new(cooldown: Duration, stale_timeout: Duration, retention: Duration) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(1)),
            cooldown,
            stale_timeout,
            retention,
        }
    }

    #[must_use]
    pub fn from_config(config: &JobsConfig) -> Self {
        let minutes = |m: u64| {
            Duration::try_minutes(i64::try_from(m).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
        };
        let seconds = |s: u64| {
            Duration::try_seconds(i64::try_from(s).unwrap_or(i64::MAX)).unwrap_or(Duration::MAX)
        };

        Self::new(
            minutes(config.cooldown_minutes),
            minutes(config.stale_job_timeout_minutes),
            seconds(config.retention_seconds),
        )
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SearchId, Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops finished jobs past retention and fails active jobs past the
    /// stale timeout. Runs under the caller's lock.
    fn heal(&self, jobs: &mut HashMap<SearchId, Job>, now: DateTime<Utc>) {
        jobs.retain(|_, job| {
            job.status.is_active()
                || job
                    .completed_at
                    .is_none_or(|done| now - done < self.retention)
        });

        for job in jobs.values_mut() {
            if job.status.is_active() && now - job.started_at > self.stale_timeout {
                warn!(
                    search_id = %job.search_id,
                    started_at = %job.started_at,
                    "Job exceeded timeout, marking as failed"
                );
                job.status = JobStatus::Failed;
                job.completed_at = Some(now);
                job.error = Some(format!(
                    "Job timed out after {} minutes",
                    self.stale_timeout.num_minutes()
                ));
                job.duration_seconds = Some(seconds_between(job.started_at, now));
            }
        }
    }

    pub fn is_job_running(&self, search_id: &SearchId) -> bool {
        self.is_job_running_at(search_id, Utc::now())
    }

    pub fn is_job_running_at(&self, search_id: &SearchId, now: DateTime<Utc>) -> bool {
        let mut jobs = self.lock();
        self.heal(&mut jobs, now);
        jobs.get(search_id).is_some_and(|j| j.status.is_active())
    }

    /// Whether a new job may start for the search given its last run time.
    pub fn can_start(&self, search_id: &SearchId, last_run: Option<DateTime<Utc>>) -> StartDecision {
        self.can_start_at(search_id, last_run, Utc::now())
    }

    pub fn can_start_at(
        &self,
        search_id: &SearchId,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> StartDecision {
        if self.is_job_running_at(search_id, now) {
            return StartDecision::Rejected(StartRejection::AlreadyRunning);
        }

        if let Some(last) = last_run {
            let since = now - last;
            if since < self.cooldown {
                return StartDecision::Rejected(StartRejection::Cooldown {
                    remaining_seconds: (self.cooldown - since).num_seconds().max(1),
                });
            }
        }

        StartDecision::Allowed
    }

    /// Registers a running job and returns its token, or `None` if one is
    /// already active.
    ///
    /// This is the only place a job becomes active, and the check and insert
    /// happen under one lock.
    pub fn start_job(&self, search_id: &SearchId) -> Option<JobToken> {
        self.start_job_at(search_id, Utc::now())
    }

    pub fn start_job_at(&self, search_id: &SearchId, now: DateTime<Utc>) -> Option<JobToken> {
        let mut jobs = self.lock();
        self.heal(&mut jobs, now);

        if jobs.get(search_id).is_some_and(|j| j.status.is_active()) {
            warn!(search_id = %search_id, "Job already running, refusing to start");
            return None;
        }

        let token = JobToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        jobs.insert(
            search_id.clone(),
            Job {
                token,
                search_id: search_id.clone(),
                status: JobStatus::Running,
                started_at: now,
                completed_at: None,
                error: None,
                duration_seconds: None,
            },
        );

        info!(event = "job_started", search_id = %search_id, token = token.0, "Started job");
        Some(token)
    }

    /// Whether `token` still names the active job of the search. A job that
    /// was failed by the stale timeout or replaced by a newer run is not.
    pub fn is_current(&self, search_id: &SearchId, token: JobToken) -> bool {
        let mut jobs = self.lock();
        self.heal(&mut jobs, Utc::now());
        jobs.get(search_id)
            .is_some_and(|j| j.token == token && j.status.is_active())
    }

    /// Finishes the job identified by `token`. Returns false, leaving the
    /// table untouched, when that job is no longer the active one.
    pub fn complete_job(
        &self,
        search_id: &SearchId,
        token: JobToken,
        success: bool,
        error: Option<String>,
    ) -> bool {
        self.complete_job_at(search_id, token, success, error, Utc::now())
    }

    pub fn complete_job_at(
        &self,
        search_id: &SearchId,
        token: JobToken,
        success: bool,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        {
            let mut jobs = self.lock();
            let Some(job) = jobs.get_mut(search_id) else {
                warn!(search_id = %search_id, "Attempted to complete untracked job");
                return false;
            };

            if job.token != token || !job.status.is_active() {
                warn!(
                    search_id = %search_id,
                    token = token.0,
                    current_token = job.token.0,
                    "Ignoring completion from superseded job"
                );
                return false;
            }

            job.status = if success {
                JobStatus::Completed
            } else {
                JobStatus::Failed
            };
            job.completed_at = Some(now);
            job.error = error;
            job.duration_seconds = Some(seconds_between(job.started_at, now));

            info!(
                event = "job_finished",
                search_id = %search_id,
                status = ?job.status,
                duration_seconds = job.duration_seconds.unwrap_or_default(),
                "Completed job"
            );
        }

        self.schedule_reap(search_id.clone(), token);
        true
    }

    /// Removes the finished job after the retention window, unless a newer
    /// job has replaced it in the meantime.
    fn schedule_reap(&self, search_id: SearchId, token: JobToken) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let tracker = self.clone();
        let delay = self.retention.to_std().unwrap_or_default();

        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let mut jobs = tracker.lock();
            if jobs
                .get(&search_id)
                .is_some_and(|j| !j.status.is_active() && j.token == token)
            {
                jobs.remove(&search_id);
            }
        });
    }

    #[must_use]
    pub fn job_status(&self, search_id: &SearchId) -> Option<JobSnapshot> {
        self.job_status_at(search_id, Utc::now())
    }

    #[must_use]
    pub fn job_status_at(&self, search_id: &SearchId, now: DateTime<Utc>) -> Option<JobSnapshot> {
        let mut jobs = self.lock();
        self.heal(&mut jobs, now);
        jobs.get(search_id).map(|job| JobSnapshot {
            elapsed_seconds: seconds_between(job.started_at, now),
            job: job.clone(),
        })
    }

    #[must_use]
    pub fn active_jobs(&self) -> Vec<Job> {
        let now = Utc::now();
        let mut jobs = self.lock();
        self.heal(&mut jobs, now);
        jobs.values()
            .filter(|j| j.status.is_active())
            .cloned()
            .collect()
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> JobTracker {
        JobTracker::new(
            Duration::minutes(5),
            Duration::hours(2),
            Duration::seconds(300),
        )
    }

    fn id(s: &str) -> SearchId {
        SearchId::new(s)
    }

    #[test]
    fn test_cooldown_boundaries() {
        let t = tracker();
        let now = Utc::now();
        let search = id("s1");

        let just_inside = now - Duration::minutes(5) + Duration::seconds(1);
        assert_eq!(
            t.can_start_at(&search, Some(just_inside), now),
            StartDecision::Rejected(StartRejection::Cooldown {
                remaining_seconds: 1
            })
        );

        let exactly = now - Duration::minutes(5);
        assert!(t.can_start_at(&search, Some(exactly), now).is_allowed());

        let past = now - Duration::minutes(5) - Duration::seconds(1);
        assert!(t.can_start_at(&search, Some(past), now).is_allowed());

        assert!(t.can_start_at(&search, None, now).is_allowed());
    }

    #[test]
    fn test_cooldown_reason_rounds_minutes_up() {
        let rejection = StartRejection::Cooldown {
            remaining_seconds: 61,
        };
        assert_eq!(rejection.cooldown_remaining_minutes(), Some(2));
        assert_eq!(
            rejection.to_string(),
            "Cooldown period not met. Wait 2 more minutes"
        );
    }

    #[test]
    fn test_start_job_is_exclusive() {
        let t = tracker();
        let search = id("s1");

        assert!(t.start_job(&search).is_some());
        assert!(t.start_job(&search).is_none());
        assert!(t.is_job_running(&search));
        assert_eq!(
            t.can_start(&search, None),
            StartDecision::Rejected(StartRejection::AlreadyRunning)
        );

        // Other searches are independent.
        assert!(t.start_job(&id("s2")).is_some());
        assert_eq!(t.active_jobs().len(), 2);
    }

    #[test]
    fn test_concurrent_start_has_single_winner() {
        let t = tracker();
        let search = id("contended");

        let winners: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| t.start_job(&search).is_some()))
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(winners, 1);
    }

    #[test]
    fn test_complete_allows_restart() {
        let t = tracker();
        let search = id("s1");

        let token = t.start_job(&search).unwrap();
        assert!(t.complete_job(&search, token, true, None));
        assert!(!t.is_job_running(&search));

        let snapshot = t.job_status(&search).unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Completed);
        assert!(snapshot.job.duration_seconds.is_some());

        let next = t.start_job(&search).unwrap();
        assert_ne!(next, token);
    }

    #[test]
    fn test_complete_untracked_is_noop() {
        let t = tracker();
        let token = t.start_job(&id("other")).unwrap();
        assert!(!t.complete_job(&id("ghost"), token, false, Some("boom".to_string())));
        assert!(t.job_status(&id("ghost")).is_none());
    }

    #[test]
    fn test_stale_job_is_reaped() {
        let t = tracker();
        let search = id("s1");
        let start = Utc::now();

        assert!(t.start_job_at(&search, start).is_some());

        let later = start + Duration::hours(2) + Duration::seconds(1);
        assert!(!t.is_job_running_at(&search, later));

        let snapshot = t.job_status_at(&search, later).unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Failed);
        assert!(snapshot.job.error.unwrap().contains("timed out"));

        assert!(t.start_job_at(&search, later).is_some());
    }

    #[test]
    fn test_late_completion_of_stale_job_keeps_replacement_running() {
        let t = tracker();
        let search = id("s1");
        let start = Utc::now();

        let first = t.start_job_at(&search, start).unwrap();

        // The first worker hangs past the timeout and a new run takes over.
        let takeover = start + Duration::hours(2) + Duration::seconds(1);
        let second = t.start_job_at(&search, takeover).unwrap();
        assert_ne!(first, second);

        let late = takeover + Duration::seconds(5);
        assert!(!t.complete_job_at(&search, first, true, None, late));

        assert!(t.is_job_running_at(&search, late));
        assert!(t.start_job_at(&search, late).is_none());
        let snapshot = t.job_status_at(&search, late).unwrap();
        assert_eq!(snapshot.job.token, second);
        assert_eq!(snapshot.job.status, JobStatus::Running);

        assert!(t.complete_job_at(&search, second, true, None, late));
        assert!(!t.is_job_running_at(&search, late));
    }

    #[test]
    fn test_completing_twice_is_ignored() {
        let t = tracker();
        let search = id("s1");

        let token = t.start_job(&search).unwrap();
        assert!(t.complete_job(&search, token, false, Some("boom".to_string())));
        assert!(!t.complete_job(&search, token, true, None));

        let snapshot = t.job_status(&search).unwrap();
        assert_eq!(snapshot.job.status, JobStatus::Failed);
        assert_eq!(snapshot.job.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_finished_jobs_expire_after_retention() {
        let t = tracker();
        let search = id("s1");
        let start = Utc::now();

        let token = t.start_job_at(&search, start).unwrap();
        assert!(t.complete_job_at(&search, token, false, Some("boom".to_string()), start));

        let within = start + Duration::seconds(299);
        assert!(t.job_status_at(&search, within).is_some());

        let after = start + Duration::seconds(301);
        assert!(t.job_status_at(&search, after).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_removes_finished_job() {
        let t = tracker();
        let search = id("s1");

        let token = t.start_job(&search).unwrap();
        t.complete_job(&search, token, true, None);

        tokio::time::sleep(std::time::Duration::from_secs(301)).await;
        tokio::task::yield_now().await;

        assert!(t.lock().get(&search).is_none());
    }
}
