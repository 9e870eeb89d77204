pub mod analysis;
pub mod dedup;
pub mod fetch;
pub mod job_tracker;
pub mod metrics;
pub mod notify;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod scrape;

pub use analysis::{AnalysisContext, AnalysisResult, Analyzer, CachingAnalyzer, KeywordAnalyzer};
pub use dedup::DedupLedger;
pub use fetch::{FetchFailure, FetchOrchestrator, FetchOutcome};
pub use job_tracker::{JobStatus, JobToken, JobTracker, StartDecision, StartRejection};
pub use metrics::{FetchRunMetrics, MetricsCollector, MetricsSummary};
pub use notify::{EventBus, Notifier, WebhookDispatcher};
pub use rate_limiter::RateLimiter;
pub use retry::{RetryPolicy, RetryReport, Retryable};
pub use scheduler::{Scheduler, TickSummary};
pub use scrape::{ScrapeDecision, ScrapeError, ScrapeReport, ScrapeService, ScrapeStatusView};
