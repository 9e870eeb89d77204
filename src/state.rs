use std::sync::Arc;
use std::time::Duration;

use crate::clients::{PlatformConnector, RedditClient, WebhookClient};
use crate::config::Config;
use crate::db::Store;
use crate::services::{
    Analyzer, CachingAnalyzer, EventBus, FetchOrchestrator, JobTracker, KeywordAnalyzer,
    MetricsCollector, RateLimiter, RetryPolicy, ScrapeService, Scheduler, WebhookDispatcher,
};

/// Build a shared HTTP client for every outbound call.
/// Reusing one client keeps connections pooled.
fn build_shared_http_client(timeout_seconds: u64, user_agent: &str) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .user_agent(user_agent)
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build shared HTTP client: {e}"))
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub store: Store,

    /// Process-wide upstream budget; every platform request goes through it.
    pub limiter: Arc<RateLimiter>,

    pub tracker: JobTracker,

    pub metrics: Arc<MetricsCollector>,

    pub event_bus: EventBus,

    pub scrape: Arc<ScrapeService>,

    pub scheduler: Scheduler,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let http_client = build_shared_http_client(
            config.platform.connection_timeout_seconds,
            &config.platform.user_agent,
        )?;

        let limiter = Arc::new(RateLimiter::new(
            config.platform.max_requests_per_minute,
            config.platform.rate_limit_delay(),
        ));

        let connector: Arc<dyn PlatformConnector> = Arc::new(
            RedditClient::with_shared_client(http_client.clone(), &config.platform.base_url)
                .with_page_limiter(limiter.clone()),
        );

        Ok(Self::with_connector(config, store, connector, limiter, http_client))
    }

    /// Wires every service around an already built connector and store.
    #[must_use]
    pub fn with_connector(
        config: Config,
        store: Store,
        connector: Arc<dyn PlatformConnector>,
        limiter: Arc<RateLimiter>,
        http_client: reqwest::Client,
    ) -> Self {
        let metrics = Arc::new(MetricsCollector::new(
            config.observability.metrics_history_size,
        ));
        let tracker = JobTracker::from_config(&config.jobs);
        let event_bus = EventBus::new(config.general.event_bus_buffer_size);

        // Webhooks use their own timeout, not the platform one.
        let webhook_http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.notifications.webhook_timeout_seconds))
            .build()
            .unwrap_or(http_client);
        let dispatcher = Arc::new(WebhookDispatcher::new(
            store.clone(),
            WebhookClient::with_shared_client(webhook_http),
            config.notifications.webhooks_enabled,
        ));
        if tokio::runtime::Handle::try_current().is_ok() {
            dispatcher.start_listener(&event_bus);
        }

        let orchestrator = Arc::new(FetchOrchestrator::new(
            connector,
            limiter.clone(),
            RetryPolicy::from_config(&config.platform),
            metrics.clone(),
        ));
        let mut analyzer: Arc<dyn Analyzer> = Arc::new(KeywordAnalyzer);
        if config.analysis.cache_enabled {
            analyzer = Arc::new(CachingAnalyzer::new(analyzer, store.clone()));
        }

        let scrape = Arc::new(ScrapeService::new(
            store.clone(),
            orchestrator,
            analyzer,
            tracker.clone(),
            Arc::new(event_bus.clone()),
            &config.platform,
        ));

        let scheduler = Scheduler::new(scrape.clone(), store.clone(), config.scheduler.clone());

        Self {
            config: Arc::new(config),
            store,
            limiter,
            tracker,
            metrics,
            event_bus,
            scrape,
            scheduler,
        }
    }
}
