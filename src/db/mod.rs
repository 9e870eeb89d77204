use crate::domain::{ScrapeStatus, Search, SearchId};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::analysis_cache::CachedAnalysis;
pub use repositories::leads::{Lead, NewLead, SavedLead};
pub use repositories::scraped_items::ItemKey;

/// Timestamps are stored as fixed-width UTC RFC 3339 strings so that
/// lexicographic order matches chronological order.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let path_str = db_url.trim_start_matches("sqlite:").trim_start_matches("//");
        let in_memory = path_str.starts_with(":memory:") || path_str.contains("mode=memory");

        if !in_memory {
            let file_path = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(file_path).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(file_path).exists() {
                std::fs::File::create(file_path)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn search_repo(&self) -> repositories::searches::SearchRepository {
        repositories::searches::SearchRepository::new(self.conn.clone())
    }

    fn lead_repo(&self) -> repositories::leads::LeadRepository {
        repositories::leads::LeadRepository::new(self.conn.clone())
    }

    fn analysis_cache_repo(&self) -> repositories::analysis_cache::AnalysisCacheRepository {
        repositories::analysis_cache::AnalysisCacheRepository::new(self.conn.clone())
    }

    fn scraped_repo(&self) -> repositories::scraped_items::ScrapedItemRepository {
        repositories::scraped_items::ScrapedItemRepository::new(self.conn.clone())
    }

    // Searches

    pub async fn get_search(&self, id: &SearchId) -> Result<Option<Search>> {
        self.search_repo().get(id).await
    }

    pub async fn list_searches(&self) -> Result<Vec<Search>> {
        self.search_repo().list_all().await
    }

    /// Enabled, scheduled searches whose next run is at or before `now`.
    pub async fn list_due_searches(&self, now: DateTime<Utc>) -> Result<Vec<Search>> {
        self.search_repo().list_due(now).await
    }

    pub async fn save_search(&self, search: &Search) -> Result<()> {
        self.search_repo().save(search).await
    }

    /// Records a finished run: `last_run_at` and the next due time.
    pub async fn save_search_state(
        &self,
        id: &SearchId,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.search_repo()
            .record_run(id, last_run_at, next_run_at)
            .await
    }

    pub async fn set_scrape_status(
        &self,
        id: &SearchId,
        status: ScrapeStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.search_repo().set_status(id, status, error).await
    }

    pub async fn set_search_enabled(&self, id: &SearchId, enabled: bool) -> Result<bool> {
        self.search_repo().set_enabled(id, enabled).await
    }

    pub async fn remove_search(&self, id: &SearchId) -> Result<bool> {
        self.search_repo().remove(id).await
    }

    // Leads

    /// Inserts a lead unless one already exists for the same item.
    pub async fn save_lead(&self, lead: NewLead) -> Result<SavedLead> {
        self.lead_repo().save(lead).await
    }

    pub async fn list_leads(&self, search_id: &SearchId, limit: u64) -> Result<Vec<Lead>> {
        self.lead_repo().list_for_search(search_id, limit).await
    }

    pub async fn count_leads(&self, search_id: &SearchId) -> Result<u64> {
        self.lead_repo().count_for_search(search_id).await
    }

    // Dedup ledger

    /// Subset of `keys` already recorded for the search.
    pub async fn find_scraped(
        &self,
        search_id: &SearchId,
        keys: &[ItemKey],
    ) -> Result<HashSet<ItemKey>> {
        self.scraped_repo().find_existing(search_id, keys).await
    }

    pub async fn mark_scraped(
        &self,
        search_id: &SearchId,
        key: &ItemKey,
        url: &str,
        created_lead: bool,
    ) -> Result<()> {
        self.scraped_repo()
            .mark(search_id, key, url, created_lead)
            .await
    }

    pub async fn count_scraped(&self, search_id: &SearchId) -> Result<u64> {
        self.scraped_repo().count_for_search(search_id).await
    }

    // Analysis cache

    pub async fn get_cached_analysis(
        &self,
        cache_key: &str,
        cache_type: &str,
    ) -> Result<Option<CachedAnalysis>> {
        self.analysis_cache_repo().get(cache_key, cache_type).await
    }

    pub async fn set_cached_analysis(
        &self,
        cache_key: &str,
        cache_type: &str,
        result: Option<String>,
        text: &str,
    ) -> Result<()> {
        self.analysis_cache_repo()
            .put(cache_key, cache_type, result, text)
            .await
    }
}
