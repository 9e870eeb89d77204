use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Prefix for environment variables that override file settings.
pub const ENV_PREFIX: &str = "LEADHARVEST_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub platform: PlatformConfig,

    pub jobs: JobsConfig,

    pub scheduler: SchedulerConfig,

    pub analysis: AnalysisConfig,

    pub notifications: NotificationConfig,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Event bus buffer size (default: 100)
    pub event_bus_buffer_size: usize,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/leadharvest.db".to_string(),
            log_level: "info".to_string(),
            event_bus_buffer_size: 100,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

/// Upstream platform access: budget, retry policy and hard ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub base_url: String,

    pub user_agent: String,

    /// Per-request timeout applied by the HTTP client.
    pub connection_timeout_seconds: u64,

    /// Global request budget across every in-flight search.
    pub max_requests_per_minute: u32,

    /// Minimum gap between two consecutive requests.
    pub rate_limit_delay_ms: u64,

    /// Total attempts per operation, including the first one.
    pub retry_attempts: u32,

    pub retry_base_delay_ms: u64,

    pub retry_max_delay_ms: u64,

    /// Ceiling on items fetched per search, split evenly across its targets.
    pub max_items_per_search: u32,

    /// Ceiling on sub-items fetched per item.
    pub max_sub_items_per_item: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.reddit.com".to_string(),
            user_agent: "leadharvest/0.1 (lead discovery)".to_string(),
            connection_timeout_seconds: 30,
            max_requests_per_minute: 60,
            rate_limit_delay_ms: 1000,
            retry_attempts: 3,
            retry_base_delay_ms: 2000,
            retry_max_delay_ms: 30_000,
            max_items_per_search: 1000,
            max_sub_items_per_item: 500,
        }
    }
}

impl PlatformConfig {
    #[must_use]
    pub const fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    #[must_use]
    pub const fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    #[must_use]
    pub const fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Minimum time between two scrapes of the same search.
    pub cooldown_minutes: u64,

    /// A running job older than this is considered dead and marked failed.
    pub stale_job_timeout_minutes: u64,

    /// How long finished jobs stay visible to status queries.
    pub retention_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            cooldown_minutes: 5,
            stale_job_timeout_minutes: 120,
            retention_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,

    pub check_interval_seconds: u64,

    pub cron_expression: Option<String>,

    /// Due searches processed in parallel within one tick.
    pub max_concurrent_searches: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 60,
            cron_expression: None,
            max_concurrent_searches: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Reuse stored results for text that was already analyzed.
    pub cache_enabled: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub webhooks_enabled: bool,

    pub webhook_timeout_seconds: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhooks_enabled: true,
            webhook_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub metrics_port: Option<u16>,

    /// Fetch run records kept in memory for summaries.
    pub metrics_history_size: usize,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "leadharvest".to_string());

        Self {
            metrics_enabled: true,
            metrics_port: None,
            metrics_history_size: 1000,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("config.toml")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("leadharvest").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".leadharvest").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    /// Applies `LEADHARVEST_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides using `lookup` to resolve variable names.
    ///
    /// Unknown variables are ignored; a known variable with an unparsable value
    /// is an error.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = get("DATABASE_PATH") {
            self.general.database_path = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.general.log_level = v;
        }

        let platform = &mut self.platform;
        override_num(&get, "MAX_REQUESTS_PER_MINUTE", &mut platform.max_requests_per_minute)?;
        override_num(&get, "RATE_LIMIT_DELAY_MS", &mut platform.rate_limit_delay_ms)?;
        override_num(&get, "RETRY_ATTEMPTS", &mut platform.retry_attempts)?;
        override_num(&get, "RETRY_BASE_DELAY_MS", &mut platform.retry_base_delay_ms)?;
        override_num(&get, "RETRY_MAX_DELAY_MS", &mut platform.retry_max_delay_ms)?;
        override_num(
            &get,
            "CONNECTION_TIMEOUT_SECONDS",
            &mut platform.connection_timeout_seconds,
        )?;
        override_num(&get, "MAX_ITEMS_PER_SEARCH", &mut platform.max_items_per_search)?;
        override_num(&get, "MAX_SUB_ITEMS_PER_ITEM", &mut platform.max_sub_items_per_item)?;

        override_num(&get, "JOB_COOLDOWN_MINUTES", &mut self.jobs.cooldown_minutes)?;
        override_num(
            &get,
            "SCHEDULER_CHECK_INTERVAL_SECONDS",
            &mut self.scheduler.check_interval_seconds,
        )?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let platform = &self.platform;

        if platform.base_url.trim().is_empty() {
            anyhow::bail!("Platform base URL cannot be empty");
        }

        if platform.user_agent.trim().is_empty() {
            anyhow::bail!("Platform user agent cannot be empty");
        }

        if platform.max_requests_per_minute == 0 {
            anyhow::bail!("max_requests_per_minute must be > 0");
        }

        if platform.retry_attempts == 0 {
            anyhow::bail!("retry_attempts must be >= 1");
        }

        if platform.connection_timeout_seconds == 0 {
            anyhow::bail!("connection_timeout_seconds must be > 0");
        }

        if platform.max_items_per_search == 0 || platform.max_sub_items_per_item == 0 {
            anyhow::bail!("Item ceilings must be > 0");
        }

        if platform.retry_max_delay_ms < platform.retry_base_delay_ms {
            anyhow::bail!("retry_max_delay_ms must be >= retry_base_delay_ms");
        }

        if self.scheduler.enabled
            && self.scheduler.check_interval_seconds == 0
            && self.scheduler.cron_expression.is_none()
        {
            anyhow::bail!("Scheduler interval must be > 0 or cron expression must be set");
        }

        if self.scheduler.max_concurrent_searches == 0 {
            anyhow::bail!("max_concurrent_searches must be >= 1");
        }

        Ok(())
    }
}

fn override_num<T, G>(get: &G, name: &str, target: &mut T) -> Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {ENV_PREFIX}{name}: {e}"))?;
    }
    Ok(())
}
