//! Domain types for lead harvesting with strong typing.
//!
//! Searches, their schedules and fetch parameters, and the items a platform
//! connector returns. Persistence rows are mapped into these types by the
//! repositories so invalid combinations never reach the services.

pub mod events;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for a configured search.
///
/// # Examples
///
/// ```rust
/// use leadharvest::domain::SearchId;
///
/// let id = SearchId::new("abc");
/// assert_eq!(id.as_str(), "abc");
/// assert_eq!(id.to_string(), "abc");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchId(String);

impl SearchId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SearchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SearchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SearchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    #[error("Unknown scrape interval '{0}' (expected 30m, 1h, 6h or 24h)")]
    UnknownInterval(String),

    #[error("Unknown scraping mode '{0}' (expected scheduled or one_time)")]
    UnknownMode(String),

    #[error("Scheduled searches require an interval")]
    MissingInterval,

    #[error("One-time searches cannot have an interval")]
    UnexpectedInterval,

    #[error("Unknown {kind} value '{value}'")]
    UnknownValue { kind: &'static str, value: String },
}

/// How often a scheduled search runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ScrapeInterval {
    ThirtyMinutes,
    #[default]
    OneHour,
    SixHours,
    TwentyFourHours,
}

impl ScrapeInterval {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ThirtyMinutes => "30m",
            Self::OneHour => "1h",
            Self::SixHours => "6h",
            Self::TwentyFourHours => "24h",
        }
    }

    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        match self {
            Self::ThirtyMinutes => chrono::Duration::minutes(30),
            Self::OneHour => chrono::Duration::hours(1),
            Self::SixHours => chrono::Duration::hours(6),
            Self::TwentyFourHours => chrono::Duration::hours(24),
        }
    }
}

impl FromStr for ScrapeInterval {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "30m" => Ok(Self::ThirtyMinutes),
            "1h" => Ok(Self::OneHour),
            "6h" => Ok(Self::SixHours),
            "24h" => Ok(Self::TwentyFourHours),
            other => Err(DomainError::UnknownInterval(other.to_string())),
        }
    }
}

impl TryFrom<String> for ScrapeInterval {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ScrapeInterval> for String {
    fn from(value: ScrapeInterval) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ScrapeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling mode of a search.
///
/// A scheduled search always carries an interval and a one-time search never
/// does, so the pairing cannot be violated once a value exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "interval", rename_all = "snake_case")]
pub enum Schedule {
    Scheduled(ScrapeInterval),
    OneTime,
}

impl Schedule {
    pub const SCHEDULED: &'static str = "scheduled";
    pub const ONE_TIME: &'static str = "one_time";

    /// Builds a schedule from its stored mode and interval columns.
    pub fn from_parts(mode: &str, interval: Option<&str>) -> Result<Self, DomainError> {
        match (mode, interval) {
            (Self::SCHEDULED, Some(raw)) => Ok(Self::Scheduled(raw.parse()?)),
            (Self::SCHEDULED, None) => Err(DomainError::MissingInterval),
            (Self::ONE_TIME, None) => Ok(Self::OneTime),
            (Self::ONE_TIME, Some(_)) => Err(DomainError::UnexpectedInterval),
            (other, _) => Err(DomainError::UnknownMode(other.to_string())),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> &'static str {
        match self {
            Self::Scheduled(_) => Self::SCHEDULED,
            Self::OneTime => Self::ONE_TIME,
        }
    }

    #[must_use]
    pub const fn interval(&self) -> Option<ScrapeInterval> {
        match self {
            Self::Scheduled(interval) => Some(*interval),
            Self::OneTime => None,
        }
    }

    /// Next run time after a run that finished at `last_run`.
    #[must_use]
    pub fn next_run_after(&self, last_run: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.interval().map(|i| last_run + i.duration())
    }
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DomainError::UnknownValue {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Listing order requested from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Hot,
    #[default]
    New,
    Top,
    Rising,
}

string_enum!(SortOrder, "sort", { Hot => "hot", New => "new", Top => "top", Rising => "rising" });

/// Time window for `top` listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

string_enum!(TimeWindow, "time window", {
    Hour => "hour",
    Day => "day",
    Week => "week",
    Month => "month",
    Year => "year",
    All => "all",
});

/// Parameters controlling how much is fetched for one search run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchParams {
    /// Items requested per target.
    pub item_limit: u32,
    /// Sub-items requested per item.
    pub sub_item_limit: u32,
    pub sort: SortOrder,
    pub time_window: TimeWindow,
    pub include_sub_items: bool,
    /// Items scored below this are skipped before analysis.
    pub min_score: Option<i64>,
    /// Items older than this are skipped before analysis.
    pub max_age_hours: Option<u32>,
}

impl Default for FetchParams {
    fn default() -> Self {
        Self {
            item_limit: 100,
            sub_item_limit: 20,
            sort: SortOrder::New,
            time_window: TimeWindow::Day,
            include_sub_items: true,
            min_score: None,
            max_age_hours: None,
        }
    }
}

impl FetchParams {
    /// Clamps limits to the configured ceilings.
    ///
    /// The item ceiling applies to the whole search, so it is divided across
    /// targets with a floor of one item per target.
    #[must_use]
    pub fn clamped(&self, target_count: usize, max_items: u32, max_sub_items: u32) -> Self {
        let targets = u32::try_from(target_count.max(1)).unwrap_or(u32::MAX);
        let per_target = (max_items / targets).max(1);

        Self {
            item_limit: self.item_limit.min(per_target),
            sub_item_limit: self.sub_item_limit.min(max_sub_items),
            ..self.clone()
        }
    }

    /// Whether the item passes the score and age thresholds. Items without a
    /// creation time are never too old.
    #[must_use]
    pub fn admits(&self, item: &PlatformItem, now: DateTime<Utc>) -> bool {
        if self.min_score.is_some_and(|min| item.score < min) {
            return false;
        }

        match (self.max_age_hours, item.created_at) {
            (Some(hours), Some(created)) => {
                now - created <= chrono::Duration::hours(i64::from(hours))
            }
            _ => true,
        }
    }
}

/// Outcome of the most recent run, persisted on the search row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeStatus {
    Running,
    Completed,
    Failed,
}

string_enum!(ScrapeStatus, "scrape status", {
    Running => "running",
    Completed => "completed",
    Failed => "failed",
});

/// A configured search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Search {
    pub id: SearchId,
    pub name: String,
    /// Ordered list of targets (subreddits). Empty means the global listing.
    pub targets: Vec<String>,
    pub keywords: Vec<String>,
    /// Intent phrases that mark a post as an opportunity.
    pub patterns: Vec<String>,
    pub params: FetchParams,
    pub schedule: Schedule,
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<ScrapeStatus>,
    pub last_error: Option<String>,
    pub last_started_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
}

impl Search {
    /// New enabled search that is due immediately when scheduled.
    #[must_use]
    pub fn new(name: impl Into<String>, targets: Vec<String>, schedule: Schedule) -> Self {
        let next_run_at = match schedule {
            Schedule::Scheduled(_) => Some(Utc::now()),
            Schedule::OneTime => None,
        };

        Self {
            id: SearchId::generate(),
            name: name.into(),
            targets,
            keywords: Vec::new(),
            patterns: Vec::new(),
            params: FetchParams::default(),
            schedule,
            enabled: true,
            webhook_url: None,
            last_run_at: None,
            next_run_at,
            last_status: None,
            last_error: None,
            last_started_at: None,
            last_completed_at: None,
        }
    }
}

/// Whether a platform item is a top-level post or a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    Comment,
}

string_enum!(ItemKind, "item kind", { Post => "post", Comment => "comment" });

/// A post or comment as returned by a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformItem {
    /// Platform-unique id, e.g. the reddit base36 id.
    pub id: String,
    pub source: String,
    pub kind: ItemKind,
    pub title: Option<String>,
    pub body: String,
    pub author: String,
    pub url: String,
    pub target: String,
    /// Post the comment belongs to.
    pub parent_item_id: Option<String>,
    pub score: i64,
    pub created_at: Option<DateTime<Utc>>,
}

impl PlatformItem {
    /// Title and body joined for analysis.
    #[must_use]
    pub fn text(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => format!("{title}\n\n{}", self.body),
            _ => self.body.clone(),
        }
    }
}
