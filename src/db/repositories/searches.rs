use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::{FetchParams, Schedule, ScrapeStatus, Search, SearchId};
use crate::entities::{prelude::*, searches};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use tracing::warn;

/// Repository for search configuration and run state
pub struct SearchRepository {
    conn: DatabaseConnection,
}

impl SearchRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn map_model(m: searches::Model) -> Result<Search> {
        let parse_opt = |raw: Option<&String>| -> Result<Option<DateTime<Utc>>> {
            raw.map(String::as_str).map(parse_timestamp).transpose()
        };

        let schedule = Schedule::from_parts(&m.scraping_mode, m.scraping_interval.as_deref())
            .with_context(|| format!("Invalid schedule on search {}", m.id))?;

        let params: FetchParams = serde_json::from_str(&m.fetch_params)
            .with_context(|| format!("Invalid fetch params on search {}", m.id))?;

        let last_status = m
            .scrape_status
            .as_deref()
            .map(str::parse::<ScrapeStatus>)
            .transpose()?;

        Ok(Search {
            targets: serde_json::from_str(&m.targets)?,
            keywords: serde_json::from_str(&m.keywords)?,
            patterns: serde_json::from_str(&m.patterns)?,
            params,
            schedule,
            enabled: m.enabled,
            webhook_url: m.webhook_url,
            last_run_at: parse_opt(m.last_scrape_at.as_ref())?,
            next_run_at: parse_opt(m.next_scrape_at.as_ref())?,
            last_status,
            last_error: m.scrape_error,
            last_started_at: parse_opt(m.scrape_started_at.as_ref())?,
            last_completed_at: parse_opt(m.scrape_completed_at.as_ref())?,
            name: m.name,
            id: SearchId::from(m.id),
        })
    }

    fn map_models(rows: Vec<searches::Model>) -> Vec<Search> {
        rows.into_iter()
            .filter_map(|row| {
                let id = row.id.clone();
                match Self::map_model(row) {
                    Ok(search) => Some(search),
                    Err(e) => {
                        warn!(search_id = %id, error = %e, "Skipping unreadable search row");
                        None
                    }
                }
            })
            .collect()
    }

    pub async fn get(&self, id: &SearchId) -> Result<Option<Search>> {
        Searches::find_by_id(id.as_str())
            .one(&self.conn)
            .await?
            .map(Self::map_model)
            .transpose()
    }

    pub async fn list_all(&self) -> Result<Vec<Search>> {
        let rows = Searches::find()
            .order_by_asc(searches::Column::CreatedAt)
            .all(&self.conn)
            .await?;

        Ok(Self::map_models(rows))
    }

    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Search>> {
        let rows = Searches::find()
            .filter(searches::Column::Enabled.eq(true))
            .filter(searches::Column::ScrapingMode.eq(Schedule::SCHEDULED))
            .filter(searches::Column::NextScrapeAt.is_not_null())
            .filter(searches::Column::NextScrapeAt.lte(format_timestamp(now)))
            .order_by_asc(searches::Column::NextScrapeAt)
            .all(&self.conn)
            .await?;

        Ok(Self::map_models(rows))
    }

    pub async fn save(&self, search: &Search) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let fmt_opt = |at: Option<DateTime<Utc>>| at.map(format_timestamp);

        let active_model = searches::ActiveModel {
            id: Set(search.id.to_string()),
            name: Set(search.name.clone()),
            targets: Set(serde_json::to_string(&search.targets)?),
            keywords: Set(serde_json::to_string(&search.keywords)?),
            patterns: Set(serde_json::to_string(&search.patterns)?),
            fetch_params: Set(serde_json::to_string(&search.params)?),
            scraping_mode: Set(search.schedule.mode().to_string()),
            scraping_interval: Set(search.schedule.interval().map(|i| i.as_str().to_string())),
            enabled: Set(search.enabled),
            webhook_url: Set(search.webhook_url.clone()),
            last_scrape_at: Set(fmt_opt(search.last_run_at)),
            next_scrape_at: Set(fmt_opt(search.next_run_at)),
            scrape_status: Set(search.last_status.map(|s| s.as_str().to_string())),
            scrape_started_at: Set(fmt_opt(search.last_started_at)),
            scrape_completed_at: Set(fmt_opt(search.last_completed_at)),
            scrape_error: Set(search.last_error.clone()),
            created_at: Set(now.clone()),
            updated_at: Set(now),
        };

        Searches::insert(active_model)
            .on_conflict(
                OnConflict::column(searches::Column::Id)
                    .update_columns([
                        searches::Column::Name,
                        searches::Column::Targets,
                        searches::Column::Keywords,
                        searches::Column::Patterns,
                        searches::Column::FetchParams,
                        searches::Column::ScrapingMode,
                        searches::Column::ScrapingInterval,
                        searches::Column::Enabled,
                        searches::Column::WebhookUrl,
                        searches::Column::LastScrapeAt,
                        searches::Column::NextScrapeAt,
                        searches::Column::ScrapeStatus,
                        searches::Column::ScrapeStartedAt,
                        searches::Column::ScrapeCompletedAt,
                        searches::Column::ScrapeError,
                        searches::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn record_run(
        &self,
        id: &SearchId,
        last_run_at: DateTime<Utc>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        Searches::update_many()
            .col_expr(
                searches::Column::LastScrapeAt,
                Expr::value(format_timestamp(last_run_at)),
            )
            .col_expr(
                searches::Column::NextScrapeAt,
                Expr::value(next_run_at.map(format_timestamp)),
            )
            .col_expr(
                searches::Column::UpdatedAt,
                Expr::value(format_timestamp(Utc::now())),
            )
            .filter(searches::Column::Id.eq(id.as_str()))
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn set_status(
        &self,
        id: &SearchId,
        status: ScrapeStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = format_timestamp(Utc::now());

        let mut update = Searches::update_many()
            .col_expr(searches::Column::ScrapeStatus, Expr::value(status.as_str()))
            .col_expr(
                searches::Column::ScrapeError,
                Expr::value(error.map(ToString::to_string)),
            )
            .col_expr(searches::Column::UpdatedAt, Expr::value(now.clone()));

        update = match status {
            ScrapeStatus::Running => update
                .col_expr(searches::Column::ScrapeStartedAt, Expr::value(now))
                .col_expr(
                    searches::Column::ScrapeCompletedAt,
                    Expr::value(Option::<String>::None),
                ),
            ScrapeStatus::Completed | ScrapeStatus::Failed => {
                update.col_expr(searches::Column::ScrapeCompletedAt, Expr::value(now))
            }
        };

        update
            .filter(searches::Column::Id.eq(id.as_str()))
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn set_enabled(&self, id: &SearchId, enabled: bool) -> Result<bool> {
        let result = Searches::update_many()
            .col_expr(searches::Column::Enabled, Expr::value(enabled))
            .col_expr(
                searches::Column::UpdatedAt,
                Expr::value(format_timestamp(Utc::now())),
            )
            .filter(searches::Column::Id.eq(id.as_str()))
            .exec(&self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    pub async fn remove(&self, id: &SearchId) -> Result<bool> {
        let result = Searches::delete_by_id(id.as_str())
            .exec(&self.conn)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
