use crate::db::format_timestamp;
use crate::domain::SearchId;
use crate::entities::{prelude::*, scraped_items};
use anyhow::Result;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set};
use std::collections::HashSet;

/// `IN (...)` lists are split to stay well under SQLite's bound-parameter limit.
const LOOKUP_CHUNK: usize = 500;

/// Natural identity of an item within one search.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub source: String,
    pub source_id: String,
}

impl ItemKey {
    #[must_use]
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
        }
    }
}

/// Repository for the dedup ledger
pub struct ScrapedItemRepository {
    conn: DatabaseConnection,
}

impl ScrapedItemRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn find_existing(
        &self,
        search_id: &SearchId,
        keys: &[ItemKey],
    ) -> Result<HashSet<ItemKey>> {
        let mut found = HashSet::new();

        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let ids: Vec<String> = chunk.iter().map(|k| k.source_id.clone()).collect();

            let rows = ScrapedItems::find()
                .filter(scraped_items::Column::SearchId.eq(search_id.as_str()))
                .filter(scraped_items::Column::SourceId.is_in(ids))
                .all(&self.conn)
                .await?;

            found.extend(
                rows.into_iter()
                    .map(|r| ItemKey::new(r.source, r.source_id))
                    .filter(|k| chunk.contains(k)),
            );
        }

        Ok(found)
    }

    /// Upserts the ledger row, refreshing `processed_at` and the lead flag.
    pub async fn mark(
        &self,
        search_id: &SearchId,
        key: &ItemKey,
        url: &str,
        created_lead: bool,
    ) -> Result<()> {
        let active_model = scraped_items::ActiveModel {
            search_id: Set(search_id.to_string()),
            source: Set(key.source.clone()),
            source_id: Set(key.source_id.clone()),
            url: Set(url.to_string()),
            processed_at: Set(format_timestamp(Utc::now())),
            created_lead: Set(created_lead),
            ..Default::default()
        };

        ScrapedItems::insert(active_model)
            .on_conflict(
                OnConflict::columns([
                    scraped_items::Column::SearchId,
                    scraped_items::Column::Source,
                    scraped_items::Column::SourceId,
                ])
                .update_columns([
                    scraped_items::Column::Url,
                    scraped_items::Column::ProcessedAt,
                    scraped_items::Column::CreatedLead,
                ])
                .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn count_for_search(&self, search_id: &SearchId) -> Result<u64> {
        let count = ScrapedItems::find()
            .filter(scraped_items::Column::SearchId.eq(search_id.as_str()))
            .count(&self.conn)
            .await?;

        Ok(count)
    }
}
