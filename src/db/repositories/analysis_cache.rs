use crate::db::format_timestamp;
use crate::entities::{analysis_cache, prelude::*};
use anyhow::Result;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

/// Stored previews are cut to this many characters.
const PREVIEW_CHARS: usize = 1000;

/// A stored analysis verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAnalysis {
    /// JSON result, or `None` when the text was judged not to be a lead.
    pub result: Option<String>,
    pub use_count: i64,
}

/// Repository for cached analysis results
pub struct AnalysisCacheRepository {
    conn: DatabaseConnection,
}

impl AnalysisCacheRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Looks up an entry and bumps its usage stats on a hit.
    pub async fn get(&self, cache_key: &str, cache_type: &str) -> Result<Option<CachedAnalysis>> {
        let Some(entry) = AnalysisCache::find()
            .filter(analysis_cache::Column::CacheKey.eq(cache_key))
            .filter(analysis_cache::Column::CacheType.eq(cache_type))
            .one(&self.conn)
            .await?
        else {
            return Ok(None);
        };

        AnalysisCache::update_many()
            .col_expr(
                analysis_cache::Column::UseCount,
                Expr::col(analysis_cache::Column::UseCount).add(1),
            )
            .col_expr(
                analysis_cache::Column::LastUsedAt,
                Expr::value(format_timestamp(Utc::now())),
            )
            .filter(analysis_cache::Column::Id.eq(entry.id))
            .exec(&self.conn)
            .await?;

        Ok(Some(CachedAnalysis {
            result: entry.result,
            use_count: entry.use_count + 1,
        }))
    }

    /// Stores a verdict, replacing the result of an existing entry.
    pub async fn put(
        &self,
        cache_key: &str,
        cache_type: &str,
        result: Option<String>,
        text: &str,
    ) -> Result<()> {
        let now = format_timestamp(Utc::now());
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();

        let active_model = analysis_cache::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            cache_key: Set(cache_key.to_string()),
            cache_type: Set(cache_type.to_string()),
            result: Set(result),
            text_preview: Set(Some(preview)),
            use_count: Set(1),
            created_at: Set(now.clone()),
            last_used_at: Set(now),
        };

        AnalysisCache::insert(active_model)
            .on_conflict(
                OnConflict::columns([
                    analysis_cache::Column::CacheKey,
                    analysis_cache::Column::CacheType,
                ])
                .update_columns([
                    analysis_cache::Column::Result,
                    analysis_cache::Column::TextPreview,
                    analysis_cache::Column::LastUsedAt,
                ])
                .to_owned(),
            )
            .exec(&self.conn)
            .await?;

        Ok(())
    }
}
