use crate::db::format_timestamp;
use crate::domain::SearchId;
use crate::entities::{leads, prelude::*};
use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use tracing::debug;

/// Repository for lead operations
pub struct LeadRepository {
    conn: DatabaseConnection,
}

impl LeadRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn map_model(m: leads::Model) -> Lead {
        Lead {
            id: m.id,
            search_id: SearchId::from(m.search_id),
            source: m.source,
            source_type: m.source_type,
            source_id: m.source_id,
            parent_item_id: m.parent_item_id,
            title: m.title,
            content: m.content,
            author: m.author,
            url: m.url,
            target: m.target,
            matched_keywords: serde_json::from_str(&m.matched_keywords).unwrap_or_default(),
            detected_pattern: m.detected_pattern,
            opportunity_type: m.opportunity_type,
            relevance_score: m.relevance_score,
            status: m.status,
            created_at: m.created_at,
        }
    }

    async fn find_by_identity(
        &self,
        search_id: &str,
        source: &str,
        source_id: &str,
    ) -> Result<Option<Lead>> {
        let row = Leads::find()
            .filter(leads::Column::SearchId.eq(search_id))
            .filter(leads::Column::Source.eq(source))
            .filter(leads::Column::SourceId.eq(source_id))
            .one(&self.conn)
            .await?;

        Ok(row.map(Self::map_model))
    }

    /// Idempotent on (search, source, source id): a second save of the same
    /// item returns the stored lead instead of failing.
    pub async fn save(&self, lead: NewLead) -> Result<SavedLead> {
        let search_id = lead.search_id.to_string();

        if let Some(existing) = self
            .find_by_identity(&search_id, &lead.source, &lead.source_id)
            .await?
        {
            debug!(source_id = %lead.source_id, "Lead already stored");
            return Ok(SavedLead::Existing(existing));
        }

        let active_model = leads::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            search_id: Set(search_id.clone()),
            source: Set(lead.source.clone()),
            source_type: Set(lead.source_type),
            source_id: Set(lead.source_id.clone()),
            parent_item_id: Set(lead.parent_item_id),
            title: Set(lead.title),
            content: Set(lead.content),
            author: Set(lead.author),
            url: Set(lead.url),
            target: Set(lead.target),
            matched_keywords: Set(serde_json::to_string(&lead.matched_keywords)?),
            detected_pattern: Set(lead.detected_pattern),
            opportunity_type: Set(lead.opportunity_type),
            relevance_score: Set(lead.relevance_score),
            status: Set("new".to_string()),
            created_at: Set(format_timestamp(Utc::now())),
        };

        if let Err(e) = Leads::insert(active_model).exec(&self.conn).await {
            // A concurrent insert of the same item wins the unique index.
            return match self
                .find_by_identity(&search_id, &lead.source, &lead.source_id)
                .await?
            {
                Some(existing) => Ok(SavedLead::Existing(existing)),
                None => Err(e.into()),
            };
        }

        let stored = self
            .find_by_identity(&search_id, &lead.source, &lead.source_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Lead {} vanished after insert", lead.source_id))?;

        Ok(SavedLead::Created(stored))
    }

    pub async fn list_for_search(&self, search_id: &SearchId, limit: u64) -> Result<Vec<Lead>> {
        let rows = Leads::find()
            .filter(leads::Column::SearchId.eq(search_id.as_str()))
            .order_by_desc(leads::Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(Self::map_model).collect())
    }

    pub async fn count_for_search(&self, search_id: &SearchId) -> Result<u64> {
        let count = Leads::find()
            .filter(leads::Column::SearchId.eq(search_id.as_str()))
            .count(&self.conn)
            .await?;

        Ok(count)
    }
}

// ============================================================================
// Data Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub id: String,
    pub search_id: SearchId,
    pub source: String,
    pub source_type: String,
    pub source_id: String,
    pub parent_item_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub author: String,
    pub url: String,
    pub target: String,
    pub matched_keywords: Vec<String>,
    pub detected_pattern: Option<String>,
    pub opportunity_type: Option<String>,
    pub relevance_score: f64,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub search_id: SearchId,
    pub source: String,
    pub source_type: String,
    pub source_id: String,
    pub parent_item_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    pub author: String,
    pub url: String,
    pub target: String,
    pub matched_keywords: Vec<String>,
    pub detected_pattern: Option<String>,
    pub opportunity_type: Option<String>,
    pub relevance_score: f64,
}

#[derive(Debug, Clone)]
pub enum SavedLead {
    Created(Lead),
    Existing(Lead),
}

impl SavedLead {
    #[must_use]
    pub const fn lead(&self) -> &Lead {
        match self {
            Self::Created(lead) | Self::Existing(lead) => lead,
        }
    }

    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}
