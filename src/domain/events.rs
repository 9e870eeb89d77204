//! Domain events for the application.
//!
//! Events are published on the event bus and consumed by listeners such as
//! the webhook dispatcher.

use serde::Serialize;

use super::SearchId;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum NotificationEvent {
    ScrapeStarted {
        search_id: SearchId,
        search_name: String,
    },
    ScrapeCompleted {
        search_id: SearchId,
        search_name: String,
        items_fetched: usize,
        new_items: usize,
        leads_created: usize,
        failures: usize,
        duration_seconds: f64,
    },
    ScrapeFailed {
        search_id: SearchId,
        search_name: String,
        error: String,
    },
    LeadCreated {
        search_id: SearchId,
        lead_id: String,
        source_id: String,
        url: String,
        title: Option<String>,
        author: String,
        relevance_score: f64,
        matched_keywords: Vec<String>,
    },
}

impl NotificationEvent {
    /// Wire name used for outbound webhooks.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ScrapeStarted { .. } => "job.started",
            Self::ScrapeCompleted { .. } => "job.completed",
            Self::ScrapeFailed { .. } => "job.failed",
            Self::LeadCreated { .. } => "lead.created",
        }
    }

    #[must_use]
    pub const fn search_id(&self) -> &SearchId {
        match self {
            Self::ScrapeStarted { search_id, .. }
            | Self::ScrapeCompleted { search_id, .. }
            | Self::ScrapeFailed { search_id, .. }
            | Self::LeadCreated { search_id, .. } => search_id,
        }
    }
}
