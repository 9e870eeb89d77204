use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{ConnectorError, PlatformConnector};
use crate::domain::{FetchParams, ItemKind, PlatformItem, SortOrder};
use crate::services::RateLimiter;

/// Reddit caps listing pages at 100 entries.
const PAGE_SIZE: u32 = 100;

const SOURCE: &str = "reddit";

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct RedditPost {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    author: Option<String>,
    permalink: String,
    subreddit: String,
    #[serde(default)]
    score: i64,
    created_utc: Option<f64>,
}

/// Read-only client for the public Reddit JSON listings.
#[derive(Clone)]
pub struct RedditClient {
    client: Client,
    base_url: String,
    /// Gates continuation pages; the first page is gated by the caller.
    page_limiter: Option<Arc<RateLimiter>>,
}

impl RedditClient {
    #[must_use]
    pub fn with_shared_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_limiter: None,
        }
    }

    #[must_use]
    pub fn with_page_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.page_limiter = Some(limiter);
        self
    }

    fn listing_url(&self, target: &str, params: &FetchParams, limit: u32, after: Option<&str>) -> String {
        let mut url = format!(
            "{}/r/{}/{}.json?limit={}&raw_json=1",
            self.base_url,
            urlencoding::encode(target),
            params.sort.as_str(),
            limit
        );

        if params.sort == SortOrder::Top {
            url.push_str("&t=");
            url.push_str(params.time_window.as_str());
        }

        if let Some(after) = after {
            url.push_str("&after=");
            url.push_str(&urlencoding::encode(after));
        }

        url
    }

    async fn get_json(&self, url: &str) -> Result<Value, ConnectorError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Reddit API error: {status} - {}", truncate(&body, 200));

            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(ConnectorError::Transient(message))
            } else {
                Err(ConnectorError::Fatal(message))
            };
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ConnectorError::Fatal(format!("Invalid Reddit response: {e}")))
    }

    fn map_post(&self, post: RedditPost) -> PlatformItem {
        PlatformItem {
            url: format!("{}{}", self.base_url, post.permalink),
            id: post.id,
            source: SOURCE.to_string(),
            kind: ItemKind::Post,
            title: Some(post.title),
            body: post.selftext,
            author: post.author.unwrap_or_else(|| "[deleted]".to_string()),
            target: post.subreddit,
            parent_item_id: None,
            score: post.score,
            created_at: post.created_utc.and_then(from_epoch),
        }
    }

    /// Walks a comment tree depth-first, skipping `more` stubs.
    fn collect_comments(&self, node: &Value, post: &PlatformItem, limit: usize, out: &mut Vec<PlatformItem>) {
        let Some(children) = node.pointer("/data/children").and_then(Value::as_array) else {
            return;
        };

        for child in children {
            if out.len() >= limit {
                return;
            }

            if child.get("kind").and_then(Value::as_str) != Some("t1") {
                continue;
            }

            let Some(data) = child.get("data") else {
                continue;
            };

            let Some(id) = data.get("id").and_then(Value::as_str) else {
                continue;
            };

            let str_field = |name: &str| data.get(name).and_then(Value::as_str).unwrap_or_default();

            out.push(PlatformItem {
                id: id.to_string(),
                source: SOURCE.to_string(),
                kind: ItemKind::Comment,
                title: None,
                body: str_field("body").to_string(),
                author: data
                    .get("author")
                    .and_then(Value::as_str)
                    .unwrap_or("[deleted]")
                    .to_string(),
                url: format!("{}{}", self.base_url, str_field("permalink")),
                target: post.target.clone(),
                parent_item_id: Some(post.id.clone()),
                score: data.get("score").and_then(Value::as_i64).unwrap_or_default(),
                created_at: data
                    .get("created_utc")
                    .and_then(Value::as_f64)
                    .and_then(from_epoch),
            });

            // Reddit encodes "no replies" as an empty string.
            if let Some(replies) = data.get("replies").filter(|r| r.is_object()) {
                self.collect_comments(replies, post, limit, out);
            }
        }
    }
}

#[async_trait::async_trait]
impl PlatformConnector for RedditClient {
    fn source(&self) -> &'static str {
        SOURCE
    }

    async fn fetch_items(
        &self,
        target: &str,
        params: &FetchParams,
    ) -> Result<Vec<PlatformItem>, ConnectorError> {
        let wanted = params.item_limit as usize;
        if wanted == 0 {
            return Ok(Vec::new());
        }

        let mut items = Vec::with_capacity(wanted.min(PAGE_SIZE as usize));
        let mut after: Option<String> = None;

        loop {
            if !items.is_empty()
                && let Some(limiter) = &self.page_limiter
            {
                limiter.acquire().await;
            }

            let remaining = u32::try_from(wanted - items.len()).unwrap_or(PAGE_SIZE);
            let url = self.listing_url(target, params, remaining.min(PAGE_SIZE), after.as_deref());
            let value = self.get_json(&url).await?;

            let listing: Listing<RedditPost> = serde_json::from_value(value)
                .map_err(|e| ConnectorError::Fatal(format!("Invalid listing for r/{target}: {e}")))?;

            let page_len = listing.data.children.len();
            items.extend(
                listing
                    .data
                    .children
                    .into_iter()
                    .filter(|t| t.kind == "t3")
                    .map(|t| self.map_post(t.data)),
            );

            after = listing.data.after;
            if page_len == 0 || after.is_none() || items.len() >= wanted {
                break;
            }
        }

        items.truncate(wanted);
        debug!(subreddit = target, count = items.len(), "Fetched listing");
        Ok(items)
    }

    async fn fetch_sub_items(
        &self,
        item: &PlatformItem,
        params: &FetchParams,
    ) -> Result<Vec<PlatformItem>, ConnectorError> {
        let url = format!(
            "{}/comments/{}.json?limit={}&raw_json=1",
            self.base_url,
            urlencoding::encode(&item.id),
            params.sub_item_limit
        );

        let value = self.get_json(&url).await?;

        // [post listing, comment listing]
        let Some(tree) = value.get(1) else {
            return Err(ConnectorError::Fatal(format!(
                "Unexpected comments payload for {}",
                item.id
            )));
        };

        let mut comments = Vec::new();
        self.collect_comments(tree, item, params.sub_item_limit as usize, &mut comments);
        Ok(comments)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs as i64, 0)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
