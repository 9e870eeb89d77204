//! Ledger of items already processed per search.
//!
//! The `scraped_items` table is the source of truth; its unique index on
//! (search, source, item id) makes `mark` idempotent. A process-local set
//! short-circuits repeated lookups for keys seen recently.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use tracing::debug;

use crate::db::{ItemKey, Store};
use crate::domain::{PlatformItem, SearchId};

/// The cache is dropped wholesale once it grows past this many keys.
const MAX_CACHED_KEYS: usize = 100_000;

pub struct DedupLedger {
    store: Store,
    known: Mutex<HashSet<(SearchId, ItemKey)>>,
}

impl DedupLedger {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            known: Mutex::new(HashSet::new()),
        }
    }

    fn known(&self) -> MutexGuard<'_, HashSet<(SearchId, ItemKey)>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remember(&self, search_id: &SearchId, keys: impl IntoIterator<Item = ItemKey>) {
        let mut known = self.known();
        if known.len() > MAX_CACHED_KEYS {
            known.clear();
        }
        known.extend(keys.into_iter().map(|k| (search_id.clone(), k)));
    }

    /// Items that have not been recorded for the search yet, in input order.
    /// Repeats within the batch are dropped too.
    pub async fn filter(
        &self,
        search_id: &SearchId,
        items: Vec<PlatformItem>,
    ) -> Result<Vec<PlatformItem>> {
        let total = items.len();
        let mut seen = HashSet::with_capacity(total);

        let candidates: Vec<PlatformItem> = {
            let known = self.known();
            items
                .into_iter()
                .filter(|item| !item.id.is_empty())
                .filter(|item| {
                    let key = ItemKey::new(&item.source, &item.id);
                    !known.contains(&(search_id.clone(), key.clone())) && seen.insert(key)
                })
                .collect()
        };

        let keys: Vec<ItemKey> = candidates
            .iter()
            .map(|item| ItemKey::new(&item.source, &item.id))
            .collect();

        let recorded = self.store.find_scraped(search_id, &keys).await?;
        self.remember(search_id, recorded.iter().cloned());

        let fresh: Vec<PlatformItem> = candidates
            .into_iter()
            .filter(|item| !recorded.contains(&ItemKey::new(&item.source, &item.id)))
            .collect();

        debug!(
            search_id = %search_id,
            total,
            new = fresh.len(),
            "Filtered already processed items"
        );

        Ok(fresh)
    }

    /// Records the item as processed. Safe to call repeatedly.
    pub async fn mark(
        &self,
        search_id: &SearchId,
        item: &PlatformItem,
        produced_lead: bool,
    ) -> Result<()> {
        let key = ItemKey::new(&item.source, &item.id);
        self.store
            .mark_scraped(search_id, &key, &item.url, produced_lead)
            .await?;
        self.remember(search_id, [key]);
        Ok(())
    }
}
