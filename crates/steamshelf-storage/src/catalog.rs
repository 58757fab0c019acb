use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use steamshelf_core::{
    CatalogItem, CatalogItemWithWeights, ItemTag, ItemTaxonomyWeight, ItemView, TaxonomyEntry,
};
use thiserror::Error;
use tokio::sync::Mutex;

/// Postgres SQLSTATE for foreign key violations.
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("item {item_id} references unknown tag {tag_id}")]
    UnknownTag { item_id: i64, tag_id: i64 },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True when the write referenced a tag that is not in `taxonomy`.
    pub fn is_referential(&self) -> bool {
        match self {
            StoreError::UnknownTag { .. } => true,
            StoreError::Database(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION)
            }
            _ => false,
        }
    }
}

/// Set-based writer (and reader) for the catalog tables.
///
/// Every write method is one all-or-nothing transaction and treats empty
/// input as a successful no-op.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn upsert_taxonomy(&self, entries: &[TaxonomyEntry]) -> Result<(), StoreError>;

    async fn upsert_catalog_items(&self, items: &[CatalogItemWithWeights])
        -> Result<(), StoreError>;

    /// Every stored item exactly once, with its weighted tags.
    async fn list_items_with_tags(&self) -> Result<Vec<ItemView>, StoreError>;
}

/// Collapses duplicate ids (last occurrence wins), ordered by id.
pub(crate) fn collapse_taxonomy(entries: &[TaxonomyEntry]) -> Vec<&TaxonomyEntry> {
    entries
        .iter()
        .map(|e| (e.id, e))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect()
}

/// Splits a detail batch into item rows and weight rows, collapsing
/// duplicates the same way as [`collapse_taxonomy`].
pub(crate) fn collapse_catalog(
    items: &[CatalogItemWithWeights],
) -> (Vec<&CatalogItem>, Vec<ItemTaxonomyWeight>) {
    let rows = items
        .iter()
        .map(|i| (i.id(), &i.item))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect();
    let weights = items
        .iter()
        .flat_map(|i| i.weight_rows())
        .map(|w| ((w.item_id, w.tag_id), w))
        .collect::<BTreeMap<_, _>>()
        .into_values()
        .collect();
    (rows, weights)
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    taxonomy: BTreeMap<i64, String>,
    items: BTreeMap<i64, CatalogItem>,
    weights: BTreeMap<(i64, i64), i64>,
}

/// In-process [`CatalogStore`] with the same key, conflict, and referential
/// rules as the relational schema. Writes are staged on a copy and swapped in
/// on success.
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    state: Mutex<MemoryState>,
    commits: AtomicUsize,
    reject_writes: AtomicBool,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StoreError::Unavailable`].
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of non-empty transactions committed so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub async fn taxonomy(&self) -> Vec<TaxonomyEntry> {
        let state = self.state.lock().await;
        state
            .taxonomy
            .iter()
            .map(|(id, name)| TaxonomyEntry::new(*id, name.clone()))
            .collect()
    }

    pub async fn items(&self) -> Vec<CatalogItem> {
        self.state.lock().await.items.values().cloned().collect()
    }

    pub async fn weights(&self) -> Vec<ItemTaxonomyWeight> {
        let state = self.state.lock().await;
        state
            .weights
            .iter()
            .map(|(&(item_id, tag_id), &weight)| ItemTaxonomyWeight {
                item_id,
                tag_id,
                weight,
            })
            .collect()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes rejected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn upsert_taxonomy(&self, entries: &[TaxonomyEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.check_writable()?;

        let mut state = self.state.lock().await;
        for entry in collapse_taxonomy(entries) {
            state.taxonomy.insert(entry.id, entry.name.clone());
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert_catalog_items(
        &self,
        items: &[CatalogItemWithWeights],
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        self.check_writable()?;

        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        let (rows, weights) = collapse_catalog(items);
        for item in rows {
            staged.items.insert(item.id, item.clone());
        }
        for w in weights {
            if !staged.taxonomy.contains_key(&w.tag_id) {
                return Err(StoreError::UnknownTag {
                    item_id: w.item_id,
                    tag_id: w.tag_id,
                });
            }
            staged.weights.insert((w.item_id, w.tag_id), w.weight);
        }
        *state = staged;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_items_with_tags(&self) -> Result<Vec<ItemView>, StoreError> {
        let state = self.state.lock().await;
        let mut views = state
            .items
            .values()
            .map(|item| (item.id, ItemView::from_item(item)))
            .collect::<BTreeMap<_, _>>();
        for (&(item_id, tag_id), &weight) in &state.weights {
            if let Some(view) = views.get_mut(&item_id) {
                view.tags.push(ItemTag {
                    id: tag_id,
                    name: state.taxonomy.get(&tag_id).cloned().unwrap_or_default(),
                    weight,
                });
            }
        }
        Ok(views.into_values().collect())
    }
}
