//! Core domain model shared by the steamshelf crates.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "steamshelf-core";

/// Color stored for items whose store record carries no color.
pub const DEFAULT_ITEM_COLOR: &str = "#ffffff";

/// Popularity stored for items whose store record carries no review count.
pub const DEFAULT_ITEM_POPULARITY: i64 = 0;

/// A store tag (genre, theme, feature...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonomyEntry {
    pub id: i64,
    pub name: String,
}

impl TaxonomyEntry {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Core fields of a catalog item as persisted in `items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub color: String,
    pub popularity: i64,
}

impl CatalogItem {
    /// Builds an item, substituting the documented defaults for absent
    /// color and popularity.
    pub fn with_defaults(
        id: i64,
        name: impl Into<String>,
        description: impl Into<String>,
        color: Option<String>,
        popularity: Option<i64>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            color: color
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ITEM_COLOR.to_string()),
            popularity: popularity.unwrap_or(DEFAULT_ITEM_POPULARITY),
        }
    }
}

/// Weight of one tag on an item, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagWeight {
    pub tag_id: i64,
    pub weight: i64,
}

/// Detail-fetch result: an item plus its weighted tag associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItemWithWeights {
    pub item: CatalogItem,
    #[serde(default)]
    pub weights: Vec<TagWeight>,
}

impl CatalogItemWithWeights {
    pub fn id(&self) -> i64 {
        self.item.id
    }

    pub fn weight_rows(&self) -> impl Iterator<Item = ItemTaxonomyWeight> + '_ {
        self.weights.iter().map(move |w| ItemTaxonomyWeight {
            item_id: self.item.id,
            tag_id: w.tag_id,
            weight: w.weight,
        })
    }
}

/// Row of `item_taxonomy_weight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemTaxonomyWeight {
    pub item_id: i64,
    pub tag_id: i64,
    pub weight: i64,
}

/// Identifier listing entry: `(id, name)` of an item updated upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: i64,
    pub name: String,
}

impl ItemRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Persisted sync progress. `None` means the feed has never completed a pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    #[serde(default)]
    pub taxonomy_hash: Option<u64>,
    #[serde(default)]
    pub catalog_cursor: Option<i64>,
}

impl Watermark {
    pub fn is_empty(&self) -> bool {
        self.taxonomy_hash.is_none() && self.catalog_cursor.is_none()
    }

    pub fn with_taxonomy_hash(mut self, hash: u64) -> Self {
        self.taxonomy_hash = Some(hash);
        self
    }

    pub fn with_catalog_cursor(mut self, cursor: Option<i64>) -> Self {
        self.catalog_cursor = cursor;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    Taxonomy,
    Catalog,
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feed::Taxonomy => f.write_str("taxonomy"),
            Feed::Catalog => f.write_str("catalog"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn for_cursor<T>(cursor: Option<T>) -> Self {
        if cursor.is_some() {
            SyncMode::Incremental
        } else {
            SyncMode::Full
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Incremental => f.write_str("incremental"),
        }
    }
}

/// Read-model tag attached to an [`ItemView`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTag {
    pub id: i64,
    pub name: String,
    pub weight: i64,
}

/// Read-model row: one item with all of its weighted tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemView {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub color: String,
    pub popularity: i64,
    pub tags: Vec<ItemTag>,
}

impl ItemView {
    pub fn from_item(item: &CatalogItem) -> Self {
        Self {
            id: item.id,
            name: item.name.clone(),
            description: item.description.clone(),
            color: item.color.clone(),
            popularity: item.popularity,
            tags: Vec::new(),
        }
    }
}
