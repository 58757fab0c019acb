//! Remote catalog contracts: one-call-per-page [`CatalogApi`] implementations
//! and the [`CatalogClient`] that layers pagination and chunking on top.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use steamshelf_core::{CatalogItemWithWeights, ItemRef, TaxonomyEntry};
use steamshelf_storage::FetchError;
use thiserror::Error;
use tracing::debug;

mod steam;

pub use steam::{SteamApiConfig, SteamWebApi, DEFAULT_STEAM_API_BASE_URL};

pub const CRATE_NAME: &str = "steamshelf-client";

/// Identifier listing page size requested from the remote.
pub const DEFAULT_PAGE_SIZE: usize = 50_000;

/// Ids per detail request.
pub const DEFAULT_DETAIL_CHUNK_SIZE: usize = 250;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unexpected response from {endpoint}: {message}")]
    Protocol {
        endpoint: &'static str,
        message: String,
    },
    #[error("encoding request for {endpoint}: {source}")]
    Encode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// One taxonomy response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaxonomyPage {
    pub entries: Vec<TaxonomyEntry>,
    pub version_hash: Option<u64>,
}

/// One identifier listing page plus its continuation cursor.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemListPage {
    pub items: Vec<ItemRef>,
    pub have_more_results: bool,
    pub last_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDetail {
    pub item: CatalogItemWithWeights,
    pub unavailable_in_region: bool,
}

/// Raw remote capabilities, exactly one remote call per method invocation.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn tag_list(&self, since_hash: Option<u64>) -> Result<TaxonomyPage, ClientError>;

    async fn item_list_page(
        &self,
        since_time: Option<i64>,
        after_id: Option<i64>,
        max_results: usize,
    ) -> Result<ItemListPage, ClientError>;

    async fn item_details(&self, ids: &[i64]) -> Result<Vec<ItemDetail>, ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxonomyListing {
    pub entries: Vec<TaxonomyEntry>,
    pub hash: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedItemIds {
    pub ids: Vec<ItemRef>,
    /// Cursor to persist once these ids are applied. Equals the requested
    /// `since_time` when nothing was listed.
    pub as_of_time: Option<i64>,
}

/// The three operations the reconciler needs from the remote catalog.
#[async_trait]
pub trait RemoteCatalog: Send + Sync {
    /// Tags, or an empty listing when `since_hash` is still current.
    async fn list_taxonomy(&self, since_hash: Option<u64>) -> Result<TaxonomyListing, ClientError>;

    async fn list_updated_item_ids(
        &self,
        since_time: Option<i64>,
    ) -> Result<UpdatedItemIds, ClientError>;

    /// Details for `ids`, minus items unavailable in the configured region.
    async fn fetch_item_details(
        &self,
        ids: &[i64],
    ) -> Result<Vec<CatalogItemWithWeights>, ClientError>;
}

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
    pub page_size: usize,
    pub detail_chunk_size: usize,
    /// Detail chunks in flight at once; 1 keeps requests strictly sequential.
    pub detail_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            detail_chunk_size: DEFAULT_DETAIL_CHUNK_SIZE,
            detail_concurrency: 1,
        }
    }
}

fn unix_now() -> i64 {
    Utc::now().timestamp()
}

pub struct CatalogClient<A> {
    api: A,
    config: ClientConfig,
    clock: fn() -> i64,
}

impl<A: CatalogApi> CatalogClient<A> {
    pub fn new(api: A, config: ClientConfig) -> Self {
        Self {
            api,
            config,
            clock: unix_now,
        }
    }

    /// Replaces the unix-seconds clock used to stamp listings.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }
}

#[async_trait]
impl<A: CatalogApi> RemoteCatalog for CatalogClient<A> {
    async fn list_taxonomy(&self, since_hash: Option<u64>) -> Result<TaxonomyListing, ClientError> {
        let page = self.api.tag_list(since_hash).await?;
        if page.entries.is_empty() {
            return Ok(TaxonomyListing {
                entries: Vec::new(),
                hash: page.version_hash.or(since_hash).unwrap_or_default(),
            });
        }

        let hash = page.version_hash.ok_or_else(|| ClientError::Protocol {
            endpoint: "tag_list",
            message: format!("{} tags returned without a version hash", page.entries.len()),
        })?;
        Ok(TaxonomyListing {
            entries: page.entries,
            hash,
        })
    }

    async fn list_updated_item_ids(
        &self,
        since_time: Option<i64>,
    ) -> Result<UpdatedItemIds, ClientError> {
        let started_at = (self.clock)();
        let page_size = self.config.page_size.max(1);

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut after_id = None;
        let mut pages = 0usize;

        loop {
            let page = self.api.item_list_page(since_time, after_id, page_size).await?;
            pages += 1;

            if pages == 1 && page.items.is_empty() {
                debug!(?since_time, "first listing page empty; keeping cursor");
                return Ok(UpdatedItemIds {
                    ids: Vec::new(),
                    as_of_time: since_time,
                });
            }

            debug!(page = pages, items = page.items.len(), more = page.have_more_results, "listing page");
            for item in page.items {
                if seen.insert(item.id) {
                    ids.push(item);
                }
            }

            if !page.have_more_results {
                break;
            }
            match page.last_id {
                Some(last) if after_id.map_or(true, |prev| last > prev) => after_id = Some(last),
                other => {
                    return Err(ClientError::Protocol {
                        endpoint: "item_list_page",
                        message: format!(
                            "more results announced but cursor {other:?} does not advance past {after_id:?}"
                        ),
                    })
                }
            }
        }

        Ok(UpdatedItemIds {
            ids,
            as_of_time: Some(started_at),
        })
    }

    async fn fetch_item_details(
        &self,
        ids: &[i64],
    ) -> Result<Vec<CatalogItemWithWeights>, ClientError> {
        let mut seen = HashSet::new();
        let unique = ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect::<Vec<_>>();
        if unique.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = unique
            .chunks(self.config.detail_chunk_size.max(1))
            .map(<[i64]>::to_vec)
            .collect::<Vec<_>>();
        let total = chunks.len();

        let pages: Vec<Vec<ItemDetail>> = stream::iter(chunks.into_iter().enumerate())
            .map(|(index, chunk)| async move {
                debug!(chunk = index + 1, total, ids = chunk.len(), "fetching item details");
                self.api.item_details(&chunk).await
            })
            .buffered(self.config.detail_concurrency.max(1))
            .try_collect()
            .await?;

        let mut filtered = 0usize;
        let items = pages
            .into_iter()
            .flatten()
            .filter_map(|detail| {
                if detail.unavailable_in_region {
                    filtered += 1;
                    None
                } else {
                    Some(detail.item)
                }
            })
            .collect::<Vec<_>>();
        if filtered > 0 {
            debug!(filtered, "dropped items unavailable in region");
        }
        Ok(items)
    }
}
