//! Steam Web API implementation of [`CatalogApi`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use steamshelf_core::{CatalogItem, CatalogItemWithWeights, ItemRef, TagWeight, TaxonomyEntry};
use steamshelf_storage::HttpFetcher;
use tracing::debug;

use crate::{CatalogApi, ClientError, ItemDetail, ItemListPage, TaxonomyPage};

pub const DEFAULT_STEAM_API_BASE_URL: &str = "https://api.steampowered.com";

const TAG_LIST_ENDPOINT: &str = "IStoreService/GetTagList/v1";
const APP_LIST_ENDPOINT: &str = "IStoreService/GetAppList/v1";
const GET_ITEMS_ENDPOINT: &str = "IStoreBrowseService/GetItems/v1";

/// Tags requested per item in detail calls.
const TAGS_PER_ITEM: u32 = 20;

#[derive(Debug, Clone)]
pub struct SteamApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub language: String,
    pub country_code: String,
}

impl SteamApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_STEAM_API_BASE_URL.to_string(),
            api_key: api_key.into(),
            language: "english".to_string(),
            country_code: "US".to_string(),
        }
    }
}

pub struct SteamWebApi {
    http: Arc<HttpFetcher>,
    config: SteamApiConfig,
}

impl SteamWebApi {
    pub fn new(http: Arc<HttpFetcher>, config: SteamApiConfig) -> Self {
        Self { http, config }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}/", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    async fn get<T>(&self, endpoint: &str, mut query: Vec<(&str, String)>) -> Result<T, ClientError>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        query.insert(0, ("key", self.config.api_key.clone()));
        let envelope: Envelope<T> = self.http.get_json(endpoint, &self.url(endpoint), &query).await?;
        Ok(envelope.response)
    }
}

#[async_trait]
impl CatalogApi for SteamWebApi {
    async fn tag_list(&self, since_hash: Option<u64>) -> Result<TaxonomyPage, ClientError> {
        let mut query = vec![("language", self.config.language.clone())];
        if let Some(hash) = since_hash {
            query.push(("have_version_hash", hash.to_string()));
        }
        let response: TagListResponse = self.get(TAG_LIST_ENDPOINT, query).await?;
        Ok(response.into())
    }

    async fn item_list_page(
        &self,
        since_time: Option<i64>,
        after_id: Option<i64>,
        max_results: usize,
    ) -> Result<ItemListPage, ClientError> {
        let mut query = vec![
            ("max_results", max_results.to_string()),
            ("include_games", "true".to_string()),
        ];
        if let Some(since) = since_time {
            query.push(("if_modified_since", since.to_string()));
        }
        if let Some(last) = after_id {
            query.push(("last_appid", last.to_string()));
        }
        let response: AppListResponse = self.get(APP_LIST_ENDPOINT, query).await?;
        Ok(response.into())
    }

    async fn item_details(&self, ids: &[i64]) -> Result<Vec<ItemDetail>, ClientError> {
        let request = GetItemsRequest {
            ids: ids.iter().map(|&appid| ItemIdRef { appid }).collect(),
            context: RequestContext {
                language: &self.config.language,
                country_code: &self.config.country_code,
            },
            data_request: DataRequest {
                include_basic_info: true,
                include_reviews: true,
                include_tag_count: TAGS_PER_ITEM,
            },
        };
        let input_json = serde_json::to_string(&request).map_err(|source| ClientError::Encode {
            endpoint: GET_ITEMS_ENDPOINT,
            source,
        })?;

        let response: GetItemsResponse = self
            .get(GET_ITEMS_ENDPOINT, vec![("input_json", input_json)])
            .await?;
        Ok(response.into_details())
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
struct Envelope<T> {
    #[serde(default)]
    response: T,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(u64),
    Text(String),
}

/// Steam sends 64-bit hashes as strings; accept either form.
fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Number(n)) => Ok(Some(n)),
        Some(NumberOrText::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(s)) => s.trim().parse().map(Some).map_err(de::Error::custom),
    }
}

#[derive(Debug, Default, Deserialize)]
struct TagListResponse {
    #[serde(default, deserialize_with = "lenient_u64")]
    version_hash: Option<u64>,
    #[serde(default)]
    tags: Vec<WireTag>,
}

#[derive(Debug, Deserialize)]
struct WireTag {
    tagid: i64,
    name: String,
}

impl From<TagListResponse> for TaxonomyPage {
    fn from(value: TagListResponse) -> Self {
        TaxonomyPage {
            entries: value
                .tags
                .into_iter()
                .map(|t| TaxonomyEntry::new(t.tagid, t.name))
                .collect(),
            version_hash: value.version_hash,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct AppListResponse {
    #[serde(default)]
    apps: Vec<WireApp>,
    #[serde(default)]
    have_more_results: bool,
    #[serde(default)]
    last_appid: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireApp {
    appid: i64,
    #[serde(default)]
    name: String,
}

impl From<AppListResponse> for ItemListPage {
    fn from(value: AppListResponse) -> Self {
        ItemListPage {
            items: value
                .apps
                .into_iter()
                .map(|a| ItemRef::new(a.appid, a.name))
                .collect(),
            have_more_results: value.have_more_results,
            last_id: value.last_appid,
        }
    }
}

#[derive(Serialize)]
struct GetItemsRequest<'a> {
    ids: Vec<ItemIdRef>,
    context: RequestContext<'a>,
    data_request: DataRequest,
}

#[derive(Serialize)]
struct ItemIdRef {
    appid: i64,
}

#[derive(Serialize)]
struct RequestContext<'a> {
    language: &'a str,
    country_code: &'a str,
}

#[derive(Serialize)]
struct DataRequest {
    include_basic_info: bool,
    include_reviews: bool,
    include_tag_count: u32,
}

#[derive(Debug, Default, Deserialize)]
struct GetItemsResponse {
    #[serde(default)]
    store_items: Vec<WireStoreItem>,
}

impl GetItemsResponse {
    fn into_details(self) -> Vec<ItemDetail> {
        self.store_items
            .into_iter()
            .filter_map(WireStoreItem::into_detail)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct WireStoreItem {
    #[serde(default)]
    appid: Option<i64>,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    success: Option<i64>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    color: Option<String>,
    // Field name as spelled by the remote.
    #[serde(default)]
    unvailable_for_country_restriction: bool,
    #[serde(default)]
    basic_info: Option<WireBasicInfo>,
    #[serde(default)]
    reviews: Option<WireReviews>,
    #[serde(default)]
    tags: Vec<WireTagWeight>,
}

#[derive(Debug, Deserialize)]
struct WireBasicInfo {
    #[serde(default)]
    short_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireReviews {
    #[serde(default)]
    summary_filtered: Option<WireReviewSummary>,
}

#[derive(Debug, Deserialize)]
struct WireReviewSummary {
    #[serde(default)]
    review_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WireTagWeight {
    tagid: i64,
    #[serde(default)]
    weight: i64,
}

impl WireStoreItem {
    fn into_detail(self) -> Option<ItemDetail> {
        let Some(id) = self.appid.or(self.id) else {
            debug!("skipping store item without id");
            return None;
        };
        if self.success.is_some_and(|code| code != 1) {
            debug!(id, success = self.success, "skipping store item lookup failure");
            return None;
        }

        let description = self
            .basic_info
            .and_then(|b| b.short_description)
            .unwrap_or_default();
        let popularity = self
            .reviews
            .and_then(|r| r.summary_filtered)
            .and_then(|s| s.review_count);

        Some(ItemDetail {
            item: CatalogItemWithWeights {
                item: CatalogItem::with_defaults(
                    id,
                    self.name.unwrap_or_default(),
                    description,
                    self.color,
                    popularity,
                ),
                weights: self
                    .tags
                    .into_iter()
                    .map(|t| TagWeight {
                        tag_id: t.tagid,
                        weight: t.weight,
                    })
                    .collect(),
            },
            unavailable_in_region: self.unvailable_for_country_restriction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steamshelf_core::DEFAULT_ITEM_COLOR;

    #[test]
    fn tag_list_accepts_string_version_hash() {
        let env: Envelope<TagListResponse> = serde_json::from_str(
            r#"{"response":{"version_hash":"77","tags":[{"tagid":1,"name":"Action"},{"tagid":2,"name":"RPG"}]}}"#,
        )
        .unwrap();
        let page = TaxonomyPage::from(env.response);
        assert_eq!(page.version_hash, Some(77));
        assert_eq!(
            page.entries,
            vec![TaxonomyEntry::new(1, "Action"), TaxonomyEntry::new(2, "RPG")]
        );
    }

    #[test]
    fn unchanged_tag_list_decodes_as_empty_page() {
        let env: Envelope<TagListResponse> =
            serde_json::from_str(r#"{"response":{"version_hash":77}}"#).unwrap();
        let page = TaxonomyPage::from(env.response);
        assert!(page.entries.is_empty());

        let bare: Envelope<TagListResponse> = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(TaxonomyPage::from(bare.response), TaxonomyPage::default());
    }

    #[test]
    fn app_list_maps_cursor_pair() {
        let env: Envelope<AppListResponse> = serde_json::from_str(
            r#"{"response":{"apps":[{"appid":10,"name":"Game A","last_modified":1000,"price_change_number":5}],"have_more_results":true,"last_appid":10}}"#,
        )
        .unwrap();
        let page = ItemListPage::from(env.response);
        assert_eq!(page.items, vec![ItemRef::new(10, "Game A")]);
        assert!(page.have_more_results);
        assert_eq!(page.last_id, Some(10));
    }

    #[test]
    fn store_items_default_missing_fields_and_flag_region_locks() {
        let env: Envelope<GetItemsResponse> = serde_json::from_str(
            r#"{"response":{"store_items":[
                {"item_type":0,"id":10,"success":1,"appid":10,"name":"Game A",
                 "basic_info":{"short_description":"Fast."},
                 "reviews":{"summary_filtered":{"review_count":321}},
                 "tags":[{"tagid":1,"weight":5}]},
                {"appid":11,"success":1,"name":"Game B","unvailable_for_country_restriction":true},
                {"id":12,"success":42}
            ]}}"#,
        )
        .unwrap();
        let details = env.response.into_details();
        assert_eq!(details.len(), 2);

        let a = &details[0];
        assert!(!a.unavailable_in_region);
        assert_eq!(a.item.item.description, "Fast.");
        assert_eq!(a.item.item.popularity, 321);
        assert_eq!(a.item.item.color, DEFAULT_ITEM_COLOR);
        assert_eq!(a.item.weights, vec![TagWeight { tag_id: 1, weight: 5 }]);

        let b = &details[1];
        assert!(b.unavailable_in_region);
        assert_eq!(b.item.item.popularity, 0);
    }

    #[test]
    fn get_items_request_encodes_ids_and_region() {
        let request = GetItemsRequest {
            ids: vec![ItemIdRef { appid: 10 }, ItemIdRef { appid: 11 }],
            context: RequestContext {
                language: "english",
                country_code: "DE",
            },
            data_request: DataRequest {
                include_basic_info: true,
                include_reviews: true,
                include_tag_count: TAGS_PER_ITEM,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["ids"][1]["appid"], 11);
        assert_eq!(value["context"]["country_code"], "DE");
        assert_eq!(value["data_request"]["include_tag_count"], 20);
    }
}
