//! Read-only JSON API over the synced catalog.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use steamshelf_storage::{CatalogStore, WatermarkStore};
use steamshelf_sync::{maybe_build_scheduler, spawn_startup_sync, SyncConfig, SyncPipeline};
use tokio::net::TcpListener;
use tracing::{error, info};

pub const CRATE_NAME: &str = "steamshelf-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CatalogStore>,
    pub watermarks: WatermarkStore,
}

impl AppState {
    pub fn new(store: Arc<dyn CatalogStore>, watermarks: WatermarkStore) -> Self {
        Self { store, watermarks }
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/items", get(items_handler))
        .route("/watermark", get(watermark_handler))
        .with_state(Arc::new(state))
}

/// Starts the background startup pass, the optional cron job, and the HTTP
/// server. Sync failures are logged; the server keeps serving whatever the
/// store last committed.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("STEAMSHELF_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let config = SyncConfig::from_env();
    let pipeline = Arc::new(SyncPipeline::from_config(&config).await?);

    let state = AppState::new(pipeline.store(), pipeline.watermarks().clone());
    let _startup = spawn_startup_sync(pipeline.clone());
    let scheduler = maybe_build_scheduler(pipeline, &config).await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!(cron = %config.sync_cron, "sync scheduler started");
    }

    serve(state, port).await
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving catalog API");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn items_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.list_items_with_tags().await {
        Ok(items) => Json(items).into_response(),
        Err(err) => server_error(err),
    }
}

async fn watermark_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.watermarks.load().await).into_response()
}

fn server_error(err: impl std::fmt::Display) -> Response {
    error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use steamshelf_core::{CatalogItem, CatalogItemWithWeights, ItemView, TagWeight, TaxonomyEntry, Watermark};
    use steamshelf_storage::MemoryCatalogStore;
    use tower::ServiceExt;

    async fn state_with_items(dir: &tempfile::TempDir) -> AppState {
        let store = Arc::new(MemoryCatalogStore::new());
        store
            .upsert_taxonomy(&[TaxonomyEntry::new(1, "Action"), TaxonomyEntry::new(2, "RPG")])
            .await
            .unwrap();
        store
            .upsert_catalog_items(&[
                CatalogItemWithWeights {
                    item: CatalogItem::with_defaults(10, "Game A", "Shoot things", None, Some(42)),
                    weights: vec![TagWeight { tag_id: 1, weight: 5 }],
                },
                CatalogItemWithWeights {
                    item: CatalogItem::with_defaults(11, "Game B", "", Some("#102030".into()), None),
                    weights: Vec::new(),
                },
            ])
            .await
            .unwrap();
        AppState::new(store, WatermarkStore::new(dir.path().join("watermark.json")))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn healthz_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(state_with_items(&dir).await), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn items_lists_each_item_with_tags() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = get_json(app(state_with_items(&dir).await), "/items").await;
        assert_eq!(status, StatusCode::OK);

        let items: Vec<ItemView> = serde_json::from_value(body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 10);
        assert_eq!(items[0].popularity, 42);
        assert_eq!(items[0].tags[0].name, "Action");
        assert_eq!(items[0].tags[0].weight, 5);
        assert_eq!(items[1].color, "#102030");
        assert!(items[1].tags.is_empty());
    }

    #[tokio::test]
    async fn watermark_endpoint_shows_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_with_items(&dir).await;
        let (_, empty) = get_json(app(state.clone()), "/watermark").await;
        assert_eq!(empty["taxonomy_hash"], serde_json::Value::Null);

        state
            .watermarks
            .save(&Watermark::default().with_taxonomy_hash(77))
            .await
            .unwrap();
        let (_, saved) = get_json(app(state), "/watermark").await;
        assert_eq!(saved["taxonomy_hash"], 77);
    }
}
