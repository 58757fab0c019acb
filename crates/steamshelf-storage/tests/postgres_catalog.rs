//! Catalog store tests against a live PostgreSQL.
//!
//! Set `STEAMSHELF_TEST_DATABASE_URL` to run them; without it every test
//! returns early. Each test works in its own schema, dropped afterwards.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Row};
use steamshelf_core::{CatalogItem, CatalogItemWithWeights, TagWeight, TaxonomyEntry};
use steamshelf_storage::{CatalogStore, PgCatalogStore};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE taxonomy (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL
    )"#,
    r#"CREATE TABLE items (
        id BIGINT PRIMARY KEY,
        name TEXT,
        description TEXT,
        color TEXT DEFAULT '#ffffff',
        popularity BIGINT DEFAULT 0
    )"#,
    r#"CREATE TABLE item_taxonomy_weight (
        item_id BIGINT NOT NULL REFERENCES items(id),
        tag_id BIGINT NOT NULL REFERENCES taxonomy(id),
        weight BIGINT NOT NULL,
        PRIMARY KEY (item_id, tag_id)
    )"#,
];

struct TestDb {
    admin: PgPool,
    schema: String,
    store: PgCatalogStore,
}

impl TestDb {
    async fn teardown(self) {
        self.store.pool().close().await;
        let _ = sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
            .execute(&self.admin)
            .await;
    }
}

async fn setup(test_name: &str) -> Option<TestDb> {
    let url = std::env::var("STEAMSHELF_TEST_DATABASE_URL").ok()?;
    let admin = PgPool::connect(&url).await.expect("connect admin pool");
    let schema = format!("steamshelf_{}_{}", test_name, std::process::id());
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
        .execute(&admin)
        .await
        .expect("drop old schema");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create schema");

    let search_path = format!("SET search_path TO {schema}");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .after_connect(move |conn, _meta| {
            let search_path = search_path.clone();
            Box::pin(async move {
                conn.execute(search_path.as_str()).await?;
                Ok::<(), sqlx::Error>(())
            })
        })
        .connect(&url)
        .await
        .expect("connect scoped pool");
    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await.expect("create table");
    }

    Some(TestDb {
        admin,
        schema,
        store: PgCatalogStore::new(pool),
    })
}

fn item(id: i64, name: &str, color: Option<&str>, weights: &[(i64, i64)]) -> CatalogItemWithWeights {
    CatalogItemWithWeights {
        item: CatalogItem::with_defaults(id, name, format!("{name} blurb"), color.map(String::from), None),
        weights: weights
            .iter()
            .map(|&(tag_id, weight)| TagWeight { tag_id, weight })
            .collect(),
    }
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("count")
        .get("n")
}

#[tokio::test]
async fn catalog_upsert_twice_yields_same_rows() {
    let Some(db) = setup("idempotent").await else { return };
    let store = &db.store;

    store
        .upsert_taxonomy(&[TaxonomyEntry::new(1, "Action"), TaxonomyEntry::new(2, "RPG")])
        .await
        .expect("taxonomy");
    let batch = vec![item(10, "Game A", None, &[(1, 5)]), item(11, "Game B", Some("#112233"), &[(1, 1), (2, 8)])];
    store.upsert_catalog_items(&batch).await.expect("first upsert");
    store.upsert_catalog_items(&batch).await.expect("second upsert");

    assert_eq!(count(store.pool(), "items").await, 2);
    assert_eq!(count(store.pool(), "item_taxonomy_weight").await, 3);

    let views = store.list_items_with_tags().await.expect("read model");
    assert_eq!(views.len(), 2);
    assert_eq!(views[0].color, "#ffffff");
    assert_eq!(views[1].tags.len(), 2);

    db.teardown().await;
}

#[tokio::test]
async fn unknown_tag_rolls_back_item_changes() {
    let Some(db) = setup("atomic").await else { return };
    let store = &db.store;

    store
        .upsert_taxonomy(&[TaxonomyEntry::new(1, "Action")])
        .await
        .expect("taxonomy");
    store
        .upsert_catalog_items(&[item(10, "Game A", None, &[(1, 5)])])
        .await
        .expect("initial");

    let err = store
        .upsert_catalog_items(&[item(10, "Renamed", None, &[(1, 9)]), item(20, "Game B", None, &[(404, 1)])])
        .await
        .unwrap_err();
    assert!(err.is_referential(), "unexpected error: {err}");

    let views = store.list_items_with_tags().await.expect("read model");
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name, "Game A");
    assert_eq!(views[0].tags[0].weight, 5);

    db.teardown().await;
}

#[tokio::test]
async fn empty_batches_issue_no_statements() {
    let Some(db) = setup("empty").await else { return };

    db.store.upsert_taxonomy(&[]).await.expect("empty taxonomy");
    db.store.upsert_catalog_items(&[]).await.expect("empty catalog");
    assert_eq!(count(db.store.pool(), "taxonomy").await, 0);

    db.teardown().await;
}
