use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use steamshelf_core::{CatalogItemWithWeights, ItemTag, ItemView, TaxonomyEntry, DEFAULT_ITEM_COLOR};
use tracing::{debug, instrument};

use crate::catalog::{collapse_catalog, collapse_taxonomy, CatalogStore, StoreError};

// Postgres caps bind parameters at 65535 per statement.
const TAXONOMY_ROWS_PER_STATEMENT: usize = 20_000;
const ITEM_ROWS_PER_STATEMENT: usize = 10_000;
const WEIGHT_ROWS_PER_STATEMENT: usize = 20_000;

const LIST_ITEMS_WITH_TAGS_QUERY: &str = r#"
    SELECT i.id,
           i.name,
           i.description,
           i.color,
           i.popularity,
           w.tag_id,
           t.name AS tag_name,
           w.weight
      FROM items i
      LEFT JOIN item_taxonomy_weight w ON w.item_id = i.id
      LEFT JOIN taxonomy t ON t.id = w.tag_id
     ORDER BY i.id, w.weight DESC NULLS LAST, w.tag_id
"#;

/// [`CatalogStore`] over the `items`, `taxonomy` and `item_taxonomy_weight`
/// tables. Schema creation is done elsewhere.
#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    #[instrument(skip(self, entries), fields(rows = entries.len()))]
    async fn upsert_taxonomy(&self, entries: &[TaxonomyEntry]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let rows = collapse_taxonomy(entries);

        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(TAXONOMY_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new("INSERT INTO taxonomy (id, name) ");
            qb.push_values(chunk, |mut b, entry| {
                b.push_bind(entry.id).push_bind(&entry.name);
            });
            qb.push(" ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name");
            qb.build().persistent(false).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(rows = rows.len(), "taxonomy upsert committed");
        Ok(())
    }

    #[instrument(skip(self, items), fields(items = items.len()))]
    async fn upsert_catalog_items(
        &self,
        items: &[CatalogItemWithWeights],
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        let (rows, weights) = collapse_catalog(items);

        // Dropping `tx` on an early return rolls back both tables.
        let mut tx = self.pool.begin().await?;
        for chunk in rows.chunks(ITEM_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
                "INSERT INTO items (id, name, description, color, popularity) ",
            );
            qb.push_values(chunk, |mut b, item| {
                b.push_bind(item.id)
                    .push_bind(&item.name)
                    .push_bind(&item.description)
                    .push_bind(&item.color)
                    .push_bind(item.popularity);
            });
            qb.push(
                " ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name,
                                                description = EXCLUDED.description,
                                                color = EXCLUDED.color,
                                                popularity = EXCLUDED.popularity",
            );
            qb.build().persistent(false).execute(&mut *tx).await?;
        }

        for chunk in weights.chunks(WEIGHT_ROWS_PER_STATEMENT) {
            let mut qb: QueryBuilder<'_, Postgres> =
                QueryBuilder::new("INSERT INTO item_taxonomy_weight (item_id, tag_id, weight) ");
            qb.push_values(chunk, |mut b, w| {
                b.push_bind(w.item_id).push_bind(w.tag_id).push_bind(w.weight);
            });
            qb.push(" ON CONFLICT (item_id, tag_id) DO UPDATE SET weight = EXCLUDED.weight");
            qb.build().persistent(false).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        debug!(items = rows.len(), weights = weights.len(), "catalog upsert committed");
        Ok(())
    }

    async fn list_items_with_tags(&self) -> Result<Vec<ItemView>, StoreError> {
        let rows = sqlx::query(LIST_ITEMS_WITH_TAGS_QUERY)
            .fetch_all(&self.pool)
            .await?;

        let mut out: Vec<ItemView> = Vec::new();
        for row in rows {
            let id: i64 = row.try_get("id")?;
            if out.last().map(|v| v.id) != Some(id) {
                let name: Option<String> = row.try_get("name")?;
                let description: Option<String> = row.try_get("description")?;
                let color: Option<String> = row.try_get("color")?;
                let popularity: Option<i64> = row.try_get("popularity")?;
                out.push(ItemView {
                    id,
                    name: name.unwrap_or_default(),
                    description: description.unwrap_or_default(),
                    color: color.unwrap_or_else(|| DEFAULT_ITEM_COLOR.to_string()),
                    popularity: popularity.unwrap_or_default(),
                    tags: Vec::new(),
                });
            }

            let tag_id: Option<i64> = row.try_get("tag_id")?;
            if let (Some(tag_id), Some(view)) = (tag_id, out.last_mut()) {
                let tag_name: Option<String> = row.try_get("tag_name")?;
                let weight: Option<i64> = row.try_get("weight")?;
                view.tags.push(ItemTag {
                    id: tag_id,
                    name: tag_name.unwrap_or_default(),
                    weight: weight.unwrap_or_default(),
                });
            }
        }
        Ok(out)
    }
}
