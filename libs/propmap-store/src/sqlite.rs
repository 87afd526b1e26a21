//! SQLite rule store
//!
//! Stores one row per rule, keyed by the derived rule id. The `others` blob is
//! kept as JSON text and parsed back on read.

use crate::error::Result;
use crate::feed::{ChangeFeed, RuleChange};
use crate::traits::RuleStore;
use async_trait::async_trait;
use propmap_model::{MappingRule, MetadataType, ModelError};
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

const CREATE_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS device_metadata_mapping (
    id TEXT PRIMARY KEY,
    product_id TEXT NOT NULL,
    device_id TEXT,
    metadata_type TEXT NOT NULL DEFAULT 'property',
    metadata_id TEXT NOT NULL,
    original_id TEXT,
    others_json TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

const CREATE_INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_mapping_scope
    ON device_metadata_mapping (product_id, device_id)
"#;

const SELECT_COLUMNS: &str =
    "SELECT id, product_id, device_id, metadata_type, metadata_id, original_id, others_json \
     FROM device_metadata_mapping";

pub struct SqliteRuleStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        Self { pool, feed }
    }

    /// Connect and make sure the table exists
    pub async fn connect(database_url: &str, feed: ChangeFeed) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self::new(pool, feed);
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_INDEX_SQL).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

fn hydrate_rule(row: SqliteRow) -> Result<MappingRule> {
    let metadata_type: String = row.try_get("metadata_type")?;
    let metadata_type = MetadataType::parse(&metadata_type).ok_or_else(|| {
        ModelError::validation(format!("unknown metadata_type '{}'", metadata_type))
    })?;

    let others_json: Option<String> = row.try_get("others_json")?;
    let others = match others_json.as_deref() {
        Some(json) if !json.is_empty() => Some(serde_json::from_str::<Map<String, Value>>(json)?),
        _ => None,
    };

    Ok(MappingRule {
        id: Some(row.try_get("id")?),
        product_id: row.try_get("product_id")?,
        device_id: row.try_get("device_id")?,
        metadata_type,
        metadata_id: row.try_get("metadata_id")?,
        original_id: row.try_get("original_id")?,
        others,
    })
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn query(&self, product_id: &str, device_id: Option<&str>) -> Result<Vec<MappingRule>> {
        let sql = match device_id {
            Some(_) => format!(
                "{} WHERE product_id = ? AND (device_id IS NULL OR device_id = ?) ORDER BY id",
                SELECT_COLUMNS
            ),
            None => format!(
                "{} WHERE product_id = ? AND device_id IS NULL ORDER BY id",
                SELECT_COLUMNS
            ),
        };

        let mut query = sqlx::query(&sql).bind(product_id);
        if let Some(device_id) = device_id {
            query = query.bind(device_id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.into_iter().map(hydrate_rule).collect()
    }

    async fn save(&self, rules: Vec<MappingRule>) -> Result<usize> {
        if rules.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;
        for mut rule in rules.iter().cloned() {
            let id = rule.generate_id().to_string();
            let device_id = rule
                .is_device_scoped()
                .then(|| rule.device_id.clone())
                .flatten();
            let others_json = rule.others.as_ref().map(serde_json::to_string).transpose()?;

            sqlx::query(
                r#"
                INSERT INTO device_metadata_mapping
                    (id, product_id, device_id, metadata_type, metadata_id,
                     original_id, others_json, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    product_id = excluded.product_id,
                    device_id = excluded.device_id,
                    metadata_type = excluded.metadata_type,
                    metadata_id = excluded.metadata_id,
                    original_id = excluded.original_id,
                    others_json = excluded.others_json,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&id)
            .bind(&rule.product_id)
            .bind(device_id)
            .bind(rule.metadata_type.as_str())
            .bind(&rule.metadata_id)
            .bind(rule.original_id.clone())
            .bind(others_json)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!("Saved {} mapping rules", rules.len());
        self.feed.publish(RuleChange::Saved);
        Ok(rules.len())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut removed = 0u64;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            removed += sqlx::query("DELETE FROM device_metadata_mapping WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        if removed > 0 {
            self.feed.publish(RuleChange::Deleted);
        }
        Ok(removed as usize)
    }

    async fn delete_by_scope(&self, product_id: &str, device_id: Option<&str>) -> Result<usize> {
        let result = match device_id {
            Some(device_id) => {
                sqlx::query(
                    "DELETE FROM device_metadata_mapping WHERE product_id = ? AND device_id = ?",
                )
                .bind(product_id)
                .bind(device_id)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "DELETE FROM device_metadata_mapping WHERE product_id = ? AND device_id IS NULL",
                )
                .bind(product_id)
                .execute(&self.pool)
                .await?
            }
        };

        let removed = result.rows_affected() as usize;
        if removed > 0 {
            self.feed.publish(RuleChange::Deleted);
        }
        Ok(removed)
    }
}
