//! Data-access contract handed to route handlers, and the PostgreSQL model that
//! stores each entity as a JSONB document table in the tenant database.

use crate::error::{AppError, DriverError};
use crate::schema::{Document, EntitySchema};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Default page size for `find_many`.
pub const DEFAULT_LIMIT: u32 = 100;
/// Upper bound for `find_many` page size.
pub const MAX_LIMIT: u32 = 1000;

pub(crate) fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
}

/// Per-entity operations available to route handlers. Filters are exact matches
/// on top-level document fields.
#[async_trait]
pub trait EntityStore: Send + Sync {
    fn schema(&self) -> &EntitySchema;

    async fn find_many(
        &self,
        filter: &Document,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Value>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Value>, AppError>;

    async fn create(&self, doc: Document) -> Result<Value, AppError>;

    async fn update_by_id(&self, id: Uuid, patch: Document) -> Result<Option<Value>, AppError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Value>, AppError>;

    async fn count(&self, filter: &Document) -> Result<u64, AppError>;
}

/// Quote identifier for PostgreSQL (safe: only from schema registry).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

const COLUMNS: &str = "id, data, created_at, updated_at";

/// Entity bound to one tenant pool.
#[derive(Clone, Debug)]
pub struct PgModel {
    pool: PgPool,
    schema: Arc<EntitySchema>,
    table: String,
}

impl PgModel {
    /// Bind a schema to a tenant pool, creating its document table if needed.
    pub async fn bind(pool: PgPool, schema: Arc<EntitySchema>) -> Result<Self, DriverError> {
        let table = quoted(schema.collection());
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id UUID PRIMARY KEY,
                data JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            table
        );
        sqlx::query(&ddl)
            .execute(&pool)
            .await
            .map_err(|e| DriverError::Binding(format!("{}: {}", schema.name(), e)))?;
        let index = format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} USING GIN (data)",
            quoted(&format!("{}_data_idx", schema.collection())),
            table
        );
        sqlx::query(&index)
            .execute(&pool)
            .await
            .map_err(|e| DriverError::Binding(format!("{}: {}", schema.name(), e)))?;
        Ok(PgModel { pool, schema, table })
    }
}

type DocumentRow = (Uuid, Value, chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>);

/// Flatten a stored row into the document shape returned to clients.
fn row_to_document((id, data, created_at, updated_at): DocumentRow) -> Value {
    let mut doc = match data {
        Value::Object(m) => m,
        _ => Document::new(),
    };
    doc.insert("id".into(), Value::String(id.to_string()));
    doc.insert("created_at".into(), Value::String(created_at.to_rfc3339()));
    doc.insert("updated_at".into(), Value::String(updated_at.to_rfc3339()));
    Value::Object(doc)
}

#[async_trait]
impl EntityStore for PgModel {
    fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    async fn find_many(
        &self,
        filter: &Document,
        limit: Option<u32>,
        offset: Option<u32>,
    ) -> Result<Vec<Value>, AppError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE data @> $1 ORDER BY created_at, id LIMIT $2 OFFSET $3",
            COLUMNS, self.table
        );
        tracing::debug!(sql = %sql, filter = ?filter, "query");
        let rows: Vec<DocumentRow> = sqlx::query_as(&sql)
            .bind(Value::Object(filter.clone()))
            .bind(i64::from(clamp_limit(limit)))
            .bind(i64::from(offset.unwrap_or(0)))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(row_to_document).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Value>, AppError> {
        let sql = format!("SELECT {} FROM {} WHERE id = $1", COLUMNS, self.table);
        tracing::debug!(sql = %sql, %id, "query");
        let row: Option<DocumentRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_document))
    }

    async fn create(&self, doc: Document) -> Result<Value, AppError> {
        let doc = self.schema.prepare_insert(doc)?;
        let sql = format!(
            "INSERT INTO {} (id, data) VALUES ($1, $2) RETURNING {}",
            self.table, COLUMNS
        );
        tracing::debug!(sql = %sql, "query");
        let row: DocumentRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(Value::Object(doc))
            .fetch_one(&self.pool)
            .await?;
        Ok(row_to_document(row))
    }

    async fn update_by_id(&self, id: Uuid, patch: Document) -> Result<Option<Value>, AppError> {
        let patch = self.schema.prepare_patch(patch)?;
        let sql = format!(
            "UPDATE {} SET data = data || $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            self.table, COLUMNS
        );
        tracing::debug!(sql = %sql, %id, "query");
        let row: Option<DocumentRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(Value::Object(patch))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_document))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Value>, AppError> {
        let sql = format!("DELETE FROM {} WHERE id = $1 RETURNING {}", self.table, COLUMNS);
        tracing::debug!(sql = %sql, %id, "query");
        let row: Option<DocumentRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_document))
    }

    async fn count(&self, filter: &Document) -> Result<u64, AppError> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE data @> $1", self.table);
        tracing::debug!(sql = %sql, filter = ?filter, "query");
        let (n,): (i64,) = sqlx::query_as(&sql)
            .bind(Value::Object(filter.clone()))
            .fetch_one(&self.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn rows_flatten_into_documents() {
        let id = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let doc = row_to_document((id, json!({"name": "Bolt"}), at, at));
        assert_eq!(doc["name"], "Bolt");
        assert_eq!(doc["id"], json!(id.to_string()));
        assert_eq!(doc["created_at"], json!("2024-01-02T03:04:05+00:00"));
    }

    #[test]
    fn limit_defaults_and_caps() {
        assert_eq!(clamp_limit(None), DEFAULT_LIMIT);
        assert_eq!(clamp_limit(Some(5)), 5);
        assert_eq!(clamp_limit(Some(50_000)), MAX_LIMIT);
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quoted("inventory_items"), "\"inventory_items\"");
        assert_eq!(quoted("we\"ird"), "\"we\"\"ird\"");
    }
}
