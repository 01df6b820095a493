//! Row-oriented store over a SQLite file.
//!
//! Every call opens its own connection and drops it when done, so
//! concurrent calls never share a connection. With `read_only = true`
//! (the default) the connection is opened read-only and any write fails
//! inside the engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Executor, Row, Statement, TypeInfo, ValueRef};
use std::path::PathBuf;
use std::time::Duration;

use super::{Dialect, EntityInfo, FieldInfo, LinkInfo, SchemaOutline, Store};
use crate::config::{EntityConfig, SqliteConfig};
use crate::embedding::{blob_to_vec, decode_embedding};
use crate::similarity::EmbeddingTable;
use crate::table::{QueryOutcome, RowSet};

pub struct SqliteStore {
    path: PathBuf,
    read_only: bool,
    timeout: Duration,
    entity: EntityConfig,
}

impl SqliteStore {
    pub fn new(config: &SqliteConfig) -> Self {
        Self {
            path: config.path.clone(),
            read_only: config.read_only,
            timeout: Duration::from_secs(config.query_timeout_secs),
            entity: config.entity.clone(),
        }
    }

    async fn connect(&self) -> Result<SqliteConnection> {
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .read_only(self.read_only)
            .create_if_missing(false)
            .disable_statement_logging();

        options
            .connect()
            .await
            .with_context(|| format!("Failed to open database: {}", self.path.display()))
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn entity(&self) -> &EntityConfig {
        &self.entity
    }

    fn query_timeout(&self) -> Duration {
        self.timeout
    }

    async fn introspect(&self) -> Result<SchemaOutline> {
        let mut conn = self.connect().await?;

        let tables: Vec<String> = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&mut conn)
        .await?
        .iter()
        .map(|row| row.try_get::<String, _>("name"))
        .collect::<std::result::Result<_, _>>()?;

        let mut outline = SchemaOutline::default();

        for table in tables {
            let columns = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(&table)))
                .fetch_all(&mut conn)
                .await?;

            let mut fields = Vec::with_capacity(columns.len());
            for col in &columns {
                let name: String = col.try_get("name")?;
                let declared: String = col.try_get("type")?;
                let pk: i64 = col.try_get("pk")?;
                let mut kind = if declared.is_empty() {
                    "ANY".to_string()
                } else {
                    declared
                };
                if pk > 0 {
                    kind.push_str(" PRIMARY KEY");
                }
                fields.push(FieldInfo { name, kind });
            }

            let foreign_keys =
                sqlx::query(&format!("PRAGMA foreign_key_list({})", quote_ident(&table)))
                    .fetch_all(&mut conn)
                    .await?;
            for fk in &foreign_keys {
                let target: String = fk.try_get("table")?;
                let from: String = fk.try_get("from")?;
                let to: Option<String> = fk.try_get("to")?;
                outline.links.push(LinkInfo {
                    from: format!("{}.{}", table, from),
                    to: match to {
                        Some(col) => format!("{}.{}", target, col),
                        None => target,
                    },
                    label: "foreign key".to_string(),
                });
            }

            outline.entities.push(EntityInfo {
                name: table,
                fields,
            });
        }

        Ok(outline)
    }

    async fn run(&self, query: &str) -> Result<QueryOutcome> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(query).fetch_all(&mut conn).await?;

        let columns: Vec<String> = match rows.first() {
            Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
            None => {
                // No rows: ask the engine whether the statement projects columns.
                let stmt = (&mut conn).prepare(query).await?;
                stmt.columns().iter().map(|c| c.name().to_string()).collect()
            }
        };

        if columns.is_empty() {
            return Ok(QueryOutcome::Executed);
        }
        Ok(QueryOutcome::Rows(decode_rows(columns, &rows)))
    }

    async fn entity_embeddings(&self) -> Result<EmbeddingTable> {
        let mut conn = self.connect().await?;
        let sql = format!(
            "SELECT {key}, {emb} FROM {table} WHERE {emb} IS NOT NULL",
            key = quote_ident(&self.entity.key),
            emb = quote_ident(&self.entity.embedding),
            table = quote_ident(&self.entity.table),
        );
        let rows = sqlx::query(&sql).fetch_all(&mut conn).await?;

        let mut table = EmbeddingTable::new();
        for row in &rows {
            let key = match cell_value(row, 0) {
                Value::String(s) => s,
                Value::Null => continue,
                other => other.to_string(),
            };
            match embedding_cell(row, 1) {
                Some(vector) => table.push(key, vector),
                None => tracing::debug!(key = %key, "skipping undecodable embedding"),
            }
        }
        Ok(table)
    }

    async fn fetch_entity(&self, key: &str) -> Result<RowSet> {
        let mut conn = self.connect().await?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ?",
            quote_ident(&self.entity.table),
            quote_ident(&self.entity.key),
        );
        let rows = sqlx::query(&sql).bind(key).fetch_all(&mut conn).await?;

        let columns: Vec<String> = match rows.first() {
            Some(first) => first.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };
        Ok(decode_rows(columns, &rows))
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn decode_rows(columns: Vec<String>, rows: &[SqliteRow]) -> RowSet {
    let width = columns.len();
    let mut set = RowSet::new(columns);
    for row in rows {
        set.push_row((0..width).map(|i| cell_value(row, i)).collect());
    }
    set
}

/// Decode one cell by its storage class.
fn cell_value(row: &SqliteRow, idx: usize) -> Value {
    let Ok(raw) = row.try_get_raw(idx) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let storage = raw.type_info().name().to_string();

    match storage.as_str() {
        "INTEGER" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "NUMERIC" => row
            .try_get_unchecked::<f64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .map(|b| Value::String(format!("<{} bytes>", b.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(idx)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

/// Embeddings are stored either as JSON text or as a little-endian f32 BLOB.
fn embedding_cell(row: &SqliteRow, idx: usize) -> Option<Vec<f32>> {
    let raw = row.try_get_raw(idx).ok()?;
    if raw.is_null() {
        return None;
    }
    if raw.type_info().name() == "BLOB" {
        let bytes: Vec<u8> = row.try_get_unchecked(idx).ok()?;
        let vector = blob_to_vec(&bytes);
        return (!vector.is_empty()).then_some(vector);
    }
    let text: String = row.try_get_unchecked(idx).ok()?;
    decode_embedding(&Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir) -> SqliteStore {
        let path = dir.path().join("listings.db");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let mut conn = options.connect().await.unwrap();
        sqlx::raw_sql(
            r#"
            CREATE TABLE brokers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE TABLE listings (
                id INTEGER PRIMARY KEY,
                property_address TEXT NOT NULL,
                size_sf REAL,
                broker_id INTEGER REFERENCES brokers(id),
                address_embedding TEXT
            );
            INSERT INTO brokers (id, name) VALUES (1, 'Jack Cohen');
            INSERT INTO listings VALUES (1, '18 W 38th St', 2500.0, 1, '[1.0, 0.0]');
            INSERT INTO listings VALUES (2, '1 Penn Plaza', 1200.5, 1, '[0.0, 1.0]');
            INSERT INTO listings VALUES (3, '5 Unknown Ave', NULL, NULL, NULL);
            "#,
        )
        .execute(&mut conn)
        .await
        .unwrap();

        SqliteStore::new(&SqliteConfig {
            path,
            read_only: true,
            query_timeout_secs: 5,
            entity: EntityConfig {
                table: "listings".into(),
                key: "property_address".into(),
                embedding: "address_embedding".into(),
            },
        })
    }

    #[tokio::test]
    async fn test_select_rows() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let outcome = store
            .execute("SELECT property_address, size_sf FROM listings ORDER BY id")
            .await;
        let QueryOutcome::Rows(rows) = outcome else {
            panic!("expected rows, got {:?}", outcome);
        };
        assert_eq!(rows.columns, vec!["property_address", "size_sf"]);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.get(1, "size_sf"), Some(&serde_json::json!(1200.5)));
        assert_eq!(rows.get(2, "size_sf"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_empty_select_keeps_columns() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let outcome = store
            .execute("SELECT property_address FROM listings WHERE id = 99")
            .await;
        let QueryOutcome::Rows(rows) = outcome else {
            panic!("expected rows");
        };
        assert_eq!(rows.columns, vec!["property_address"]);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_query_is_data() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let outcome = store.execute("SELEC * FROM listings").await;
        assert!(outcome.is_failure());
        assert!(outcome.to_text().starts_with("Error executing query:"));
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let outcome = store.execute("DELETE FROM listings").await;
        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn test_schema_lists_tables_and_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let schema = store.describe_schema().await;
        assert!(schema.starts_with("Database schema:"));
        assert!(schema.contains("Table 'brokers':"));
        assert!(schema.contains("  - property_address (TEXT)"));
        assert!(schema.contains("  - id (INTEGER PRIMARY KEY)"));
        assert!(schema.contains("listings.broker_id -> brokers.id (foreign key)"));
        assert_eq!(schema, store.describe_schema().await);
    }

    #[tokio::test]
    async fn test_missing_database_schema_is_text() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(&SqliteConfig {
            path: dir.path().join("absent.db"),
            read_only: true,
            query_timeout_secs: 5,
            entity: EntityConfig {
                table: "listings".into(),
                key: "property_address".into(),
                embedding: "address_embedding".into(),
            },
        });
        let schema = store.describe_schema().await;
        assert!(schema.starts_with("Schema unavailable"));
    }

    #[tokio::test]
    async fn test_entity_embeddings_skip_nulls() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let table = store.entity_embeddings().await.unwrap();
        let keys: Vec<&str> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["18 W 38th St", "1 Penn Plaza"]);
    }

    #[tokio::test]
    async fn test_fetch_entity_by_key() {
        let dir = TempDir::new().unwrap();
        let store = seeded(&dir).await;
        let rows = store.fetch_entity("1 Penn Plaza").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.get(0, "id"), Some(&serde_json::json!(2)));
        assert!(rows.column_index("address_embedding").is_some());
    }
}
