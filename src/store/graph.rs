//! Graph store over an embedded SurrealDB instance.
//!
//! Queries are SurrealQL. Nodes are tables, edges are relation tables
//! created with `RELATE`; introspection reads `INFO FOR DB` and
//! `INFO FOR TABLE`, falling back to a sample record for schemaless
//! tables.
//!
//! `url` selects the engine: `mem://` for an in-process database,
//! `surrealkv://path` for an on-disk one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use surrealdb::engine::any::{self, Any};
use surrealdb::Surreal;

use super::{leading_keyword, Dialect, EntityInfo, FieldInfo, LinkInfo, SchemaOutline, Store};
use crate::config::{EntityConfig, GraphConfig};
use crate::embedding::decode_embedding;
use crate::similarity::EmbeddingTable;
use crate::table::{QueryOutcome, RowSet};

/// Statements a read-only store accepts at the start of each statement.
const READ_STATEMENTS: &[&str] = &["SELECT", "RETURN", "INFO", "LET"];

/// Keywords that change data, schema or the connection's namespace.
/// A read-only store rejects them anywhere, subqueries included.
const WRITE_KEYWORDS: &[&str] = &[
    "CREATE", "UPDATE", "UPSERT", "DELETE", "RELATE", "INSERT", "DEFINE", "REMOVE", "ALTER",
    "REBUILD", "LIVE", "KILL", "BEGIN", "COMMIT", "USE",
];

pub struct GraphStore {
    db: Surreal<Any>,
    timeout: Duration,
    entity: EntityConfig,
    read_only: bool,
}

impl GraphStore {
    pub async fn connect(config: &GraphConfig) -> Result<Self> {
        let db = any::connect(config.url.as_str())
            .await
            .with_context(|| format!("Failed to open graph store: {}", config.url))?;
        db.use_ns(config.namespace.as_str())
            .use_db(config.database.as_str())
            .await
            .context("Failed to select graph namespace")?;

        tracing::debug!(
            url = %config.url,
            ns = %config.namespace,
            db = %config.database,
            "graph store ready"
        );

        Ok(Self {
            db,
            timeout: Duration::from_secs(config.query_timeout_secs),
            entity: config.entity.clone(),
            read_only: config.read_only,
        })
    }

    /// Override `read_only` after connecting, e.g. to load data into an
    /// in-memory store before handing it out.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Run a query and return the last statement's result as JSON values.
    /// `NONE` results are dropped.
    async fn query_json(&self, query: &str) -> Result<Vec<Value>> {
        let mut response = self.db.query(query).await?.check()?;
        let statements = response.num_statements();
        if statements == 0 {
            return Ok(Vec::new());
        }
        statement_rows(&mut response, statements - 1)
    }

    async fn info(&self, query: &str) -> Result<serde_json::Map<String, Value>> {
        let values = self.query_json(query).await?;
        match values.into_iter().next() {
            Some(Value::Object(map)) => Ok(map),
            _ => Ok(serde_json::Map::new()),
        }
    }
}

#[async_trait]
impl Store for GraphStore {
    fn name(&self) -> &str {
        "graph"
    }

    fn dialect(&self) -> Dialect {
        Dialect::SurrealQl
    }

    fn entity(&self) -> &EntityConfig {
        &self.entity
    }

    fn query_timeout(&self) -> Duration {
        self.timeout
    }

    async fn introspect(&self) -> Result<SchemaOutline> {
        let db_info = self.info("INFO FOR DB;").await?;
        let tables = db_info
            .get("tables")
            .and_then(|t| t.as_object())
            .cloned()
            .unwrap_or_default();

        let mut outline = SchemaOutline::default();

        for (table, definition) in tables {
            let definition = definition.as_str().unwrap_or_default();
            let table_info = self.info(&format!("INFO FOR TABLE {};", table)).await?;

            let mut fields: Vec<FieldInfo> = table_info
                .get("fields")
                .and_then(|f| f.as_object())
                .map(|defs| {
                    defs.iter()
                        .map(|(name, def)| FieldInfo {
                            name: name.clone(),
                            kind: field_type(def.as_str().unwrap_or_default()),
                        })
                        .collect()
                })
                .unwrap_or_default();

            let mut relation = relation_ends(definition);

            if fields.is_empty() || (relation.is_none() && !definition.contains("TYPE NORMAL")) {
                let sample = self
                    .query_json(&format!("SELECT * FROM {} LIMIT 1;", table))
                    .await?;
                if let Some(Value::Object(record)) = sample.first() {
                    if fields.is_empty() {
                        fields = record
                            .iter()
                            .map(|(name, value)| FieldInfo {
                                name: name.clone(),
                                kind: json_kind(value).to_string(),
                            })
                            .collect();
                    }
                    if relation.is_none() {
                        relation = sampled_relation_ends(record);
                    }
                }
            }

            if let Some((from, to)) = relation {
                outline.links.push(LinkInfo {
                    from,
                    to,
                    label: format!("relation {}", table),
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
        if self.read_only {
            check_read_only(query)?;
        }
        let rows = self.query_json(query).await?;
        if rows.is_empty() && !projects_rows(query) {
            return Ok(QueryOutcome::Executed);
        }
        Ok(QueryOutcome::Rows(rows_from_json(rows)))
    }

    async fn entity_embeddings(&self) -> Result<EmbeddingTable> {
        let query = format!(
            "SELECT {key} AS entity_key, {emb} AS entity_vector FROM {table};",
            key = self.entity.key,
            emb = self.entity.embedding,
            table = self.entity.table,
        );
        let rows = self.query_json(&query).await?;

        let mut table = EmbeddingTable::new();
        for row in &rows {
            let key = match row.get("entity_key") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => continue,
                Some(other) => other.to_string(),
            };
            match row.get("entity_vector").and_then(decode_embedding) {
                Some(vector) => table.push(key, vector),
                None => tracing::debug!(key = %key, "skipping undecodable embedding"),
            }
        }
        Ok(table)
    }

    async fn fetch_entity(&self, key: &str) -> Result<RowSet> {
        let query = format!(
            "SELECT * FROM {} WHERE {} = $key;",
            self.entity.table, self.entity.key
        );
        let mut response = self
            .db
            .query(query)
            .bind(("key", key.to_string()))
            .await?
            .check()?;
        Ok(rows_from_json(statement_rows(&mut response, 0)?))
    }
}

/// One statement's result as JSON rows. An array is split into its
/// elements, any other value is a single row. `NONE` and `NULL` are dropped.
fn statement_rows(response: &mut surrealdb::Response, index: usize) -> Result<Vec<Value>> {
    let value: surrealdb::Value = response.take(index)?;
    Ok(match value.into_inner().into_json() {
        Value::Array(items) => items.into_iter().filter(|v| !v.is_null()).collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    })
}

/// Fail unless every statement is a read and no write keyword appears
/// outside a string literal.
fn check_read_only(query: &str) -> Result<()> {
    let code = strip_string_literals(query);
    for statement in code.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let keyword = leading_keyword(statement);
        if !READ_STATEMENTS.contains(&keyword.as_str()) {
            anyhow::bail!("graph store is read-only: {} statements are not allowed", keyword);
        }
    }
    let write = code
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|t| t.to_ascii_uppercase())
        .find(|t| WRITE_KEYWORDS.contains(&t.as_str()));
    if let Some(keyword) = write {
        anyhow::bail!("graph store is read-only: {} is not allowed", keyword);
    }
    Ok(())
}

/// Replace the contents of quoted strings (and the quotes) with spaces.
fn strip_string_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in query.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                out.push(' ');
            }
            None if c == '\'' || c == '"' || c == '`' => {
                quote = Some(c);
                out.push(' ');
            }
            None => out.push(c),
        }
    }
    out
}

/// True when the final statement is one that returns rows even if none
/// matched.
fn projects_rows(query: &str) -> bool {
    let last = query
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .last()
        .unwrap_or_default();
    matches!(leading_keyword(last).as_str(), "SELECT" | "RETURN" | "INFO")
}

/// Columns are the union of object keys in first-seen order. Scalars land
/// in a single `value` column.
fn rows_from_json(values: Vec<Value>) -> RowSet {
    let mut columns: Vec<String> = Vec::new();
    for value in &values {
        match value {
            Value::Object(map) => {
                for key in map.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
            _ => {
                if !columns.iter().any(|c| c == "value") {
                    columns.push("value".to_string());
                }
            }
        }
    }

    let mut set = RowSet::new(columns.clone());
    for value in values {
        let row = match value {
            Value::Object(mut map) => columns
                .iter()
                .map(|c| map.remove(c).unwrap_or(Value::Null))
                .collect(),
            scalar => columns
                .iter()
                .map(|c| {
                    if c == "value" {
                        scalar.clone()
                    } else {
                        Value::Null
                    }
                })
                .collect(),
        };
        set.push_row(row);
    }
    set
}

/// Extract the type from a `DEFINE FIELD ... TYPE <kind> ...` statement.
fn field_type(definition: &str) -> String {
    let Some(pos) = definition.find(" TYPE ") else {
        return "any".to_string();
    };
    let rest = &definition[pos + " TYPE ".len()..];
    let mut depth = 0i32;
    let mut kind = String::new();
    for c in rest.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            c if c.is_whitespace() && depth <= 0 => break,
            _ => {}
        }
        kind.push(c);
    }
    if kind.is_empty() {
        "any".to_string()
    } else {
        kind
    }
}

/// `DEFINE TABLE x TYPE RELATION IN a OUT b` → `(a, b)`.
fn relation_ends(definition: &str) -> Option<(String, String)> {
    let tokens: Vec<&str> = definition.split_whitespace().collect();
    let start = tokens.iter().position(|t| *t == "RELATION")?;
    let mut from = None;
    let mut to = None;
    let mut iter = tokens[start + 1..].iter();
    while let Some(token) = iter.next() {
        match *token {
            "IN" | "FROM" => from = iter.next().map(|t| t.to_string()),
            "OUT" | "TO" => to = iter.next().map(|t| t.to_string()),
            _ => {}
        }
    }
    Some((from?, to?))
}

/// Edge records carry `in` and `out` record ids (`table:id`).
fn sampled_relation_ends(record: &serde_json::Map<String, Value>) -> Option<(String, String)> {
    let table_of = |field: &str| -> Option<String> {
        let id = record.get(field)?.as_str()?;
        id.split_once(':').map(|(tb, _)| tb.to_string())
    };
    Some((table_of("in")?, table_of("out")?))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
