//! Storage abstraction over the two backing stores.
//!
//! The [`Store`] trait is what the dispatcher and the agent loop see. A
//! backend supplies raw introspection and raw execution; the trait's
//! provided methods wrap them into the two boundary operations that never
//! fail:
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`describe_schema`](Store::describe_schema) | Schema text for prompt injection; a failure becomes text |
//! | [`execute`](Store::execute) | Run one query under a timeout; a failure becomes [`QueryOutcome::Failed`] |
//! | [`entity_embeddings`](Store::entity_embeddings) | Load every entity key with its vector |
//! | [`fetch_entity`](Store::fetch_entity) | All columns of the entity with a given key |
//!
//! Implementations must be `Send + Sync` so two agent loops can share
//! nothing but still run concurrently.

pub mod graph;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EntityConfig;
use crate::similarity::EmbeddingTable;
use crate::table::{QueryOutcome, RowSet};

pub use graph::GraphStore;
pub use sqlite::SqliteStore;

/// Query language a store accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    SurrealQl,
}

impl Dialect {
    /// Name used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "SQLite SQL",
            Dialect::SurrealQl => "SurrealQL",
        }
    }
}

/// One column or property with its declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub kind: String,
}

/// A table, node type, or relation type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    pub name: String,
    pub fields: Vec<FieldInfo>,
}

/// A foreign key or a typed graph edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub from: String,
    pub to: String,
    pub label: String,
}

/// Structural metadata read from a store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaOutline {
    pub entities: Vec<EntityInfo>,
    pub links: Vec<LinkInfo>,
}

impl SchemaOutline {
    /// Render for prompt context. Entities and links are sorted so the
    /// text depends only on the store's structure.
    pub fn render(&self) -> String {
        let mut entities: Vec<&EntityInfo> = self.entities.iter().collect();
        entities.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::from("Database schema:\n");
        for entity in entities {
            out.push_str(&format!("Table '{}':\n", entity.name));
            for field in &entity.fields {
                out.push_str(&format!("  - {} ({})\n", field.name, field.kind));
            }
        }

        if !self.links.is_empty() {
            let mut links: Vec<&LinkInfo> = self.links.iter().collect();
            links.sort_by(|a, b| (&a.from, &a.to, &a.label).cmp(&(&b.from, &b.to, &b.label)));
            out.push_str("Relationships:\n");
            for link in links {
                out.push_str(&format!("  - {} -> {} ({})\n", link.from, link.to, link.label));
            }
        }

        out.trim_end().to_string()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    /// Short name used in logs (`"sqlite"`, `"graph"`).
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Which table holds the fuzzy-matchable entity.
    fn entity(&self) -> &EntityConfig;

    fn query_timeout(&self) -> Duration;

    /// Read structural metadata.
    async fn introspect(&self) -> Result<SchemaOutline>;

    /// Run one query string. Engine errors are returned as `Err`.
    async fn run(&self, query: &str) -> Result<QueryOutcome>;

    /// Every entity key paired with its stored embedding. Rows whose
    /// embedding cannot be decoded are skipped.
    async fn entity_embeddings(&self) -> Result<EmbeddingTable>;

    /// All columns of the entity whose key equals `key`.
    async fn fetch_entity(&self, key: &str) -> Result<RowSet>;

    /// Schema text for prompts. Never fails: an introspection error is
    /// rendered as a sentence describing it.
    async fn describe_schema(&self) -> String {
        match self.introspect().await {
            Ok(outline) => outline.render(),
            Err(e) => {
                tracing::warn!(store = self.name(), error = %e, "schema introspection failed");
                format!("Schema unavailable: introspection failed: {:#}", e)
            }
        }
    }

    /// Execute one query, bounded by the store's timeout. Never fails.
    async fn execute(&self, query: &str) -> QueryOutcome {
        if query.trim().is_empty() {
            return QueryOutcome::failed("empty query");
        }

        let limit = self.query_timeout();
        match tokio::time::timeout(limit, self.run(query)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::debug!(store = self.name(), error = %e, "query failed");
                QueryOutcome::failed(format!("{:#}", e))
            }
            Err(_) => {
                tracing::warn!(store = self.name(), ?limit, "query timed out");
                QueryOutcome::failed(format!("query timed out after {}s", limit.as_secs()))
            }
        }
    }
}

/// First keyword of a statement, uppercased.
pub(crate) fn leading_keyword(query: &str) -> String {
    query
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline() -> SchemaOutline {
        SchemaOutline {
            entities: vec![
                EntityInfo {
                    name: "listings".into(),
                    fields: vec![
                        FieldInfo {
                            name: "property_address".into(),
                            kind: "TEXT".into(),
                        },
                        FieldInfo {
                            name: "broker_id".into(),
                            kind: "INTEGER".into(),
                        },
                    ],
                },
                EntityInfo {
                    name: "brokers".into(),
                    fields: vec![FieldInfo {
                        name: "id".into(),
                        kind: "INTEGER".into(),
                    }],
                },
            ],
            links: vec![LinkInfo {
                from: "listings.broker_id".into(),
                to: "brokers.id".into(),
                label: "foreign key".into(),
            }],
        }
    }

    #[test]
    fn test_render_is_sorted() {
        let text = outline().render();
        assert_eq!(
            text,
            "Database schema:\n\
             Table 'brokers':\n  - id (INTEGER)\n\
             Table 'listings':\n  - property_address (TEXT)\n  - broker_id (INTEGER)\n\
             Relationships:\n  - listings.broker_id -> brokers.id (foreign key)"
        );
    }

    #[test]
    fn test_render_without_links() {
        let text = SchemaOutline::default().render();
        assert_eq!(text, "Database schema:");
    }

    #[test]
    fn test_leading_keyword() {
        assert_eq!(leading_keyword("  select * from x"), "SELECT");
        assert_eq!(leading_keyword("INFO FOR DB;"), "INFO");
        assert_eq!(leading_keyword(""), "");
    }
}
