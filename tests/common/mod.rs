#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::ConnectOptions;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use realty_router::config::{EntityConfig, GraphConfig, SqliteConfig};
use realty_router::embedding::Embedder;
use realty_router::llm::ChatModel;
use realty_router::models::{Message, Role, ToolCallRequest};
use realty_router::store::{GraphStore, SqliteStore, Store};
use realty_router::tools::ToolSpec;

/// How the scripted model behaves when tools are bound.
#[derive(Clone, Copy)]
pub enum Decide {
    /// Delegate the user's question once, then answer from the tool output.
    Delegate,
    /// Request a tool call on every turn.
    AlwaysTool,
    /// Request two calls in one message, then answer.
    TwoCalls,
    /// Call `run_query` with the scripted SQL until it stops failing.
    RunQuery,
    /// Answer without tools.
    Direct,
}

/// A chat model that recognises each prompt the crate sends and replies
/// from a script.
pub struct ScriptedModel {
    pub intent: String,
    pub sql: String,
    pub surql: String,
    pub decide: Decide,
    decides: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(intent: &str, decide: Decide) -> Self {
        Self {
            intent: intent.to_string(),
            sql: "SELECT COUNT(*) AS count FROM listings".to_string(),
            surql: "SELECT count() AS count FROM Listing GROUP ALL".to_string(),
            decide,
            decides: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_queries(mut self, sql: &str, surql: &str) -> Self {
        self.sql = sql.to_string();
        self.surql = surql.to_string();
        self
    }

    /// Number of Decide calls (completions with tools bound).
    pub fn decide_calls(&self) -> usize {
        self.decides.load(Ordering::SeqCst)
    }

    /// Tool-less prompts seen so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn call(id: usize, name: &str, arguments: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: format!("call_{}", id),
            name: name.to_string(),
            arguments,
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message> {
        let last = messages.last().cloned().unwrap_or_else(|| Message::user(""));

        if tools.is_empty() {
            self.prompts.lock().unwrap().push(last.content.clone());
            let text = if last.role == Role::System {
                "I could not get that from the database.".to_string()
            } else if last.content.starts_with("You are a classification model") {
                self.intent.clone()
            } else if last.content.starts_with("Schema:") {
                if last.content.contains("SurrealQL") {
                    self.surql.clone()
                } else {
                    self.sql.clone()
                }
            } else if last.content.starts_with("Answer ") {
                format!("Reconciled: {}", last.content)
            } else {
                "Hello! How can I help with real estate today?".to_string()
            };
            return Ok(Message::assistant(text));
        }

        let n = self.decides.fetch_add(1, Ordering::SeqCst);
        let after_tool = last.role == Role::Tool;
        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        let reply = match self.decide {
            Decide::Direct => Message::assistant("Answered without tools."),
            Decide::Delegate | Decide::TwoCalls if after_tool => {
                Message::assistant(format!("From the database: {}", last.content))
            }
            Decide::Delegate => Message::assistant_with_tool_calls(
                "",
                vec![Self::call(
                    n,
                    "query_real_estate_database",
                    json!({ "question": question }),
                )],
            ),
            Decide::TwoCalls => Message::assistant_with_tool_calls(
                "",
                vec![
                    Self::call(100, "query_real_estate_database", json!({ "question": "first" })),
                    Self::call(101, "query_real_estate_database", json!({ "question": "second" })),
                ],
            ),
            Decide::AlwaysTool => Message::assistant_with_tool_calls(
                "",
                vec![Self::call(
                    n,
                    "query_real_estate_database",
                    json!({ "question": question }),
                )],
            ),
            Decide::RunQuery if after_tool && !last.content.starts_with("Error") => {
                Message::assistant(format!("From the database: {}", last.content))
            }
            Decide::RunQuery => Message::assistant_with_tool_calls(
                "",
                vec![Self::call(n, "run_query", json!({ "query": self.sql }))],
            ),
        };
        Ok(reply)
    }
}

/// Every call fails, as a provider outage would.
pub struct FailingModel;

#[async_trait]
impl ChatModel for FailingModel {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> Result<Message> {
        bail!("provider unavailable: 503 Service Unavailable")
    }
}

/// Maps text that mentions a seeded address onto that listing's vector.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let t = t.to_lowercase();
                if t.contains("38th") {
                    vec![0.9, 0.1]
                } else if t.contains("penn") {
                    vec![0.1, 0.9]
                } else {
                    vec![0.5, 0.5]
                }
            })
            .collect())
    }
}

pub fn sqlite_config(dir: &TempDir) -> SqliteConfig {
    SqliteConfig {
        path: dir.path().join("real_estate.db"),
        read_only: true,
        query_timeout_secs: 5,
        entity: EntityConfig {
            table: "listings".into(),
            key: "property_address".into(),
            embedding: "address_embedding".into(),
        },
    }
}

pub const SQLITE_SCHEMA: &str = r#"
CREATE TABLE brokers (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
CREATE TABLE listings (
    id INTEGER PRIMARY KEY,
    property_address TEXT NOT NULL,
    floor TEXT,
    size_sf INTEGER,
    rent_sf_year REAL,
    broker_id INTEGER REFERENCES brokers(id),
    address_embedding TEXT
);
"#;

pub const SQLITE_ROWS: &str = r#"
INSERT INTO brokers (id, name) VALUES (1, 'Jack Cohen'), (2, 'Ann Lee');
INSERT INTO listings VALUES (1, '18 W 38th St', 'E3', 2500, 87.5, 1, '[1.0, 0.0]');
INSERT INTO listings VALUES (2, '1 Penn Plaza', 'P12', 1200, 95.0, 2, '[0.0, 1.0]');
"#;

async fn write_sqlite(config: &SqliteConfig, sql: &str) {
    let mut conn = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .connect()
        .await
        .unwrap();
    sqlx::raw_sql(sql).execute(&mut conn).await.unwrap();
}

/// Two listings with address embeddings, two brokers.
pub async fn sqlite_store(dir: &TempDir) -> Arc<SqliteStore> {
    let config = sqlite_config(dir);
    write_sqlite(&config, &format!("{}{}", SQLITE_SCHEMA, SQLITE_ROWS)).await;
    Arc::new(SqliteStore::new(&config))
}

/// Same tables, no rows.
pub async fn empty_sqlite_store(dir: &TempDir) -> Arc<SqliteStore> {
    let config = sqlite_config(dir);
    write_sqlite(&config, SQLITE_SCHEMA).await;
    Arc::new(SqliteStore::new(&config))
}

pub fn graph_config() -> GraphConfig {
    GraphConfig {
        url: "mem://".into(),
        read_only: true,
        namespace: "realty".into(),
        database: "listings".into(),
        query_timeout_secs: 5,
        entity: EntityConfig {
            table: "Listing".into(),
            key: "address".into(),
            embedding: "address_embedding".into(),
        },
    }
}

/// The same dataset as [`sqlite_store`], as nodes and edges. Seeded
/// through a writable handle, then handed out read-only.
pub async fn graph_store() -> Arc<GraphStore> {
    let store = GraphStore::connect(&graph_config())
        .await
        .unwrap()
        .with_read_only(false);
    let seed = store
        .execute(
            r#"
            CREATE Listing:a SET address = '18 W 38th St', floor = 'E3', size_sf = 2500, address_embedding = '[1.0, 0.0]';
            CREATE Listing:b SET address = '1 Penn Plaza', floor = 'P12', size_sf = 1200, address_embedding = '[0.0, 1.0]';
            CREATE Broker:jack SET name = 'Jack Cohen';
            CREATE Broker:ann SET name = 'Ann Lee';
            RELATE Listing:a->listed_by->Broker:jack;
            RELATE Listing:b->listed_by->Broker:ann;
            "#,
        )
        .await;
    assert!(!seed.is_failure(), "graph seed failed: {}", seed.to_text());
    Arc::new(store.with_read_only(true))
}
