//! Response Aggregator: ask both stores, then reconcile.
//!
//! Two [`AgentLoop`]s, one over the graph store and one over the SQLite
//! store, run concurrently on the same question. Their answers are handed
//! to one more completion that merges them. [`ResponseAggregator::answer`]
//! always returns text; any failure is reported inside it.

use anyhow::Result;
use std::sync::Arc;

use crate::agent::{AgentLoop, AgentRun};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::llm::ChatModel;
use crate::models::{Message, Role};
use crate::store::{GraphStore, SqliteStore, Store};

/// Stand-in for a loop that produced no answer text.
pub const NO_RESPONSE: &str = "No response generated.";

pub fn reconcile_prompt(question: &str, graph_answer: &str, sqlite_answer: &str) -> String {
    format!(
        "Answer {} using the following context generated from two models. \
         Using the graph database, the response is: {} and using the SQLite database, \
         the response is: {}. Compile the answers and return a single response.",
        question, graph_answer, sqlite_answer
    )
}

pub struct ResponseAggregator {
    model: Arc<dyn ChatModel>,
    graph: AgentLoop,
    sqlite: AgentLoop,
}

impl ResponseAggregator {
    pub fn new(model: Arc<dyn ChatModel>, graph: AgentLoop, sqlite: AgentLoop) -> Self {
        Self {
            model,
            graph,
            sqlite,
        }
    }

    /// Open both stores and build one loop per store.
    pub async fn from_config(
        config: &Config,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let graph_store: Arc<dyn Store> = Arc::new(GraphStore::connect(&config.graph).await?);
        let sqlite_store: Arc<dyn Store> = Arc::new(SqliteStore::new(&config.sqlite));

        let graph = AgentLoop::from_config(
            &config.agent,
            model.clone(),
            embedder.clone(),
            graph_store,
        )?;
        let sqlite = AgentLoop::from_config(&config.agent, model.clone(), embedder, sqlite_store)?;
        Ok(Self::new(model, graph, sqlite))
    }

    /// Answer `question` given prior turns. Never fails: errors come back
    /// as `"Error occurred: ..."`.
    pub async fn answer(&self, history: &[Message], question: &str) -> String {
        match self.try_answer(history, question).await {
            Ok(text) => text,
            Err(e) => error_response(&e),
        }
    }

    /// Like [`answer`](Self::answer), but a failure stays an `Err` so the
    /// caller can tell it apart from a real reply.
    pub async fn try_answer(&self, history: &[Message], question: &str) -> Result<String> {
        let (graph_run, sqlite_run) = tokio::join!(
            self.graph.run(history, question),
            self.sqlite.run(history, question)
        );
        let graph_answer = answer_or_sentinel(&graph_run?);
        let sqlite_answer = answer_or_sentinel(&sqlite_run?);

        let mut messages: Vec<Message> = history
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.requests_tool())
            .cloned()
            .collect();
        messages.push(Message::user(reconcile_prompt(
            question,
            &graph_answer,
            &sqlite_answer,
        )));

        tracing::info!("reconciling answers");
        let reply = self.model.chat(&messages, &[]).await?;
        let text = reply.content.trim();
        Ok(if text.is_empty() {
            NO_RESPONSE.to_string()
        } else {
            text.to_string()
        })
    }
}

/// Text reported to the user when answering failed.
pub fn error_response(err: &anyhow::Error) -> String {
    tracing::error!(error = %err, "aggregation failed");
    format!("Error occurred: {:#}", err)
}

fn answer_or_sentinel(run: &AgentRun) -> String {
    run.answer().unwrap_or(NO_RESPONSE).to_string()
}
