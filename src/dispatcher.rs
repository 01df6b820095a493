//! Tool Dispatcher: executes a typed [`ToolRequest`] against one store.
//!
//! `query_real_estate_database` routes the question first:
//!
//! | Intent | Branch |
//! |--------|--------|
//! | `ADDRESS_SEARCH` | Resolve the nearest entity key, fetch its row, drop the embedding column |
//! | `GENERAL_QUERY` | Introspect, synthesize a query, execute it |
//! | `NORMAL_QUERY` | Send the question straight to the model |
//! | unrecognized | Same as `GENERAL_QUERY` |
//!
//! Nothing escapes [`ToolDispatcher::execute`]: every failure is returned
//! as the tool's text output.

use anyhow::Result;
use std::future::Future;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::intent::{Intent, IntentRouter};
use crate::llm::ChatModel;
use crate::similarity::SimilarityResolver;
use crate::store::Store;
use crate::synthesizer::QuerySynthesizer;
use crate::table::QueryOutcome;
use crate::tools::{ToolOutput, ToolRequest};

pub const NO_LISTINGS_MESSAGE: &str = "No listings found.";

pub struct ToolDispatcher {
    model: Arc<dyn ChatModel>,
    store: Arc<dyn Store>,
    resolver: SimilarityResolver,
}

impl ToolDispatcher {
    pub fn new(
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            model,
            store,
            resolver: SimilarityResolver::new(embedder),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub async fn execute(&self, request: &ToolRequest) -> ToolOutput {
        tracing::debug!(store = self.store.name(), tool = request.kind().name(), "executing tool");
        match request {
            ToolRequest::QueryDatabase { question } => self.dispatch(question).await,
            ToolRequest::RunQuery { query } => outcome_output(self.store.execute(query).await),
        }
    }

    /// Route `question` and run the matching branch.
    pub async fn dispatch(&self, question: &str) -> ToolOutput {
        match self.try_dispatch(question).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(store = self.store.name(), error = %e, "tool failed");
                ToolOutput::failed(format!("An error occurred within the tool: {:#}", e))
            }
        }
    }

    async fn try_dispatch(&self, question: &str) -> Result<ToolOutput> {
        let intent = IntentRouter::new(self.model.as_ref())
            .classify(question)
            .await?;

        match intent {
            Intent::AddressSearch => self.address_search(question).await,
            Intent::GeneralQuery => self.general_query(question).await,
            Intent::NormalQuery => self.converse(question).await,
            Intent::Unrecognized(raw) => {
                tracing::warn!(%raw, "unrecognized intent, treating as general query");
                self.general_query(question).await
            }
        }
    }

    async fn address_search(&self, question: &str) -> Result<ToolOutput> {
        let candidates = self.bounded(self.store.entity_embeddings()).await?;
        let Some(best) = self.resolver.resolve(question, &candidates).await? else {
            return Ok(ToolOutput::ok(NO_LISTINGS_MESSAGE));
        };
        tracing::info!(
            store = self.store.name(),
            key = %best.key,
            score = best.score,
            "address resolved"
        );

        let embedding_column = self.store.entity().embedding.clone();
        let rows = self
            .bounded(self.store.fetch_entity(&best.key))
            .await?
            .without_columns(&[embedding_column.as_str()]);
        Ok(ToolOutput::ok(rows.to_markdown()))
    }

    async fn general_query(&self, question: &str) -> Result<ToolOutput> {
        let schema = self.store.describe_schema().await;
        let query = QuerySynthesizer::new(self.model.as_ref(), self.store.dialect())
            .synthesize(&schema, question)
            .await?;
        Ok(outcome_output(self.store.execute(&query).await))
    }

    async fn converse(&self, question: &str) -> Result<ToolOutput> {
        let reply = self.model.complete(question).await?;
        Ok(ToolOutput::ok(reply.trim()))
    }

    async fn bounded<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.store.query_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| anyhow::anyhow!("store call timed out after {}s", limit.as_secs()))?
    }
}

fn outcome_output(outcome: QueryOutcome) -> ToolOutput {
    ToolOutput {
        content: outcome.to_text(),
        failed: outcome.is_failure(),
    }
}
