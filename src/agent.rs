//! Agent Loop: alternate model decisions with tool execution until the
//! model answers in plain text.
//!
//! ```text
//!            tool call              result appended
//!  Decide ─────────────▶ Act ─────────────────────┐
//!    ▲ │                                          │
//!    │ └── text reply ──▶ Finish                  │
//!    └────────────────────────────────────────────┘
//! ```
//!
//! Bounds:
//! - at most `recursion_limit` Act steps; a tool request past that stops
//!   the loop with [`StopReason::RecursionLimit`] and the partial transcript
//! - more than `max_query_retries` consecutive failed tool outputs withdraw
//!   the tools for one last Decide ([`StopReason::RetriesExhausted`])
//!
//! Only the first tool call of an assistant message is executed. Any
//! further calls in the same message are dropped from the transcript.
//!
//! The loop is generic over its [`ToolDispatcher`]; the aggregator builds
//! one per store.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::config::AgentConfig;
use crate::dispatcher::ToolDispatcher;
use crate::embedding::Embedder;
use crate::llm::ChatModel;
use crate::models::{Message, Role, ToolCallRequest};
use crate::store::Store;
use crate::tools::{ToolKind, ToolOutput, ToolRequest, ToolSpec};

/// Appended before the final tool-less Decide once the retry budget is spent.
pub const RETRY_NOTE: &str = "The database tool has failed repeatedly and is no longer available. \
Answer the user's question with the information you have, and say so if it could not be found.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model replied without requesting a tool.
    Finished,
    /// The model kept requesting tools past the limit.
    RecursionLimit,
    /// Too many consecutive tool failures.
    RetriesExhausted,
}

/// Outcome of one loop invocation.
#[derive(Debug, Clone)]
pub struct AgentRun {
    /// Full transcript, starting with the loop's system instruction.
    pub messages: Vec<Message>,
    /// Number of Act steps taken.
    pub iterations: usize,
    pub stop: StopReason,
}

impl AgentRun {
    /// Text of the final assistant message, if it has any.
    pub fn answer(&self) -> Option<&str> {
        self.messages
            .last()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.content.trim())
            .filter(|c| !c.is_empty())
    }

    /// Tool requests that were executed, in order.
    pub fn executed_calls(&self) -> Vec<&ToolCallRequest> {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|result| {
                let id = result.tool_call_id.as_deref()?;
                self.messages
                    .iter()
                    .flat_map(|m| m.tool_calls.iter())
                    .find(|c| c.id == id)
            })
            .collect()
    }
}

enum Step {
    Decide,
    Act(ToolCallRequest),
    Finish(StopReason),
}

pub struct AgentLoop {
    model: Arc<dyn ChatModel>,
    dispatcher: ToolDispatcher,
    tools: Vec<ToolKind>,
    recursion_limit: usize,
    max_query_retries: usize,
}

impl AgentLoop {
    pub fn new(
        model: Arc<dyn ChatModel>,
        dispatcher: ToolDispatcher,
        tools: Vec<ToolKind>,
        recursion_limit: usize,
        max_query_retries: usize,
    ) -> Self {
        Self {
            model,
            dispatcher,
            tools,
            recursion_limit,
            max_query_retries,
        }
    }

    /// Build a loop over `store` with the tools and bounds from `[agent]`.
    pub fn from_config(
        config: &AgentConfig,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn Store>,
    ) -> Result<Self> {
        let dispatcher = ToolDispatcher::new(model.clone(), embedder, store);
        Ok(Self::new(
            model,
            dispatcher,
            config.tool_kinds()?,
            config.recursion_limit,
            config.max_query_retries,
        ))
    }

    pub fn store_name(&self) -> &str {
        self.dispatcher.store().name()
    }

    /// Instruction placed at the head of every transcript.
    pub async fn system_prompt(&self) -> String {
        if !self.tools.contains(&ToolKind::RunQuery) {
            return format!(
                "You are an assistant. You have one tool: `{}`.\n\
                 To answer questions about real estate, you MUST call this tool.\n\
                 Your ONLY job is to pass the user's full question into the `question` argument.",
                ToolKind::QueryDatabase.name()
            );
        }

        let store = self.dispatcher.store();
        let schema = store.describe_schema().await;
        let mut prompt = format!(
            "You are a helpful real estate data assistant. You have access to a {} database \
             with the following schema:\n\n{}\n\n\
             Given a user's question, first determine the intent and context. Then decide whether \
             the database is needed. If so, write a syntactically correct query and use the `{}` \
             tool to execute it. If the tool returns an error, fix the query and try again. \
             Finally, use the result to answer the user's question in plain English. \
             If a query returns a large number of rows, summarize the result. \
             Always base the final answer on the tool's output.",
            store.dialect().label(),
            schema,
            ToolKind::RunQuery.name()
        );
        if self.tools.contains(&ToolKind::QueryDatabase) {
            prompt.push_str(&format!(
                "\nFor questions about a specific street address, pass the user's full question \
                 to `{}` instead.",
                ToolKind::QueryDatabase.name()
            ));
        }
        prompt
    }

    /// Run the loop on `question` with prior turns `history`. Only user and
    /// plain assistant turns of the history are carried over.
    ///
    /// A model failure during Decide is returned as `Err`; tool failures
    /// never are.
    pub async fn run(&self, history: &[Message], question: &str) -> Result<AgentRun> {
        let mut messages = vec![Message::system(self.system_prompt().await)];
        messages.extend(
            history
                .iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant) && !m.requests_tool())
                .cloned(),
        );
        messages.push(Message::user(question));

        let specs: Vec<ToolSpec> = self.tools.iter().map(|t| t.spec()).collect();
        let store = self.store_name().to_string();
        let mut iterations = 0usize;
        let mut consecutive_failures = 0usize;
        let mut step = Step::Decide;

        let stop = loop {
            step = match step {
                Step::Decide => {
                    let mut reply = self.model.chat(&messages, &specs).await?;
                    if reply.tool_calls.len() > 1 {
                        tracing::debug!(
                            %store,
                            ignored = reply.tool_calls.len() - 1,
                            "ignoring extra tool calls"
                        );
                        // Every call kept in the transcript needs a result.
                        reply.tool_calls.truncate(1);
                    }
                    let next = match reply.first_tool_call() {
                        None => Step::Finish(StopReason::Finished),
                        Some(_) if iterations >= self.recursion_limit => {
                            tracing::warn!(
                                %store,
                                limit = self.recursion_limit,
                                "recursion limit reached"
                            );
                            Step::Finish(StopReason::RecursionLimit)
                        }
                        Some(call) => Step::Act(call.clone()),
                    };
                    messages.push(reply);
                    next
                }
                Step::Act(call) => {
                    iterations += 1;
                    tracing::info!(%store, iteration = iterations, tool = %call.name, "act");

                    let output = match ToolRequest::from_call(&call, &self.tools) {
                        Ok(request) => self.dispatcher.execute(&request).await,
                        Err(e) => ToolOutput::failed(format!("Error: {:#}", e)),
                    };
                    messages.push(Message::tool_result(&call.id, &output.content));

                    if output.failed {
                        consecutive_failures += 1;
                    } else {
                        consecutive_failures = 0;
                    }

                    if consecutive_failures > self.max_query_retries {
                        tracing::warn!(
                            %store,
                            failures = consecutive_failures,
                            "retry budget exhausted"
                        );
                        messages.push(Message::system(RETRY_NOTE));
                        let reply = self.model.chat(&messages, &[]).await?;
                        messages.push(reply);
                        Step::Finish(StopReason::RetriesExhausted)
                    } else {
                        Step::Decide
                    }
                }
                Step::Finish(reason) => break reason,
            };
        };

        tracing::info!(%store, iterations, stop = ?stop, "agent loop stopped");
        Ok(AgentRun {
            messages,
            iterations,
            stop,
        })
    }
}
