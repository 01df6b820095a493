//! Language-model provider abstraction.
//!
//! The core depends only on [`ChatModel`]: given an ordered conversation and
//! an optional declared tool set, return one assistant [`Message`] that either
//! carries text or one or more tool-call requests.
//!
//! Implementations:
//! - **[`DisabledChatModel`]**: returns errors; used when no provider is configured.
//! - **[`OpenAIChatModel`]**: `POST /v1/chat/completions` with function tools.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::models::{Message, Role, ToolCallRequest};
use crate::openai;
use crate::tools::ToolSpec;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model identifier.
    fn model_name(&self) -> &str;

    /// Run one completion. When `tools` is empty the model cannot request
    /// a tool call.
    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message>;

    /// Single-prompt completion returning the raw text.
    async fn complete(&self, prompt: &str) -> Result<String> {
        let reply = self.chat(&[Message::user(prompt)], &[]).await?;
        Ok(reply.content)
    }
}

/// Used when `llm.provider = "disabled"`. Every call fails.
pub struct DisabledChatModel;

#[async_trait]
impl ChatModel for DisabledChatModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn chat(&self, _messages: &[Message], _tools: &[ToolSpec]) -> Result<Message> {
        bail!("Language model provider is disabled")
    }
}

/// Chat-completions client with function calling.
pub struct OpenAIChatModel {
    model: String,
    temperature: f32,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChatModel {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: openai::endpoint(&config.base_url, "chat/completions"),
            api_key: openai::api_key()?,
            max_retries: config.max_retries,
            client: openai::build_client(config.timeout_secs)?,
        })
    }

    fn request_body(&self, messages: &[Message], tools: &[ToolSpec]) -> Value {
        let wire: Vec<Value> = messages.iter().map(message_to_wire).collect();
        let mut body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": wire,
        });
        if !tools.is_empty() {
            body["tools"] = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message> {
        let body = self.request_body(messages, tools);
        let json =
            openai::post_json(&self.client, &self.url, &self.api_key, &body, self.max_retries)
                .await?;
        parse_chat_response(&json)
    }
}

/// Create the [`ChatModel`] named by the configuration.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChatModel)),
        "openai" => Ok(Box::new(OpenAIChatModel::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

fn message_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant if !msg.tool_calls.is_empty() => {
            let content = if msg.content.is_empty() {
                Value::Null
            } else {
                Value::String(msg.content.clone())
            };
            let calls: Vec<Value> = msg
                .tool_calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            json!({
                "role": "assistant",
                "content": content,
                "tool_calls": calls,
            })
        }
        Role::Tool => json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content,
        }),
        role => json!({
            "role": role.as_str(),
            "content": msg.content,
        }),
    }
}

/// Extract the first choice's message. Tool-call arguments arrive as a JSON
/// string; if that string does not parse it is kept verbatim so argument
/// validation can report it back to the model.
fn parse_chat_response(json: &Value) -> Result<Message> {
    let message = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|t| t.as_array()) {
        for call in calls {
            let function = call
                .get("function")
                .ok_or_else(|| {
                    anyhow::anyhow!("Invalid chat response: tool call without function")
                })?;
            let name = function
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            let raw_args = function
                .get("arguments")
                .and_then(|a| a.as_str())
                .unwrap_or("{}");
            let arguments = serde_json::from_str(raw_args)
                .unwrap_or_else(|_| Value::String(raw_args.to_string()));
            tool_calls.push(ToolCallRequest {
                id: call
                    .get("id")
                    .and_then(|i| i.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name,
                arguments,
            });
        }
    }

    Ok(Message::assistant_with_tool_calls(content, tool_calls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_reply() {
        let json = json!({
            "choices": [{ "message": { "role": "assistant", "content": "There are 42 listings." } }]
        });
        let msg = parse_chat_response(&json).unwrap();
        assert_eq!(msg.content, "There are 42 listings.");
        assert!(!msg.requests_tool());
    }

    #[test]
    fn test_parse_tool_call_reply() {
        let json = json!({
            "choices": [{ "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {
                        "name": "query_real_estate_database",
                        "arguments": "{\"question\":\"How many listings are there?\"}"
                    }
                }]
            } }]
        });
        let msg = parse_chat_response(&json).unwrap();
        assert!(msg.requests_tool());
        let call = msg.first_tool_call().unwrap();
        assert_eq!(call.id, "call_abc");
        assert_eq!(call.arguments["question"], "How many listings are there?");
    }

    #[test]
    fn test_parse_keeps_malformed_arguments() {
        let json = json!({
            "choices": [{ "message": {
                "tool_calls": [{
                    "id": "call_1",
                    "function": { "name": "run_query", "arguments": "{not json" }
                }]
            } }]
        });
        let msg = parse_chat_response(&json).unwrap();
        assert_eq!(msg.tool_calls[0].arguments, json!("{not json"));
    }

    #[test]
    fn test_parse_missing_choices() {
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_wire_format_for_tool_turns() {
        let call = ToolCallRequest {
            id: "call_1".into(),
            name: "run_query".into(),
            arguments: json!({ "query": "SELECT 1" }),
        };
        let assistant = message_to_wire(&Message::assistant_with_tool_calls("", vec![call]));
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"SELECT 1\"}"
        );

        let result = message_to_wire(&Message::tool_result("call_1", "| 1 |"));
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "call_1");

        let system = message_to_wire(&Message::system("be brief"));
        assert_eq!(system, json!({ "role": "system", "content": "be brief" }));
    }

    #[tokio::test]
    async fn test_disabled_model_errors() {
        assert!(DisabledChatModel.complete("hi").await.is_err());
    }
}
