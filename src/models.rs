//! Conversation data types shared by the model client, the agent loop,
//! and the HTTP layer.
//!
//! A conversation is an ordered list of [`Message`]s. Ordering matters:
//! each tool-result message answers the tool-call request that precedes it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Parse a role label as sent by chat clients. `human` is accepted as
    /// an alias for `user`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A model-emitted instruction to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Call identifier, echoed back on the matching tool-result message.
    pub id: String,
    /// Tool name as declared to the model.
    pub name: String,
    /// Argument object. Validated against the tool's schema before use.
    pub arguments: Value,
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Only ever non-empty on assistant messages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set on tool-result messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    /// The request the Act step honors. Any further requests in the same
    /// message are ignored.
    pub fn first_tool_call(&self) -> Option<&ToolCallRequest> {
        self.tool_calls.first()
    }

    pub fn requests_tool(&self) -> bool {
        self.role == Role::Assistant && !self.tool_calls.is_empty()
    }
}

/// A `{role, content}` pair as exchanged with chat clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Convert client-supplied turns into messages.
///
/// Only user and assistant turns carry over; system turns and unknown
/// roles are dropped because every loop prepends its own instruction.
pub fn turns_to_messages(turns: &[ChatTurn]) -> Vec<Message> {
    turns
        .iter()
        .filter_map(|t| match Role::parse(&t.role)? {
            Role::User => Some(Message::user(&t.content)),
            Role::Assistant => Some(Message::assistant(&t.content)),
            Role::System | Role::Tool => None,
        })
        .collect()
}
