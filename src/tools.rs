//! The closed set of tools an agent loop can bind.
//!
//! Each tool is a [`ToolKind`] variant with a declared JSON Schema. A
//! model-emitted [`ToolCallRequest`] is validated against that schema and
//! decoded into a typed [`ToolRequest`]; the dispatcher then matches on the
//! variant. Adding a tool means adding a variant here and an arm in
//! [`crate::dispatcher::ToolDispatcher::execute`].
//!
//! | Tool | Arguments | Behavior |
//! |------|-----------|----------|
//! | `query_real_estate_database` | `question` | Route, then search / synthesize / converse |
//! | `run_query` | `query` | Execute a query string verbatim |

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::{json, Value};

use crate::models::ToolCallRequest;

/// Tool declaration sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ToolKind {
    QueryDatabase,
    RunQuery,
}

impl ToolKind {
    pub const ALL: [ToolKind; 2] = [ToolKind::QueryDatabase, ToolKind::RunQuery];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::QueryDatabase => "query_real_estate_database",
            ToolKind::RunQuery => "run_query",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::QueryDatabase => {
                "The only tool you need to answer any question about real estate. \
                 Provide the user's entire question to the 'question' argument."
            }
            ToolKind::RunQuery => {
                "Runs a query against the real estate database and returns the result. \
                 If the query is invalid, it returns an error message."
            }
        }
    }

    pub fn parameters_schema(&self) -> Value {
        match self {
            ToolKind::QueryDatabase => json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string", "description": "The user's full question" }
                },
                "required": ["question"]
            }),
            ToolKind::RunQuery => json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "A single query in the store's query language" }
                },
                "required": ["query"]
            }),
        }
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A validated, typed tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRequest {
    QueryDatabase { question: String },
    RunQuery { query: String },
}

impl ToolRequest {
    /// Decode a model-emitted call. Fails if the tool is not bound to this
    /// loop or the arguments do not satisfy its schema.
    pub fn from_call(call: &ToolCallRequest, allowed: &[ToolKind]) -> Result<Self> {
        let kind = ToolKind::from_name(&call.name)
            .filter(|k| allowed.contains(k))
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", call.name))?;

        let params = validate_params(&kind.parameters_schema(), &call.arguments)?;
        let text = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };

        Ok(match kind {
            ToolKind::QueryDatabase => ToolRequest::QueryDatabase {
                question: text("question"),
            },
            ToolKind::RunQuery => ToolRequest::RunQuery {
                query: text("query"),
            },
        })
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::QueryDatabase { .. } => ToolKind::QueryDatabase,
            ToolRequest::RunQuery { .. } => ToolKind::RunQuery,
        }
    }
}

/// What a tool hands back to the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    /// True when the content describes a failure the model may retry.
    pub failed: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            failed: false,
        }
    }

    pub fn failed(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            failed: true,
        }
    }
}

/// Check `params` against a JSON Schema object's `required` list and
/// per-property `type`. Returns the parameter object.
pub fn validate_params(schema: &Value, params: &Value) -> Result<serde_json::Map<String, Value>> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        other => bail!(
            "tool arguments must be a JSON object, got {}",
            json_type_name(other)
        ),
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in required {
        if !params_obj.contains_key(req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (prop_name, prop_schema) in properties {
            let Some(value) = params_obj.get(prop_name) else {
                continue;
            };
            if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                let type_ok = match expected_type {
                    "string" => value.is_string(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "number" => value.is_number(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !type_ok {
                    bail!(
                        "parameter '{}' must be of type '{}', got {}",
                        prop_name,
                        expected_type,
                        json_type_name(value)
                    );
                }
            }
        }
    }

    Ok(params_obj)
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn test_names_round_trip_through_lookup() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("run_sql"), None);
    }

    #[test]
    fn test_decode_query_database() {
        let req = ToolRequest::from_call(
            &call(
                "query_real_estate_database",
                json!({ "question": "How many listings are there?" }),
            ),
            &[ToolKind::QueryDatabase],
        )
        .unwrap();
        assert_eq!(
            req,
            ToolRequest::QueryDatabase {
                question: "How many listings are there?".into()
            }
        );
        assert_eq!(req.kind(), ToolKind::QueryDatabase);
    }

    #[test]
    fn test_unbound_tool_rejected() {
        let err = ToolRequest::from_call(
            &call("run_query", json!({ "query": "SELECT 1" })),
            &[ToolKind::QueryDatabase],
        )
        .unwrap_err();
        assert!(err.to_string().contains("Unknown tool: run_query"));
    }

    #[test]
    fn test_missing_argument_rejected() {
        let err = ToolRequest::from_call(
            &call("run_query", json!({})),
            &ToolKind::ALL,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing required parameter: query"));
    }

    #[test]
    fn test_wrong_argument_type_rejected() {
        let err = ToolRequest::from_call(
            &call("query_real_estate_database", json!({ "question": 7 })),
            &ToolKind::ALL,
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be of type 'string'"));
    }

    #[test]
    fn test_non_object_arguments_rejected() {
        let err = validate_params(
            &ToolKind::RunQuery.parameters_schema(),
            &json!("{not json"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"));
    }

    #[test]
    fn test_spec_carries_schema() {
        let spec = ToolKind::RunQuery.spec();
        assert_eq!(spec.name, "run_query");
        assert_eq!(spec.parameters["required"][0], "query");
    }
}
