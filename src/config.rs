//! TOML configuration parsing and validation.
//!
//! Every section except `[sqlite]` and `[graph]` has defaults, so a minimal
//! config only needs to point at the two stores. See [`load_config`] for the
//! validation rules.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::session::MAX_TTL_MINUTES;
use crate::tools::ToolKind;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    pub sqlite: SqliteConfig,
    pub graph: GraphConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            temperature: 0.0,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_max_retries(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout_secs(),
            max_retries: default_max_retries(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    #[serde(default = "default_max_query_retries")]
    pub max_query_retries: usize,
    #[serde(default = "default_tools")]
    pub tools: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            max_query_retries: default_max_query_retries(),
            tools: default_tools(),
        }
    }
}

impl AgentConfig {
    /// Resolve the configured tool names into the closed tool set.
    pub fn tool_kinds(&self) -> Result<Vec<ToolKind>> {
        self.tools
            .iter()
            .map(|name| {
                ToolKind::from_name(name).ok_or_else(|| {
                    anyhow::anyhow!(
                        "Unknown tool in agent.tools: '{}'. Must be one of: {}",
                        name,
                        ToolKind::ALL
                            .iter()
                            .map(|t| t.name())
                            .collect::<Vec<_>>()
                            .join(", ")
                    )
                })
            })
            .collect()
    }
}

/// Which table/node type holds the fuzzy-matchable entity and its embedding.
#[derive(Debug, Deserialize, Clone)]
pub struct EntityConfig {
    pub table: String,
    pub key: String,
    pub embedding: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_sqlite_entity")]
    pub entity: EntityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    pub url: String,
    /// Reject statements that can change data.
    #[serde(default = "default_read_only")]
    pub read_only: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_graph_entity")]
    pub entity: EntityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl_minutes(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    "gpt-4.1-mini-2025-04-14".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_embedding_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_recursion_limit() -> usize {
    10
}
fn default_max_query_retries() -> usize {
    2
}
fn default_tools() -> Vec<String> {
    vec![ToolKind::QueryDatabase.name().to_string()]
}
fn default_read_only() -> bool {
    true
}
fn default_query_timeout_secs() -> u64 {
    30
}
fn default_sqlite_entity() -> EntityConfig {
    EntityConfig {
        table: "listings".to_string(),
        key: "property_address".to_string(),
        embedding: "address_embedding".to_string(),
    }
}
fn default_graph_entity() -> EntityConfig {
    EntityConfig {
        table: "Listing".to_string(),
        key: "address".to_string(),
        embedding: "address_embedding".to_string(),
    }
}
fn default_namespace() -> String {
    "realty".to_string()
}
fn default_database() -> String {
    "listings".to_string()
}
fn default_ttl_minutes() -> i64 {
    60
}
fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Identifiers interpolated into store queries must be plain names.
fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn validate_entity(section: &str, entity: &EntityConfig) -> Result<()> {
    for (field, value) in [
        ("table", &entity.table),
        ("key", &entity.key),
        ("embedding", &entity.embedding),
    ] {
        if !is_identifier(value) {
            anyhow::bail!(
                "{}.entity.{} must be a plain identifier, got '{}'",
                section,
                field,
                value
            );
        }
    }
    Ok(())
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Validation shared by [`load_config`] and callers that build a
/// [`Config`] in code.
pub fn validate(config: &Config) -> Result<()> {
    if config.agent.recursion_limit == 0 {
        anyhow::bail!("agent.recursion_limit must be >= 1");
    }
    if config.agent.tools.is_empty() {
        anyhow::bail!("agent.tools must name at least one tool");
    }
    config.agent.tool_kinds()?;

    for (section, provider) in [
        ("llm", config.llm.provider.as_str()),
        ("embedding", config.embedding.provider.as_str()),
    ] {
        match provider {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown {} provider: '{}'. Must be disabled or openai.",
                section,
                other
            ),
        }
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.sqlite.query_timeout_secs == 0 || config.graph.query_timeout_secs == 0 {
        anyhow::bail!("query_timeout_secs must be > 0");
    }

    if config.graph.url.trim().is_empty() {
        anyhow::bail!("graph.url must not be empty");
    }

    validate_entity("sqlite", &config.sqlite.entity)?;
    validate_entity("graph", &config.graph.entity)?;

    if !(1..=MAX_TTL_MINUTES).contains(&config.session.ttl_minutes) {
        anyhow::bail!(
            "session.ttl_minutes must be between 1 and {}",
            MAX_TTL_MINUTES
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!(
            r#"
[sqlite]
path = "data/test.db"

[graph]
url = "mem://"
{}
"#,
            extra
        );
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.agent.recursion_limit, 10);
        assert_eq!(config.agent.max_query_retries, 2);
        assert_eq!(
            config.agent.tool_kinds().unwrap(),
            vec![ToolKind::QueryDatabase]
        );
        assert_eq!(config.llm.model, "gpt-4.1-mini-2025-04-14");
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert!(config.sqlite.read_only);
        assert!(config.graph.read_only);
        assert_eq!(config.sqlite.entity.table, "listings");
        assert_eq!(config.graph.entity.key, "address");
        assert_eq!(config.server.bind, "127.0.0.1:8000");
    }

    #[test]
    fn test_zero_recursion_limit_rejected() {
        let err = parse("[agent]\nrecursion_limit = 0").unwrap_err();
        assert!(err.to_string().contains("recursion_limit"));
    }

    #[test]
    fn test_unknown_tool_rejected() {
        let err = parse("[agent]\ntools = [\"drop_tables\"]").unwrap_err();
        assert!(err.to_string().contains("drop_tables"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse("[llm]\nprovider = \"ollama\"").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_session_ttl_bounded() {
        assert!(parse("[session]\nttl_minutes = 0").is_err());
        let err = parse("[session]\nttl_minutes = 9223372036854775807").unwrap_err();
        assert!(err.to_string().contains("ttl_minutes"));
        assert!(parse("[session]\nttl_minutes = 525600").is_ok());
    }

    #[test]
    fn test_entity_identifier_validated() {
        let err = parse(
            "[sqlite.entity]\ntable = \"listings; DROP TABLE x\"\nkey = \"a\"\nembedding = \"b\"",
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(is_identifier("Listing"));
        assert!(is_identifier("_private_1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
