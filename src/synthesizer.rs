//! Query Synthesizer: ask the model for one query that answers a question.
//!
//! The reply is trimmed and returned verbatim. Nothing is validated here;
//! a malformed query surfaces later as an executor error.

use anyhow::Result;

use crate::llm::ChatModel;
use crate::store::Dialect;

pub fn synthesis_prompt(schema: &str, question: &str, dialect: Dialect) -> String {
    format!(
        "Schema: {}\nQuestion: {}\nGenerate a {} query. Respond with only the query.",
        schema,
        question,
        dialect.label()
    )
}

pub struct QuerySynthesizer<'a> {
    model: &'a dyn ChatModel,
    dialect: Dialect,
}

impl<'a> QuerySynthesizer<'a> {
    pub fn new(model: &'a dyn ChatModel, dialect: Dialect) -> Self {
        Self { model, dialect }
    }

    pub async fn synthesize(&self, schema: &str, question: &str) -> Result<String> {
        let raw = self
            .model
            .complete(&synthesis_prompt(schema, question, self.dialect))
            .await?;
        let query = raw.trim().to_string();
        tracing::info!(dialect = self.dialect.label(), %query, "synthesized query");
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::tools::ToolSpec;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Echo {
        reply: String,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }

        async fn chat(&self, messages: &[Message], _tools: &[ToolSpec]) -> Result<Message> {
            if let Some(last) = messages.last() {
                self.seen.lock().unwrap().push(last.content.clone());
            }
            Ok(Message::assistant(self.reply.clone()))
        }
    }

    #[tokio::test]
    async fn test_output_is_trimmed_verbatim() {
        let model = Echo {
            reply: "\n  SELECT COUNT(*) FROM listings;  \n".into(),
            seen: Mutex::new(Vec::new()),
        };
        let synth = QuerySynthesizer::new(&model, Dialect::Sqlite);
        let query = synth
            .synthesize("Database schema:", "How many listings?")
            .await
            .unwrap();
        assert_eq!(query, "SELECT COUNT(*) FROM listings;");

        let prompts = model.seen.lock().unwrap();
        assert_eq!(
            prompts[0],
            "Schema: Database schema:\nQuestion: How many listings?\nGenerate a SQLite SQL query. Respond with only the query."
        );
    }

    #[tokio::test]
    async fn test_empty_reply_is_empty_query() {
        let model = Echo {
            reply: "   ".into(),
            seen: Mutex::new(Vec::new()),
        };
        let synth = QuerySynthesizer::new(&model, Dialect::SurrealQl);
        assert_eq!(synth.synthesize("s", "q").await.unwrap(), "");
    }
}
