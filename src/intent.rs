//! Intent Router: classify a question before dispatch.
//!
//! One completion against a fixed instruction prompt. The model's raw
//! output is searched for the three category tokens in a fixed order, so
//! `"Classification: ADDRESS_SEARCH."` still counts. Output containing none
//! of them is kept as [`Intent::Unrecognized`]; the dispatcher treats that
//! as a general query.

use anyhow::Result;
use std::fmt;

use crate::llm::ChatModel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// The question names a specific street address.
    AddressSearch,
    /// Needs a structured query over the store.
    GeneralQuery,
    /// Small talk or unrelated to real estate.
    NormalQuery,
    /// None of the tokens appeared; carries the raw output.
    Unrecognized(String),
}

impl Intent {
    pub const ADDRESS_SEARCH: &'static str = "ADDRESS_SEARCH";
    pub const GENERAL_QUERY: &'static str = "GENERAL_QUERY";
    pub const NORMAL_QUERY: &'static str = "NORMAL_QUERY";

    /// Substring match, checked in the order address, general, normal.
    pub fn parse(raw: &str) -> Self {
        if raw.contains(Self::ADDRESS_SEARCH) {
            Intent::AddressSearch
        } else if raw.contains(Self::GENERAL_QUERY) {
            Intent::GeneralQuery
        } else if raw.contains(Self::NORMAL_QUERY) {
            Intent::NormalQuery
        } else {
            Intent::Unrecognized(raw.trim().to_string())
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::AddressSearch => f.write_str(Self::ADDRESS_SEARCH),
            Intent::GeneralQuery => f.write_str(Self::GENERAL_QUERY),
            Intent::NormalQuery => f.write_str(Self::NORMAL_QUERY),
            Intent::Unrecognized(_) => f.write_str("UNRECOGNIZED"),
        }
    }
}

pub fn router_prompt(question: &str) -> String {
    format!(
        "You are a classification model. Your task is to determine if the following user \
question is asking about a specific street address, is a general query requiring a database \
search, or is just normal conversation like Hi, Hello, Thank You, or Goodbye.\n\
Classify questions unrelated to real estate as NORMAL_QUERY.\n\
Answer with only 'ADDRESS_SEARCH' or 'GENERAL_QUERY' or 'NORMAL_QUERY'.\n\
\n\
Question: {}\n\
Classification:",
        question
    )
}

pub struct IntentRouter<'a> {
    model: &'a dyn ChatModel,
}

impl<'a> IntentRouter<'a> {
    pub fn new(model: &'a dyn ChatModel) -> Self {
        Self { model }
    }

    pub async fn classify(&self, question: &str) -> Result<Intent> {
        let raw = self.model.complete(&router_prompt(question)).await?;
        let intent = Intent::parse(&raw);
        tracing::info!(%intent, raw = %raw.trim(), "classified question");
        Ok(intent)
    }
}
