//! # Realty Router
//!
//! Agentic question answering over a real-estate dataset (listings,
//! brokers, associates) held in two independent stores.
//!
//! Each question is handed to two agent loops, one per store. A loop lets
//! the language model decide whether to call a tool; the tool routes the
//! question to an address similarity search, a synthesized query, or a
//! plain conversational reply. The two answers are then reconciled into one.
//!
//! ## Architecture
//!
//! ```text
//!                       ┌──────────────┐
//!          question ───▶│  Aggregator  │───▶ answer
//!                       └──────┬───────┘
//!                  ┌───────────┴───────────┐
//!                  ▼                       ▼
//!           ┌────────────┐          ┌────────────┐
//!           │ Agent Loop │          │ Agent Loop │
//!           └─────┬──────┘          └─────┬──────┘
//!                 ▼                       ▼
//!           ┌────────────┐          ┌────────────┐
//!           │ Dispatcher │          │ Dispatcher │
//!           └─────┬──────┘          └─────┬──────┘
//!                 ▼                       ▼
//!            Graph store             SQLite store
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! realty schema sqlite
//! realty query graph "SELECT count() FROM Listing GROUP ALL"
//! realty ask "What is the size of 18 W 38th St?"
//! realty serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Conversation messages and tool-call requests |
//! | [`table`] | Query results and Markdown rendering |
//! | [`llm`] | Language-model provider abstraction |
//! | [`embedding`] | Embedding provider abstraction, cosine similarity |
//! | [`store`] | Store trait, schema introspection, SQLite and graph backends |
//! | [`intent`] | Intent Router |
//! | [`similarity`] | Similarity Resolver |
//! | [`synthesizer`] | Query Synthesizer |
//! | [`tools`] | Closed tool set and argument validation |
//! | [`dispatcher`] | Tool Dispatcher |
//! | [`agent`] | Agent Loop |
//! | [`aggregator`] | Response Aggregator |
//! | [`session`] | Per-session conversation state |
//! | [`server`] | HTTP server |

pub mod agent;
pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod embedding;
pub mod intent;
pub mod llm;
pub mod models;
mod openai;
pub mod server;
pub mod session;
pub mod similarity;
pub mod store;
pub mod synthesizer;
pub mod table;
pub mod tools;
