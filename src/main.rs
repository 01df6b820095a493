//! # Realty Router CLI (`realty`)
//!
//! Answers questions about a real-estate dataset held in two stores: a
//! SQLite database and an embedded SurrealDB graph.
//!
//! ## Usage
//!
//! ```bash
//! realty --config ./config/realty.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `realty ask "<question>"` | Ask both stores and print the reconciled answer |
//! | `realty agent <store> "<question>"` | Run one agent loop and print its transcript |
//! | `realty schema <store>` | Print the schema text the model sees |
//! | `realty query <store> "<query>"` | Execute a query and print the table or error |
//! | `realty serve` | Start the HTTP server |
//!
//! `<store>` is `sqlite` or `graph`. `schema` and `query` never call the
//! language model, so they work without `OPENAI_API_KEY`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use realty_router::agent::AgentLoop;
use realty_router::aggregator::ResponseAggregator;
use realty_router::config::{self, Config};
use realty_router::embedding::{create_embedder, Embedder};
use realty_router::llm::{create_chat_model, ChatModel};
use realty_router::models::Role;
use realty_router::server;
use realty_router::session::{ChatService, SessionStore};
use realty_router::store::{GraphStore, SqliteStore, Store};

/// Realty Router: agentic question answering over a listings database
/// and a listings graph.
#[derive(Parser)]
#[command(name = "realty", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/realty.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a question. Both stores are queried and the answers merged.
    Ask {
        question: String,

        /// Session to continue. A new one is created when omitted.
        #[arg(long)]
        session: Option<String>,
    },

    /// Run a single agent loop against one store and print the transcript.
    Agent {
        #[arg(value_enum)]
        store: StoreArg,
        question: String,
    },

    /// Print the schema description of a store.
    Schema {
        #[arg(value_enum)]
        store: StoreArg,
    },

    /// Execute a query string against a store.
    Query {
        #[arg(value_enum)]
        store: StoreArg,
        query: String,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Sqlite,
    Graph,
}

async fn open_store(cfg: &Config, which: StoreArg) -> anyhow::Result<Arc<dyn Store>> {
    Ok(match which {
        StoreArg::Sqlite => Arc::new(SqliteStore::new(&cfg.sqlite)),
        StoreArg::Graph => Arc::new(GraphStore::connect(&cfg.graph).await?),
    })
}

fn providers(cfg: &Config) -> anyhow::Result<(Arc<dyn ChatModel>, Arc<dyn Embedder>)> {
    let model: Arc<dyn ChatModel> = Arc::from(create_chat_model(&cfg.llm)?);
    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&cfg.embedding)?);
    Ok((model, embedder))
}

async fn chat_service(cfg: &Config) -> anyhow::Result<ChatService> {
    let (model, embedder) = providers(cfg)?;
    let aggregator = ResponseAggregator::from_config(cfg, model, embedder).await?;
    Ok(ChatService::new(
        aggregator,
        SessionStore::new(cfg.session.ttl_minutes),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the key may already be exported. Loaded
    // first so RUST_LOG from the file applies.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ask { question, session } => {
            let service = chat_service(&cfg).await?;
            let reply = service.chat(session, None, &question).await;
            tracing::debug!(session = %reply.session_id, "answered");
            println!("{}", reply.response);
        }
        Commands::Agent { store, question } => {
            let (model, embedder) = providers(&cfg)?;
            let store = open_store(&cfg, store).await?;
            let agent = AgentLoop::from_config(&cfg.agent, model, embedder, store)?;
            let run = agent.run(&[], &question).await?;

            for msg in &run.messages {
                match msg.role {
                    Role::System => continue,
                    Role::Tool => println!("Observation: {}\n", msg.content),
                    _ if msg.requests_tool() => {
                        for call in &msg.tool_calls {
                            println!("Action: {} {}", call.name, call.arguments);
                        }
                    }
                    role => println!("{}: {}\n", role.as_str(), msg.content),
                }
            }
            println!(
                "({} tool call(s), stopped: {:?})",
                run.iterations, run.stop
            );
        }
        Commands::Schema { store } => {
            let store = open_store(&cfg, store).await?;
            println!("{}", store.describe_schema().await);
        }
        Commands::Query { store, query } => {
            let store = open_store(&cfg, store).await?;
            println!("{}", store.execute(&query).await.to_text());
        }
        Commands::Serve => {
            let service = Arc::new(chat_service(&cfg).await?);
            server::run_server(&cfg.server.bind, service).await?;
        }
    }

    Ok(())
}
