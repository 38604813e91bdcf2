use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use nlq_engine::config::AppConfig;
use nlq_engine::db::SqliteStore;
use nlq_engine::models::{Question, SourceHint};
use nlq_engine::schema_rag::ContextRetriever;
use nlq_engine::server::AppState;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Answer natural-language questions against a SQLite database")]
struct Args {
    /// Path to the SQLite database (overrides DATABASE_PATH)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Path to the metadata directory (overrides METADATA_DIR)
    #[arg(short, long)]
    metadata_dir: Option<PathBuf>,

    /// Allow running without an API key, using canned model answers
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question and print the response as JSON
    Ask {
        question: String,

        /// Restrict example retrieval to one data source
        #[arg(long)]
        datasource: Option<String>,

        /// Restrict example retrieval to one main table
        #[arg(long)]
        table: Option<String>,
    },
    /// Print tables, columns, keys and sample rows
    Schema,
    /// Print dataset statistics
    Stats,
    /// Show the tables and examples retrieved for some text
    Search {
        text: String,

        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// Check a query against the database without running it
    Validate { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let mut config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(database) = args.database {
        config.database_path = database;
    }
    if let Some(metadata_dir) = args.metadata_dir {
        config.metadata_dir = metadata_dir;
    }
    let needs_model = matches!(args.command, Command::Ask { .. });
    config.validate(args.offline || !needs_model)?;

    let state = AppState::build(&config).await?;

    match args.command {
        Command::Ask {
            question,
            datasource,
            table,
        } => {
            info!("Question: {}", question);
            let question = Question::with_hint(question, SourceHint { datasource, table });
            let response = state.orchestrator.execute(&question).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Schema => {
            let schema = state.store.schema().await?;
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
        Command::Stats => {
            let stats = state.store.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Search { text, k } => {
            let tables = state.retriever.search_tables(&text, k).await?;
            let examples = state.retriever.search_examples(&text, k, None, None).await?;
            println!("=== Tables ===");
            for table in &tables {
                println!("{:.3}  {}  {}", table.score, table.table, table.description);
            }
            println!("\n=== Examples ===");
            for example in &examples {
                println!("{:.3}  [{}] {}", example.score, example.main_table, example.example.question);
                println!("       {}", example.example.query);
            }
        }
        Command::Validate { query } => {
            validate_query(&state.store, &query).await?;
            println!("Query is valid");
        }
    }

    Ok(())
}

/// A query the store cannot compile is a command failure.
async fn validate_query(store: &SqliteStore, query: &str) -> Result<()> {
    if let Err(e) = store.validate(query).await {
        bail!("Query is invalid: {}", e.reason());
    }
    Ok(())
}
