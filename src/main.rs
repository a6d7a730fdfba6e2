use anyhow::Result;
use clap::Parser;
use dataviz_agent::{AgentConfig, LlmClient, SqliteStore, WorkflowManager};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Ask natural-language questions about a SQLite dataset and get back an
/// answer plus a chart-ready payload.
#[derive(Parser)]
#[command(name = "dataviz-agent", version)]
struct Args {
    /// The question to answer
    question: String,

    /// Path to the SQLite database (overrides DATABASE_PATH)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Print the full response as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::from_env()?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let llm = Arc::new(LlmClient::from_config(&config));
    let store = Arc::new(SqliteStore::open(&config.database_path)?);
    let workflow = WorkflowManager::new(llm, store);

    let result = workflow.run(&args.question).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Question: {}", args.question);
        println!("Answer: {}", result.answer);
        println!("Recommended Visualization: {}", result.visualization);
        println!("Visualization Reason: {}", result.visualization_reason);
        if let Some(data) = &result.formatted_data_for_visualization {
            println!("Formatted Data for Visualization: {}", data);
        }
        if let Some(error) = &result.error {
            println!("Error: {}", error);
        }
    }
    Ok(())
}
