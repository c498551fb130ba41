//! CLI entry point: load configuration, run one research question end to
//! end, and print the run directory the report and artifacts were written
//! to.

use std::sync::Arc;

use clap::Parser;
use deep_research_engine::config::Config;
use deep_research_engine::llm::LlmClient;
use deep_research_engine::orchestrator::{run_research, Engine};
use deep_research_engine::templates::TemplateStore;
use deep_research_engine::tracker::Tracker;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "deep-research", about = "Autonomous LLM-directed research pipeline")]
struct Cli {
    /// The research question to investigate.
    question: String,

    /// Path to a YAML configuration file. Missing file falls back to defaults.
    #[arg(long, default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    let api_key = std::env::var("RESEARCH_LLM_API_KEY").unwrap_or_default();
    let base_url = std::env::var("RESEARCH_LLM_BASE_URL").unwrap_or_else(|_| "https://api.x.ai/v1".to_string());

    let ledger_path = std::path::Path::new(&config.logs_dir).join("requests.db");
    let log_path = std::path::Path::new(&config.logs_dir).join("api_requests.jsonl");
    let tracker = Tracker::new(ledger_path, log_path).await?;

    let llm = Arc::new(LlmClient::new(api_key, base_url).with_tracker(tracker.clone()));
    let templates = Arc::new(TemplateStore::load(&config.templates_dir)?);

    let engine = Engine::new(llm, templates, tracker);

    let run = run_research(&engine, &cli.question, config).await?;

    println!("run finished: state={:?} tasks={} cost=${:.4}", run.state, run.tasks.len(), run.cost_usd);
    Ok(())
}
