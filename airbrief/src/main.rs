pub(crate) mod agent;
pub(crate) mod aircraft;
pub(crate) mod airports;
pub(crate) mod audit;
pub(crate) mod error;
pub(crate) mod guardrail;
pub(crate) mod llm;
pub(crate) mod response;
pub(crate) mod settings;
pub(crate) mod tools;
pub(crate) mod weather;

use std::{io::Write, path::PathBuf, sync::Arc};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_unwrap::ResultExt;

use agent::Agent;
use audit::AuditSink;
use error::ApplicationResult;
use settings::Settings;
use tools::ToolRegistry;
use weather::WeatherService;

#[derive(Debug, Parser)]
#[command(
    name = "airbrief",
    about = "Answers pilot questions about weather and landing geometry, with every crosswind claim re-derived before it reaches you."
)]
struct Cli {
    /// The question, e.g. "crosswind landing at KDEN runway 26"
    query: String,
    /// Emit line-delimited JSON events instead of one response object
    #[arg(long)]
    stream: bool,
    /// Settings file (TOML); environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Skip the upstream weather API and use the built-in fallback records
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> ApplicationResult<()> {
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(writer)
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let audit = Arc::new(AuditSink::new(&settings.audit_log_path));
    let weather = if cli.offline {
        WeatherService::offline(audit.clone())
    } else {
        WeatherService::new(audit.clone())
    };
    let registry = ToolRegistry::new(weather, audit.clone(), &settings);
    let decider = llm::backend_from_settings(&settings);
    let agent = Arc::new(Agent::new(settings, registry, decider, audit));

    let stdout = std::io::stdout();
    if cli.stream {
        let mut events = agent.run_stream(cli.query, CancellationToken::new());
        let mut out = stdout.lock();
        while let Some(event) = events.recv().await {
            writeln!(out, "{}", serde_json::to_string(&event).unwrap_or_log())?;
        }
    } else {
        let response = agent.run(&cli.query).await;
        let mut out = stdout.lock();
        writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(&response).unwrap_or_log()
        )?;
    }
    Ok(())
}
