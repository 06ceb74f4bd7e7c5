use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Parser;
use tracing::info;

use insights_agent::config::AgentConfig;
use insights_agent::engine::{self, MetricsEngine};
use insights_agent::input::{InsightsBlob, InsightsInput};

/// Insights agent: samples OS counters and prints metric blobs as JSON lines.
#[derive(Parser, Debug)]
#[command(name = "insights-agent", version, about)]
struct Cli {
    /// Path to the configuration file. Defaults are used when it does not exist.
    #[arg(short, long, default_value = "/etc/insights-agent/config.toml")]
    config: String,

    /// Collect one sample, print it and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "insights_agent=info".into()),
        )
        .init();

    let cli = Cli::parse();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting insights agent"
    );

    let cfg = AgentConfig::load_or_default(&cli.config)?;
    info!(
        interval = cfg.poll_interval_secs,
        computer = ?cfg.computer,
        root = %cfg.root_dir.display(),
        "Configuration loaded"
    );
    let engine_config = cfg.engine_configuration()?;

    if cli.once {
        let sample = engine::sample_once(&engine_config, Duration::from_secs(1)).await?;
        println!("{}", serde_json::to_string(&InsightsBlob::new(&sample))?);
        return Ok(());
    }

    let mut input = InsightsInput::new(cfg.tag.clone(), MetricsEngine::new(), engine_config);
    input.start(
        |tag: &str, time: DateTime<Utc>, blob: serde_json::Value| -> Result<()> {
            let line = serde_json::json!({ "tag": tag, "time": time, "record": blob });
            writeln!(std::io::stdout().lock(), "{line}")?;
            Ok(())
        },
    )?;
    info!(tag = input.tag(), "Emitting samples to stdout");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    input.stop().await;
    Ok(())
}
