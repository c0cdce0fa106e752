use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tiktok_live::{BridgeConfig, WebSocketBridgeProvider};
use tiktok_scraper::{Orchestrator, ScraperConfig, config::load_streamers, logging};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Streamer list, one username per line
    #[arg(long, env = "TIKTOK_STREAMERS", default_value = "streamers.txt")]
    streamers: PathBuf,

    /// Output directory (overrides `output_dir` in the config file)
    #[arg(long, env = "TIKTOK_OUTPUT_DIR")]
    output: Option<PathBuf>,

    /// Configuration file, created with defaults when missing
    #[arg(long, env = "TIKTOK_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Directory for the rolling log files
    #[arg(long, env = "TIKTOK_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Bridge endpoint with a `{username}` placeholder (overrides `bridge_url`)
    #[arg(long, env = "TIKTOK_BRIDGE_URL")]
    bridge_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let (log_config, _guard) = logging::init_logging(&args.log_dir, args.verbose)?;
    let background_token = CancellationToken::new();
    log_config.start_retention_cleanup(background_token.clone());
    info!(log_dir = %log_config.log_dir().display(), "tiktok-scraper starting");

    let mut config = ScraperConfig::load_or_create(&args.config)
        .await
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(output) = args.output {
        config.output_dir = output;
    }
    if let Some(bridge_url) = args.bridge_url {
        config.bridge_url = bridge_url;
    }
    config.validate()?;

    let targets = load_streamers(&args.streamers)
        .await
        .with_context(|| format!("Failed to load streamers from {}", args.streamers.display()))?;

    let bridge = BridgeConfig {
        url_template: config.bridge_url.clone(),
        handshake_timeout: config.connect_timeout(),
        ..Default::default()
    };
    let provider = Arc::new(WebSocketBridgeProvider::new(bridge));

    let orchestrator = Orchestrator::new(config, targets, provider)?;
    let report = orchestrator.run(wait_for_shutdown_signal()).await;
    background_token.cancel();

    let failures = report.failures();
    for (streamer, error) in &failures {
        error!(streamer = %streamer, error = %error, "Streamer stopped with an error");
    }
    if !failures.is_empty() && failures.len() == report.outcomes.len() {
        anyhow::bail!("every streamer stopped with an error");
    }

    info!("tiktok-scraper stopped");
    Ok(())
}

/// Resolve on Ctrl+C, or SIGTERM on Unix.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler failed, listening for Ctrl+C only");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    }
}
