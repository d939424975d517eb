use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use weather_dash::capture::{CaptureConfig, CdpRenderer};
use weather_dash::server::{self, AppState, Metrics};

#[derive(Parser, Debug)]
#[command(
    name = "weather-dash",
    about = "Serves e-ink ready screenshots of the weather dashboard",
    version
)]
struct Cli {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: SocketAddr,

    /// Base URL the browser loads the dashboard from (usually this server)
    #[arg(long, default_value = "http://localhost:8000")]
    dashboard_url: String,

    /// Directory holding the prebuilt SPA
    #[arg(long, default_value = "./frontend/dist")]
    static_dir: PathBuf,

    /// CSS selector that marks the dashboard as mounted
    #[arg(long, default_value = "#root div")]
    ready_selector: String,

    /// Cap on waiting for the readiness marker, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    ready_timeout_ms: u64,

    /// Cap on waiting for network activity to settle, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    idle_timeout_ms: u64,

    /// Fixed delay before capture for late animations, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    settle_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("weather-dash: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let capture_config = CaptureConfig {
        dashboard_base: cli.dashboard_url,
        ready_selector: cli.ready_selector,
        ready_timeout: Duration::from_millis(cli.ready_timeout_ms),
        idle_timeout: Duration::from_millis(cli.idle_timeout_ms),
        settle_delay: Duration::from_millis(cli.settle_delay_ms),
        ..CaptureConfig::default()
    };

    let state = AppState {
        renderer: Arc::new(CdpRenderer::new(capture_config)),
        metrics: Arc::new(Metrics::new()),
    };

    let static_dir = if cli.static_dir.is_dir() {
        Some(cli.static_dir)
    } else {
        warn!(dir = %cli.static_dir.display(), "static dir missing, SPA hosting disabled");
        None
    };

    let app = server::router(state, static_dir);

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(addr = %cli.listen, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
