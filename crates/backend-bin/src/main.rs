// ============================
// fleet-backend-bin/src/main.rs
// ============================
//! Entry point for the fleet location server.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fleet_backend_lib::{
    config::{LogFormat, Settings, DEV_JWT_SECRET},
    ws_router, AppState,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "fleet-server", about = "Real-time fleet location server")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Disable the fallback movement simulation
    #[arg(long)]
    no_simulation: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        settings.bind_addr = bind;
    }
    if cli.no_simulation {
        settings.simulation.enabled = false;
    }

    init_tracing(&settings);

    if settings.auth.jwt_secret == DEV_JWT_SECRET {
        warn!("auth.jwt_secret is the development default; set FLEET_AUTH__JWT_SECRET in production");
    }

    let state = Arc::new(AppState::from_settings(settings.clone()).await?);
    let ticker = state.spawn_update_loop();

    let app = ws_router::create_router(state);

    let listener = TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("binding {}", settings.bind_addr))?;
    info!(
        addr = %settings.bind_addr,
        ws_path = %settings.ws_path,
        simulation = settings.simulation.enabled,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ticker.abort();
    info!("server stopped");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match settings.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
