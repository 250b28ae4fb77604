use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use watermark_inpaint::server::{self, AppState, ServerConfig, DEFAULT_MAX_UPLOAD_SIZE};
use watermark_inpaint::WatermarkRemover;

#[derive(Parser)]
#[command(
    name = "watermark-inpaint-server",
    about = "HTTP service that removes watermark-like markings from uploaded images",
    version
)]
struct Cli {
    /// Interface to bind
    #[arg(long, env = "APP_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind
    #[arg(long, env = "APP_PORT", default_value = "8000")]
    port: u16,

    /// Enable debug logging
    #[arg(long, env = "APP_DEBUG")]
    debug: bool,

    /// Directory processed images are written to
    #[arg(long, env = "APP_UPLOAD_DIR", default_value = "static/uploads")]
    upload_dir: PathBuf,

    /// Largest accepted request body in bytes
    #[arg(long, env = "APP_MAX_UPLOAD_SIZE", default_value_t = DEFAULT_MAX_UPLOAD_SIZE)]
    max_upload_size: usize,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            debug: cli.debug,
            upload_dir: cli.upload_dir,
            max_upload_size: cli.max_upload_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::from(Cli::parse());

    let default_level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    std::fs::create_dir_all(&config.upload_dir)?;
    info!(dir = %config.upload_dir.display(), "upload directory ready");

    let addr = config.bind_addr();
    let app = server::router(AppState::new(WatermarkRemover::default(), config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // no signal handler available; run until killed
        std::future::pending::<()>().await;
    }
}
