use clap::Parser;
use std::sync::Arc;
use tilldb::{create_router, StorageEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the API token when `--api-token` is absent
const API_TOKEN_ENV: &str = "TILLDB_API_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "tilldb")]
#[command(about = "tilldb - authoritative document server for point-of-sale stores", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 6745)]
    port: u16,

    /// Data directory path
    #[arg(long, default_value = "./data")]
    data_dir: String,

    /// Namespace used for ids without one
    #[arg(long, default_value = tilldb_core::DEFAULT_NAMESPACE)]
    default_namespace: String,

    /// Bearer token required on the document API
    #[arg(long)]
    api_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tilldb=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api_token = args
        .api_token
        .or_else(|| std::env::var(API_TOKEN_ENV).ok())
        .filter(|t| !t.is_empty());
    if api_token.is_none() {
        tracing::warn!("No API token configured, the document API is open");
    }

    let storage = Arc::new(StorageEngine::with_default_namespace(
        &args.data_dir,
        &args.default_namespace,
    )?);
    let app = create_router(storage.clone(), api_token);

    // Start server with graceful shutdown
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, flushing storage...");
    storage.flush()?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
