use stats_collector::config::environment::Config;
use stats_collector::{AppError, CollectorApp};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stats_collector=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!("Collector failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load configuration
    let config = Config::from_env()?;

    let app = CollectorApp::build(config).await?;
    app.start().await?;
    tracing::info!("Collector running; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }

    tracing::info!("Shutting down");
    app.shutdown().await;
    Ok(())
}
