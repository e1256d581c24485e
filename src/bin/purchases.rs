//! # Event Persister
//!
//! Consumes the shared events queue and writes purchases and donations to
//! PostgreSQL.
//!
//! ## Usage
//!
//! ```bash
//! PIPELINE_ENV=production DATABASE_URL=postgresql://... cargo run --bin purchases
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use kdt_pipeline::config::ConfigManager;
use kdt_pipeline::database::{DatabaseConnection, Schema};
use kdt_pipeline::logging;
use kdt_pipeline::messaging::PgmqClient;
use kdt_pipeline::models::PgEventStore;
use kdt_pipeline::persister::EventPersister;
use kdt_pipeline::shutdown::cancel_on_signal;

#[derive(Debug, Parser)]
#[command(name = "purchases")]
#[command(about = "Persist purchase and donation events")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Directory holding pipeline.yaml
    #[arg(long, env = "PIPELINE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Environment section to apply (development, test, production)
    #[arg(long)]
    environment: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_structured_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting event persister");

    let environment = args
        .environment
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(args.config_dir, &environment)
        .context("loading configuration")?;
    let config = manager.config();

    let database = DatabaseConnection::new(&config.database)
        .await
        .context("connecting to PostgreSQL")?;
    let queue = Arc::new(PgmqClient::new_with_pool(database.pool().clone()).await);
    Schema::bootstrap(database.pool(), queue.as_ref(), &config.queues)
        .await
        .context("bootstrapping schema")?;

    let persister = EventPersister::new(
        queue,
        Arc::new(PgEventStore::new(database.pool().clone())),
        &config.queues,
        config.consumer.clone(),
    );

    let shutdown = cancel_on_signal();
    info!(environment = %manager.environment(), "Event persister running; Ctrl+C to stop");

    let result = persister.run(shutdown).await;
    database.close().await;

    if let Err(e) = result {
        logging::log_error("persister", "run", &e.to_string(), None);
        error!("Event persister stopped on a fatal error");
        return Err(e.into());
    }

    info!("Event persister shutdown complete");
    Ok(())
}
