//! # Notification Dispatcher
//!
//! Runs the notification dispatcher and the push delivery worker side by
//! side. Either one failing stops both.
//!
//! ## Usage
//!
//! ```bash
//! FCM_CREDENTIALS_FILE=/secrets/firebase.json MONGODB_URI=mongodb://... cargo run --bin notifications
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
use kdt_pipeline::notifications::{
    DeliverySchedule, DeliveryWorker, FcmPushTransport, MongoTokenDirectory,
    NotificationDispatcher,
};
use kdt_pipeline::shutdown::cancel_on_signal;

#[derive(Debug, Parser)]
#[command(name = "notifications")]
#[command(about = "Schedule and deliver push notifications")]
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

    info!(version = env!("CARGO_PKG_VERSION"), "Starting notification dispatcher");

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

    let directory = Arc::new(
        MongoTokenDirectory::connect(&config.token_directory)
            .await
            .context("connecting to the token directory")?,
    );
    let transport =
        Arc::new(FcmPushTransport::from_config(&config.push).context("configuring FCM")?);
    let schedule = DeliverySchedule::from_config(&config.notifications)?;

    let dispatcher = NotificationDispatcher::new(
        queue.clone(),
        directory,
        schedule,
        &config.queues,
        config.consumer.clone(),
    );
    let worker = DeliveryWorker::new(
        queue,
        transport,
        config.queues.push_deliveries.clone(),
        config.notifications.clone(),
    );

    let shutdown = cancel_on_signal();
    info!(
        environment = %manager.environment(),
        target_utc_offset_seconds = config.notifications.target_utc_offset_seconds,
        "Notification dispatcher running; Ctrl+C to stop"
    );

    let dispatcher_run = async {
        let result = dispatcher.run(shutdown.clone()).await;
        shutdown.cancel();
        result
    };
    let worker_run = async {
        let result = worker.run(shutdown.clone()).await;
        shutdown.cancel();
        result
    };
    let (dispatched, delivered) = tokio::join!(dispatcher_run, worker_run);
    database.close().await;

    for (component, result) in [("dispatcher", dispatched), ("delivery_worker", delivered)] {
        if let Err(e) = result {
            logging::log_error(component, "run", &e.to_string(), None);
            error!(component = component, "Stopped on a fatal error");
            return Err(e.into());
        }
    }

    info!("Notification dispatcher shutdown complete");
    Ok(())
}
