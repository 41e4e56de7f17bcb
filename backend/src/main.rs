//! Worker entry-point: wires the record store, task queue and handlers, then
//! runs the task processor until interrupted.

use std::sync::Arc;

use color_eyre::eyre::{Result, WrapErr};
use mockable::{Clock, DefaultClock};
use ortho_config::OrthoConfig;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use ledger::config::LedgerSettings;
use ledger::domain::TxCoordinator;
use ledger::domain::ports::{LedgerStore, TaskQueue};
use ledger::domain::task_queue::handlers::{DeleteOldAvatarHandler, SendVerifyEmailHandler};
use ledger::domain::task_queue::{TaskKind, TaskProcessor};
use ledger::outbound::blob::build_blob_store;
use ledger::outbound::mail::LogMailSender;
use ledger::outbound::memory::{InMemoryLedgerStore, InMemoryTaskQueue};
use ledger::outbound::persistence::{DbPool, DieselLedgerStore, DieselTaskQueue, run_migrations};

struct Adapters {
    store: Arc<dyn LedgerStore>,
    queue: Arc<dyn TaskQueue>,
}

async fn connect(settings: &LedgerSettings, clock: Arc<dyn Clock>) -> Result<Adapters> {
    let Some(pool_config) = settings.pool_config() else {
        warn!("no database configured; using in-process adapters");
        return Ok(Adapters {
            store: Arc::new(InMemoryLedgerStore::new(clock)),
            queue: Arc::new(InMemoryTaskQueue::default()),
        });
    };

    let url = pool_config.database_url().to_owned();
    let applied = tokio::task::spawn_blocking(move || run_migrations(&url))
        .await
        .wrap_err("migration task panicked")?
        .wrap_err("failed to apply migrations")?;
    info!(applied, "database schema is current");

    let pool = DbPool::new(pool_config)
        .await
        .wrap_err("failed to build database pool")?;
    Ok(Adapters {
        store: Arc::new(DieselLedgerStore::new(pool.clone())),
        queue: Arc::new(DieselTaskQueue::new(pool)),
    })
}

/// Application bootstrap.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = LedgerSettings::load().wrap_err("failed to load configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(DefaultClock);
    let adapters = connect(&settings, Arc::clone(&clock)).await?;
    let blobs = build_blob_store(settings.blob_handler(), &settings.blob_upload_dir())?;
    let coordinator = TxCoordinator::new(adapters.store);

    let verify_email = SendVerifyEmailHandler::new(
        coordinator,
        Arc::new(LogMailSender),
        Arc::clone(&clock),
        settings.verify_email_settings(),
    );
    let processor = TaskProcessor::new(adapters.queue, clock, settings.processor_config())
        .register(TaskKind::SendVerifyEmail, Arc::new(verify_email))
        .register(TaskKind::DeleteOldAvatar, Arc::new(DeleteOldAvatarHandler::new(blobs)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(Arc::new(processor).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .wrap_err("failed to listen for shutdown signal")?;
    info!("shutdown requested; draining in-flight tasks");
    shutdown_tx.send(true).wrap_err("task processor exited early")?;
    worker.await.wrap_err("task processor panicked")?;
    Ok(())
}
