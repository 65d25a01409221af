use std::sync::Arc;
use std::time::Duration;

use tessera_core::{BookingStore, LockStore, SessionStore};
use tessera_engine::{
    ExpirySweeper, NotificationDispatcher, PaymentSessions, Reconciler, SeatLockManager,
};
use tessera_store::{DbClient, KafkaTransport, PgBookingStore, PgLockStore, PgSessionStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tessera_worker=debug,tessera_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = tessera_store::app_config::Config::load()
        .map_err(|e| anyhow::anyhow!("failed to load config: {e}"))?;
    tracing::info!("Starting Tessera reservation worker");

    let db = DbClient::new(&config.database.url).await?;
    db.migrate().await?;

    let kafka = KafkaTransport::new(&config.kafka.brokers, &config.kafka.topic)?;
    let dispatcher = Arc::new(NotificationDispatcher::new(Arc::new(kafka)));

    let lock_store: Arc<dyn LockStore> = Arc::new(PgLockStore::new(db.pool.clone()));
    let session_store: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(db.pool.clone()));
    let booking_store: Arc<dyn BookingStore> = Arc::new(PgBookingStore::new(db.pool.clone()));

    // Constructed once at process start; request handlers get references.
    let locks = Arc::new(SeatLockManager::new(lock_store.clone()));
    let sessions = Arc::new(PaymentSessions::new(
        locks.clone(),
        session_store.clone(),
        booking_store,
        dispatcher.clone(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        locks.clone(),
        lock_store,
        Duration::from_secs(config.reconciler.interval_seconds),
    ));
    let sweeper = Arc::new(ExpirySweeper::new(
        locks,
        sessions,
        session_store,
        dispatcher,
        Duration::from_secs(config.sweeper.interval_seconds),
    ));

    // Startup repair pass before the loops take over.
    let report = reconciler.run_once().await?;
    tracing::info!(
        stale_rows = report.stale_rows,
        repaired_seats = report.repaired_seats,
        cached = report.cached,
        "startup reconciliation complete"
    );

    let sweep_handle = tokio::spawn(sweeper.run());
    let reconcile_handle = tokio::spawn(reconciler.run());

    tokio::select! {
        _ = sweep_handle => tracing::error!("sweeper loop exited"),
        _ = reconcile_handle => tracing::error!("reconciler loop exited"),
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
    }

    Ok(())
}
