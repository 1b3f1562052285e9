//! Scheduled rule evaluation.
//!
//! Runs every active rule on `SCHEDULE_INTERVAL_SECS` until SIGINT/SIGTERM,
//! then lets in-flight runs finish before exiting.

use std::sync::Arc;
use std::time::Duration;

use adpilot_engine::{EngineConfig, RuleScheduler};
use adpilot_events::bus::RULE_RUN_COMPLETED;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adpilot_worker=debug,adpilot_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = EngineConfig::from_env();
    tracing::info!(
        interval_secs = config.schedule_interval.as_secs(),
        gateway = %config.gateway_url,
        "Loaded engine configuration"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = adpilot_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    adpilot_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    // --- Event bus ---
    let event_bus = Arc::new(adpilot_events::EventBus::default());
    let persistence_handle = tokio::spawn(adpilot_events::EventPersistence::run(
        pool.clone(),
        event_bus.subscribe(),
    ));
    let forwarder_handle = config.notify_webhook_url.as_ref().map(|url| {
        let delivery =
            adpilot_events::WebhookDelivery::new().expect("Failed to build webhook client");
        let forwarder =
            adpilot_events::WebhookForwarder::new(url.clone(), &[RULE_RUN_COMPLETED], delivery);
        tokio::spawn(forwarder.run(event_bus.subscribe()))
    });

    // --- Scheduler ---
    let orchestrator =
        adpilot_engine::adapters::build_orchestrator(pool, Arc::clone(&event_bus), &config)
            .expect("Failed to build action gateway client");
    let scheduler = RuleScheduler::new(Arc::new(orchestrator), config.schedule_interval);

    let cancel = CancellationToken::new();
    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = scheduler_handle.await {
        tracing::error!(error = %e, "Scheduler task panicked");
    }

    // The scheduler held the last orchestrator; dropping our sender closes the bus.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;
    if let Some(handle) = forwarder_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    tracing::info!("Worker stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
