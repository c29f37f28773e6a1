//! Reminder engine server binary.
//!
//! Loads configuration, opens the store and fire ledger, starts the
//! tick loop, and serves the live delivery gateway until interrupted.

use ingat::bus::InMemoryBus;
use ingat::config::EngineConfig;
use ingat::engine::Engine;
use ingat::gateway::run_gateway;
use ingat::ledger::FireLedger;
use ingat::sink::{DeliverySink, NullSink, WhatsAppSink};
use ingat::store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ingat=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from("ingat.toml"), PathBuf::from);
    let config = EngineConfig::load_or_default(&config_path)?;

    // Startup validation is the only fatal error class: a bad timezone
    // or tick interval must prevent the scheduler from starting.
    let clock = config.validate().map_err(|e| {
        tracing::error!(error = %e, "invalid configuration");
        anyhow::anyhow!("invalid configuration: {e}")
    })?;

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let ledger = FireLedger::new(config.ledger_path.clone());
    let bus = Arc::new(InMemoryBus::new(config.buffer_capacity));

    let sink: Arc<dyn DeliverySink> = match &config.whatsapp {
        Some(whatsapp) => Arc::new(WhatsAppSink::new(whatsapp)),
        None => Arc::new(NullSink),
    };
    tracing::info!(sink = sink.id(), "delivery sink configured");

    let engine = Engine::new(
        clock,
        Arc::clone(&store) as _,
        Arc::clone(&store) as _,
        Arc::clone(&bus) as _,
        ledger,
    )
    .with_tick_secs(config.tick_secs)
    .with_retention_days(config.retention_days)
    .with_sink(sink);
    let mut engine_handle = engine.run();

    let gateway_bus = Arc::clone(&bus) as _;
    tokio::select! {
        result = run_gateway(config.gateway.clone(), gateway_bus) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "gateway exited with error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, shutting down");
        }
    }

    engine_handle.stop();
    engine_handle.join().await;
    tracing::info!("ingat-server shut down cleanly");
    Ok(())
}
