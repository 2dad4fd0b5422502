//! mdsb broker
//!
//! The broker turns tenant create/delete requests for managed backing data
//! stores into provider operations, shares physical resources between
//! foundations that request the same logical instance, and converges
//! persisted state through background reconciliation.

use std::sync::Arc;

use anyhow::{bail, Result};
use mdsb_broker::{
    api,
    catalog::Catalog,
    config,
    db::{postgres::PgRegistry, Database, Registry},
    gateway::{sim::SimulatedGateway, ProviderGateway},
    lifecycle::Lifecycle,
    secrets,
    state::AppState,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to MDSB_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting mdsb broker");
    info!(
        listen_addr = %config.listen_addr,
        foundation = %config.foundation,
        provider = %config.provider,
        "Configuration loaded"
    );

    // The secrets key must be usable before any record is written
    match secrets::master_key_id() {
        Ok(key_id) => info!(key_id = %key_id, "Secrets master key loaded"),
        Err(e) => {
            error!(error = %e, "Secrets master key unavailable");
            return Err(e.into());
        }
    }

    let catalog = Arc::new(Catalog::load_dir(&config.catalog_dir)?);

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let registry: Arc<dyn Registry> = Arc::new(PgRegistry::new(db.pool().clone()));

    let gateway: Arc<dyn ProviderGateway> = match config.provider.as_str() {
        "sim" => Arc::new(SimulatedGateway::new()),
        other => bail!("unsupported provider gateway: {other}"),
    };

    let lifecycle = Lifecycle::new(
        registry,
        gateway,
        Arc::clone(&catalog),
        config.classes.clone(),
        config.foundation.clone(),
        config.poll_interval,
    );

    // Reconciler tasks do not survive a restart; resume in-flight work
    match lifecycle.resume_in_flight().await {
        Ok(resumed) if resumed > 0 => info!(resumed, "Resumed in-flight operations"),
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "Recovery sweep failed");
            return Err(e.into());
        }
    }

    // Build and run the server
    let state = AppState::new(lifecycle, catalog, Some(db));
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Broker shutdown complete");
    Ok(())
}
