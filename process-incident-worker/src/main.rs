//! Process incident worker
//!
//! Reads newline-delimited incident messages from a file or stdin and
//! reconciles them against the workflow engine and the incident store.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use process_incident_core::camunda::CamundaGateway;
use process_incident_core::store_memory::MemoryIncidentStore;
use process_incident_core::{IncidentController, IncidentStore, WorkflowGateway};
use process_incident_worker::{spawn_line_source, IncidentConsumer, StoreBackend, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "process-incident-worker", about = "Reconcile workflow incident messages")]
struct Cli {
    /// YAML or JSON configuration file.
    #[arg(long, env = "INCIDENT_CONFIG")]
    config: Option<PathBuf>,

    /// Message input; `-` reads stdin.
    #[arg(long, default_value = "-")]
    input: String,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Tracing comes up before the config so that config errors are logged.
    let filter = init_tracing(cli.debug);
    let config = match WorkerConfig::resolve(
        cli.config.as_deref(),
        |var| std::env::var(var).ok(),
        cli.debug,
    ) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Unable to load configuration");
            return Err(e.into());
        }
    };
    if config.debug && !cli.debug {
        if let Err(e) = filter.reload(env_filter(true)) {
            tracing::warn!(error = %e, "Unable to raise log level");
        }
    }
    tracing::info!(
        engine_url = %config.engine_url,
        tenants = config.tenant_engine_urls.len(),
        store = config.store.as_str(),
        timeout_ms = config.dependency_timeout_ms,
        "Starting process incident worker"
    );

    let gateway = build_gateway(&config)?;
    let store = build_store(&config).await?;
    let controller = Arc::new(IncidentController::new(
        gateway,
        store,
        config.controller_options(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let source = if cli.input == "-" {
        spawn_line_source(BufReader::new(tokio::io::stdin()), tx)
    } else {
        let file = tokio::fs::File::open(&cli.input)
            .await
            .with_context(|| format!("Opening input {}", cli.input))?;
        spawn_line_source(BufReader::new(file), tx)
    };

    let consumer = IncidentConsumer::new(controller, config.redelivery_policy());
    let result = consumer.run(rx, shutdown_rx).await;

    // The source may still be parked on stdin after a shutdown.
    source.abort();
    match source.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Input source failed"),
        Ok(Ok(forwarded)) => tracing::debug!(forwarded, "Input source finished"),
        Err(_) => {}
    }

    let stats = result?;
    tracing::info!(
        received = stats.received,
        handled = stats.handled,
        ignored = stats.ignored,
        "Process incident worker stopped"
    );
    Ok(())
}

/// RUST_LOG wins over `debug`.
fn env_filter(debug: bool) -> EnvFilter {
    let default_level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into())
}

fn init_tracing(debug: bool) -> reload::Handle<EnvFilter, Registry> {
    let (filter, handle) = reload::Layer::new(env_filter(debug));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

fn build_gateway(config: &WorkerConfig) -> Result<Arc<dyn WorkflowGateway>> {
    let mut gateway = CamundaGateway::new(&config.engine_url, config.dependency_timeout())
        .context("Configuring engine gateway")?;
    for (tenant, url) in &config.tenant_engine_urls {
        gateway = gateway
            .with_tenant_engine(tenant.clone(), url)
            .with_context(|| format!("Configuring engine for tenant {tenant}"))?;
    }
    Ok(Arc::new(gateway))
}

async fn build_store(config: &WorkerConfig) -> Result<Arc<dyn IncidentStore>> {
    match config.store {
        StoreBackend::Memory => {
            tracing::warn!("In-memory incident store selected; incidents are lost on restart");
            Ok(Arc::new(MemoryIncidentStore::new()))
        }
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres => {
            use process_incident_core::store_postgres::PgIncidentStore;

            let url = config
                .database_url
                .as_deref()
                .context("store 'postgres' requires database_url")?;
            let store = PgIncidentStore::connect(url, config.max_connections)
                .await
                .context("Connecting to incident database")?;
            store
                .ensure_schema()
                .await
                .context("Creating incident schema")?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres => {
            anyhow::bail!("store 'postgres' requires building with the `postgres` feature")
        }
    }
}
