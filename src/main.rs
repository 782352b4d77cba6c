//! Warden - relationship-based access control sync and check service

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden::{
    cache::KvRelationCache,
    check::{CheckEngine, CheckMetrics},
    config::Args,
    handlers::Dispatcher,
    nats::{self, NatsClient},
    server::{self, AppState},
    store::HttpFgaClient,
    sync::SyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_filter().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Warden - access control sync");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("NATS: {}", args.nats.nats_url);
    info!("Cache bucket: {} (use_cache: {})", args.cache_bucket, args.use_cache);
    info!("Store API: {}", args.fga_api_url);
    info!("======================================");

    // Create the authorization store client.
    let store: Arc<dyn warden::store::FgaClient> = match HttpFgaClient::new(&args) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create store client: {}", e);
            std::process::exit(1);
        }
    };

    // Connect to NATS.
    let nats_client = match NatsClient::new(&args.nats, &format!("warden-{}", args.node_id)).await {
        Ok(client) => client,
        Err(e) => {
            error!("NATS connection failed: {}", e);
            std::process::exit(1);
        }
    };

    // Bind the check cache bucket.
    let jetstream = async_nats::jetstream::new(nats_client.inner().clone());
    let bucket = match jetstream.get_key_value(&args.cache_bucket).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to bind cache bucket {}: {}", args.cache_bucket, e);
            std::process::exit(1);
        }
    };
    let cache: Arc<dyn warden::cache::RelationCache> = Arc::new(KvRelationCache::new(bucket));

    // Wire the engines and the subject registry.
    let metrics = Arc::new(CheckMetrics::new());
    let sync = Arc::new(SyncEngine::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        args.use_cache,
    ));
    let check = Arc::new(CheckEngine::new(
        store,
        cache,
        Arc::clone(&metrics),
        args.use_cache,
    ));
    let dispatcher = Arc::new(Dispatcher::standard(sync, check));

    if let Err(e) = nats::start(&nats_client, dispatcher).await {
        error!("Failed to create queue subscriptions: {}", e);
        std::process::exit(1);
    }

    // Health/metrics server. Runs for the whole process lifetime so
    // liveness probes keep passing during graceful shutdown.
    let state = Arc::new(AppState {
        args: args.clone(),
        nats: nats_client.clone(),
        metrics,
    });
    tokio::spawn(async move {
        if let Err(e) = server::run(state).await {
            error!("Health server error: {}", e);
        }
    });

    // Block until SIGINT or SIGTERM.
    shutdown_signal().await;

    // Drain subscriptions so in-flight handlers finish before the
    // connection closes.
    info!("Draining NATS connection");
    if let Err(e) = nats_client.drain().await {
        error!("Error draining NATS connection: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
