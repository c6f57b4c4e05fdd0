//! FundraiseAgent backend — entry point.
//!
//! Wires the session registry, subscription gate, upload coordinator and
//! fundraise trigger together behind an Axum REST API, and spawns the
//! background task that re-validates active subscriptions against on-chain
//! expiry.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use fundraise_agent::api::{self, ApiState};
use fundraise_agent::chain::ContractClient;
use fundraise_agent::config::Config;
use fundraise_agent::records::{self, ProjectRecordStore};
use fundraise_agent::session::SessionRegistry;
use fundraise_agent::storage::StorageClient;
use fundraise_agent::subscription::{self, SubscriptionGate};
use fundraise_agent::trigger::FundraiseTrigger;
use fundraise_agent::upload::UploadCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = records::init_pool(&config.database_url).await?;

    // HTTP client shared between the chain, storage and webhook calls.
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    // ─── Components ───────────────────────────────────────
    let chain = Arc::new(ContractClient::new(
        client.clone(),
        config.rpc_url.clone(),
        config.contract_address.clone(),
        Duration::from_secs(config.receipt_poll_secs),
        config.receipt_poll_attempts,
    ));

    // Sanity-check the RPC node against the configured chain.
    match chain.chain_id().await {
        Ok(id) if id == config.chain_id => info!("Connected to chain {id}"),
        Ok(id) => warn!(
            "RPC node serves chain {id}, but CHAIN_ID is {}",
            config.chain_id
        ),
        Err(e) => warn!("Could not read chain id from RPC: {e}"),
    }

    let registry = Arc::new(SessionRegistry::new(config.chain_id));
    let gate = Arc::new(SubscriptionGate::new(chain));
    let records_store = Arc::new(ProjectRecordStore::new(pool));
    let storage = Arc::new(StorageClient::new(
        client.clone(),
        config.storage_url.clone(),
        config.storage_key.clone(),
    ));
    let uploads = Arc::new(UploadCoordinator::new(
        storage,
        records_store.clone(),
        config.max_file_bytes,
        Duration::from_millis(config.upload_cooldown_ms),
    ));
    let trigger = Arc::new(FundraiseTrigger::new(
        client,
        config.webhook_url.clone(),
        records_store.clone(),
    ));

    // ─── Background revalidator ───────────────────────────
    tokio::spawn(subscription::run_revalidator(
        registry.clone(),
        gate.clone(),
        Duration::from_secs(config.revalidate_interval_secs),
    ));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(ApiState {
        registry,
        gate,
        uploads,
        trigger,
        records: records_store,
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/session/connect", post(api::connect))
        .route("/session/disconnect", post(api::disconnect))
        .route("/session/:address/subscription", get(api::subscription_status))
        .route("/session/:address/subscribe/prepare", get(api::prepare_mint))
        .route("/session/:address/subscribe", post(api::subscribe))
        .route("/session/:address/extend/prepare", get(api::prepare_extend))
        .route("/session/:address/extend", post(api::extend))
        .route("/session/:address/upload", post(api::upload_file))
        .route("/session/:address/process", post(api::process))
        .route("/projects/:address", get(api::get_project))
        .layer(DefaultBodyLimit::max(config.max_file_bytes as usize + 1024))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
