//! End-to-end pipeline tests against throwaway stand-ins for the chain RPC,
//! the object storage service, and the processing webhook.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use reqwest::Client;
use serde_json::{json, Value};

use fundraise_agent::chain::ContractClient;
use fundraise_agent::errors::AgentError;
use fundraise_agent::records::ProjectRecordStore;
use fundraise_agent::session::{SessionRegistry, WalletAddress};
use fundraise_agent::storage::StorageClient;
use fundraise_agent::subscription::{GateState, SubscriptionGate};
use fundraise_agent::trigger::FundraiseTrigger;
use fundraise_agent::upload::{FilePayload, UploadCoordinator};

const CHAIN_ID: u64 = 5003;
const EXPIRES_AT: u64 = 9_999_999_999;

fn word(value: u128) -> String {
    format!("{value:064x}")
}

/// JSON-RPC stand-in for the SubscriptionNFT contract.  The `active` flag
/// lets tests flip the on-chain subscription state mid-run.
async fn rpc_handler(State(active): State<Arc<AtomicBool>>, Json(req): Json<Value>) -> Json<Value> {
    let method = req["method"].as_str().unwrap_or_default();
    let is_active = active.load(Ordering::SeqCst) as u128;
    let result = match method {
        "eth_chainId" => json!("0x138b"),
        "eth_sendRawTransaction" => {
            json!("0x00000000000000000000000000000000000000000000000000000000deadbeef")
        }
        "eth_getTransactionReceipt" => json!({ "status": "0x1" }),
        "eth_call" => {
            let data = req["params"][0]["data"].as_str().unwrap_or_default();
            if data.starts_with("0x7dd39fa7") {
                // subscriptionCost() — 1 token
                json!(format!("0x{}", word(1_000_000_000_000_000_000)))
            } else if data.starts_with("0x18160ddd") {
                // totalSupply()
                json!(format!("0x{}", word(1)))
            } else if data.starts_with("0x57e2c0f5") {
                // isSubscriptionActive(uint256)
                json!(format!("0x{}", word(is_active)))
            } else if data.starts_with("0xc2a94db4") {
                // getSubscriptionData(uint256) -> (expiresAt, active, mintedAt)
                json!(format!(
                    "0x{}{}{}",
                    word(EXPIRES_AT as u128),
                    word(is_active),
                    word(1_700_000_000)
                ))
            } else {
                json!("0x")
            }
        }
        _ => json!(null),
    };
    Json(json!({ "jsonrpc": "2.0", "id": 1, "result": result }))
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

struct Harness {
    registry: SessionRegistry,
    gate: SubscriptionGate,
    uploads: UploadCoordinator,
    trigger_ok: FundraiseTrigger,
    trigger_fail: FundraiseTrigger,
    active: Arc<AtomicBool>,
}

async fn harness(cooldown: Duration) -> Harness {
    let active = Arc::new(AtomicBool::new(true));

    let rpc_base = serve(
        Router::new()
            .route("/", post(rpc_handler))
            .with_state(active.clone()),
    )
    .await;
    let storage_base = serve(Router::new().route(
        "/storage/v1/object/:bucket/*key",
        post(|| async { "ok" }),
    ))
    .await;
    let webhook_base = serve(
        Router::new()
            .route(
                "/webhook/process-files",
                post(|| async {
                    Json(json!({
                        "ok": true,
                        "spreadsheetUrl": "https://sheets.example/outreach-42"
                    }))
                }),
            )
            .route(
                "/webhook/broken",
                post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
            ),
    )
    .await;

    let client = Client::new();
    let chain = Arc::new(ContractClient::new(
        client.clone(),
        rpc_base,
        "0x00000000000000000000000000000000000000aa",
        Duration::from_millis(10),
        5,
    ));

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let records = Arc::new(ProjectRecordStore::new(pool));

    let storage = Arc::new(StorageClient::new(client.clone(), storage_base, "test-key"));

    Harness {
        registry: SessionRegistry::new(CHAIN_ID),
        gate: SubscriptionGate::new(chain),
        uploads: UploadCoordinator::new(storage, records.clone(), 1 << 20, cooldown),
        trigger_ok: FundraiseTrigger::new(
            client.clone(),
            format!("{webhook_base}/webhook/process-files"),
            records.clone(),
        ),
        trigger_fail: FundraiseTrigger::new(
            client,
            format!("{webhook_base}/webhook/broken"),
            records,
        ),
        active,
    }
}

fn wallet() -> WalletAddress {
    WalletAddress::parse("0x9999999999999999999999999999999999999999").unwrap()
}

fn file(name: &str, mime: &str) -> FilePayload {
    FilePayload {
        display_name: name.to_string(),
        mime: mime.to_string(),
        bytes: format!("contents of {name}").into_bytes(),
    }
}

#[tokio::test]
async fn full_pipeline_connect_subscribe_upload_process() {
    let h = harness(Duration::from_millis(50)).await;

    // Connect, then mint through to confirmation.
    let session = h.registry.connect(wallet(), CHAIN_ID).await.unwrap();
    let state = h.gate.subscribe(&session, "0xsignedmint").await.unwrap();
    assert_eq!(
        state,
        GateState::Active {
            token_id: 1,
            expires_at: EXPIRES_AT as i64
        }
    );

    // Pitch deck, then funds list once the cooldown has passed.
    let deck = h
        .uploads
        .upload(&session, file("deck.pdf", "application/pdf"))
        .await
        .unwrap();
    assert_eq!(deck.storage_bucket, "pitch-decks");

    // Processing is refused while the funds list is missing.
    let err = h.trigger_ok.start(&session).await.unwrap_err();
    assert!(matches!(err, AgentError::Validation(_)));

    tokio::time::sleep(Duration::from_millis(60)).await;
    let funds = h
        .uploads
        .upload(&session, file("funds.csv", "text/csv"))
        .await
        .unwrap();
    assert_eq!(funds.storage_bucket, "funds-lists");

    // Both links are in place; the webhook result link is surfaced.
    let result = h.trigger_ok.start(&session).await.unwrap();
    assert_eq!(result.spreadsheet_url, "https://sheets.example/outreach-42");
}

#[tokio::test]
async fn webhook_failure_resets_and_allows_retry() {
    let h = harness(Duration::ZERO).await;

    let session = h.registry.connect(wallet(), CHAIN_ID).await.unwrap();
    h.gate.subscribe(&session, "0xsignedmint").await.unwrap();
    h.uploads
        .upload(&session, file("deck.pdf", "application/pdf"))
        .await
        .unwrap();
    h.uploads
        .upload(&session, file("funds.csv", "text/csv"))
        .await
        .unwrap();

    let err = h.trigger_fail.start(&session).await.unwrap_err();
    assert!(matches!(err, AgentError::Webhook(_)));
    assert!(session.jobs.lock().await.is_empty());

    // The stale marker is gone: the same job can be started again and now
    // succeeds against the healthy endpoint.
    let result = h.trigger_ok.start(&session).await.unwrap();
    assert_eq!(result.spreadsheet_url, "https://sheets.example/outreach-42");
}

#[tokio::test]
async fn expiry_demotes_gate_and_relocks_uploads() {
    let h = harness(Duration::ZERO).await;

    let session = h.registry.connect(wallet(), CHAIN_ID).await.unwrap();
    h.gate.subscribe(&session, "0xsignedmint").await.unwrap();

    // The subscription lapses on chain; the next refresh observes it.
    h.active.store(false, Ordering::SeqCst);
    let state = h.gate.refresh(&session).await.unwrap();
    assert_eq!(state, GateState::Expired { token_id: 1 });

    let err = h
        .uploads
        .upload(&session, file("deck.pdf", "application/pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Auth(_)));
}

#[tokio::test]
async fn subscribe_twice_is_idempotent_once_active() {
    let h = harness(Duration::ZERO).await;

    let session = h.registry.connect(wallet(), CHAIN_ID).await.unwrap();
    let first = h.gate.subscribe(&session, "0xsignedmint").await.unwrap();
    let second = h.gate.subscribe(&session, "0xsignedmint").await.unwrap();
    assert_eq!(first, second);
}
