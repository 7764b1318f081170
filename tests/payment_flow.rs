use agentpay::config::{Config, DEFAULT_RECIPIENT};
use agentpay::db::{SettlementLedger, SqliteLedger};
use agentpay::{create_router, AppState};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

fn simulated_app() -> (Router, Arc<SqliteLedger>) {
    let vars: HashMap<&str, &str> = HashMap::from([("MOCK_PAYMENT", "true")]);
    let config = Config::from_vars(|key| vars.get(key).map(|v| v.to_string())).unwrap();
    let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
    let state = AppState::with_ledger(config, ledger.clone()).unwrap();
    (create_router(state), ledger)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_proof(uri: &str, proof: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("X-Payment-Proof", proof)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_challenge_pay_retry_and_list() {
    let (app, _) = simulated_app();

    let (status, challenge) = send(&app, get("/api/weather")).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(challenge["error"], "Payment Required");
    assert_eq!(challenge["amount"], "0.001");
    assert_eq!(challenge["token"], "USDC");
    assert_eq!(challenge["recipient"], DEFAULT_RECIPIENT);

    let (status, body) = send(&app, get_with_proof("/api/weather", "MOCK_TX_1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paid"], json!(true));
    assert_eq!(body["payment_proof"], "MOCK_TX_1");
    assert_eq!(body["city"], "Bangalore");

    let (status, listing) = send(&app, get("/transactions")).await;
    assert_eq!(status, StatusCode::OK);
    let rows = listing["transactions"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["amount_usdc"], json!(0.001));
    assert_eq!(rows[0]["status"], "success");
    let proof_id = rows[0]["proof_id"].as_str().unwrap();
    assert_ne!(proof_id, "MOCK_TX_1");
    assert!(proof_id.starts_with("0x"));
    assert_eq!(
        rows[0]["tx_url"].as_str().unwrap(),
        format!("https://amoy.polygonscan.com/tx/{proof_id}")
    );

    let (_, executions) = send(&app, get("/executions")).await;
    assert_eq!(executions["executions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_replayed_proof_conflicts() {
    let (app, ledger) = simulated_app();

    let (status, _) = send(&app, get_with_proof("/api/data-feed", "MOCK_TX_42")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, get_with_proof("/api/data-feed", "MOCK_TX_42")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Payment proof has already been used");

    assert_eq!(ledger.list_recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_proofs_are_rejected() {
    let (app, _) = simulated_app();

    let (status, body) = send(&app, get_with_proof("/api/weather", "not-a-proof")).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "Invalid payment proof format");

    let real = format!("0x{}", "ab".repeat(32));
    let (status, body) = send(&app, get_with_proof("/api/weather", &real)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "Mock mode only accepts mock payment proofs");
}

#[tokio::test]
async fn test_unknown_resource() {
    let (app, _) = simulated_app();
    let (status, _) = send(&app, get("/api/stock-quotes")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_manual_transaction_report() {
    let (app, _) = simulated_app();
    let payload = json!({
        "agent_id": "weather_agent",
        "recipient": DEFAULT_RECIPIENT,
        "amount_usdc": 0.002,
        "tx_hash": format!("0x{}", "CD".repeat(32)),
        "status": "blocked",
        "block_reason": "over budget",
        "timestamp": 1_700_000_000,
    });
    let request = || {
        Request::builder()
            .method("POST")
            .uri("/transactions")
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    };

    let (status, saved) = send(&app, request()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(saved["message"], "Transaction saved successfully");
    assert_eq!(saved["proof_id"], format!("0x{}", "cd".repeat(32)));
    assert_eq!(saved["status"], "blocked");
    assert!(saved["id"].as_i64().unwrap() > 0);

    let (status, body) = send(&app, request()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Duplicate transaction hash");
}

#[tokio::test]
async fn test_health_and_db_status() {
    let (app, _) = simulated_app();

    let (status, health) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["mode"], "simulation");
    assert_eq!(health["mock_mode"], json!(true));
    assert_eq!(health["database"], "sqlite");

    let (status, db) = send(&app, get("/debug/db-status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(db["backend"], "sqlite");
    assert_eq!(db["row_count"], json!(0));
    let columns: Vec<&str> = db["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["name"].as_str().unwrap())
        .collect();
    assert!(columns.contains(&"proof_id"));
    assert!(columns.contains(&"block_number"));

    let (status, info) = send(&app, get("/network-info")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["chain_id"], json!(80002));
}
