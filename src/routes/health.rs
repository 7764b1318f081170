use axum::{extract::State, routing::get, Json, Router};

use crate::models::{AppState, HealthResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let response = HealthResponse {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        network: state.config.chain.network_name.clone(),
        database: state.ledger.backend().to_string(),
        mode: state.config.mode_name().to_string(),
        mock_mode: state.config.payment.simulation,
    };

    Json(response)
}
