use axum::{extract::State, routing::get, Json, Router};

use crate::db::LedgerStatus;
use crate::models::AppState;
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/debug/db-status", get(db_status))
        .with_state(state)
}

/// Backend kind, row count and column layout of the settlement table.
async fn db_status(State(state): State<AppState>) -> AppResult<Json<LedgerStatus>> {
    Ok(Json(state.ledger.status().await?))
}
