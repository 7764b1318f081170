use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tracing::info;

use crate::models::AppState;
use crate::payment::{Rejection, PAYMENT_PROOF_HEADER};
use crate::types::AppResult;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/{resource}", get(get_paid_resource))
        .with_state(state)
}

/// Serve a priced resource, or the challenge to pay for it.
pub async fn get_paid_resource(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let proof = match headers.get(PAYMENT_PROOF_HEADER) {
        Some(value) => Some(value.to_str().map_err(|_| Rejection::MalformedProof)?),
        None => None,
    };

    let admission = state.gate.admit(&resource, proof).await?;
    info!(resource = %resource, record_id = admission.record_id, "Serving paid resource");

    let payment_proof = proof.map(str::trim).unwrap_or_default();
    let body = match admission.resource.payload {
        Value::Object(mut fields) => {
            fields.insert("paid".to_string(), Value::Bool(true));
            fields.insert("payment_proof".to_string(), Value::String(payment_proof.to_string()));
            Value::Object(fields)
        }
        other => json!({ "data": other, "paid": true, "payment_proof": payment_proof }),
    };

    Ok(Json(body))
}
