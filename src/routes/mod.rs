//! API Routes
//!
//! - `/api/{resource}` - paid resources (402 challenge / proof verification)
//! - `/transactions`, `/transactions/onchain`, `/executions` - settlement ledger
//! - `/vault-balance`, `/network-info`, `/execute-demo` - settlement contract
//! - `/debug/db-status` - ledger backend and schema
//! - `/health` - liveness

pub mod chain;
pub mod debug;
pub mod health;
pub mod paid;
pub mod transactions;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::apply_cors;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let origins = state.config.server.cors_allowed_origins.clone();

    let router = Router::new()
        .merge(paid::router(state.clone()))
        .merge(transactions::router(state.clone()))
        .merge(chain::router(state.clone()))
        .merge(debug::router(state.clone()))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http());

    apply_cors(router, &origins)
}
