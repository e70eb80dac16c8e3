//! Device-code flow for input-constrained clients: the device polls
//! `/device/token` while the user approves the paired user code out-of-band.

pub mod handlers;
pub mod models;
pub mod store;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Public device-flow routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/device/code", post(handlers::create))
        .route("/device/token", post(handlers::token))
        .route("/device/{user_code}", get(handlers::status))
}

/// Routes requiring API-key authentication (the platform UI's approval call)
pub fn admin_router() -> Router<AppState> {
    Router::new().route("/device/approve", post(handlers::approve))
}
