mod authn_middleware;
pub(crate) mod device;
pub(crate) mod health;
pub(crate) mod oauth;
pub(crate) mod revocation;

use crate::api::authn_middleware::authentication_middleware;
use crate::state::AppState;
use axum::routing::post;
use axum::{middleware, Router};

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(oauth::router())
        .merge(device::router())
        .route("/webhooks/identity", post(revocation::identity_webhook))
        .merge(protected_routes(state))
}

/// Creates a router for administrative routes that require API key
/// authentication
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/revoke", post(revocation::revoke))
        .merge(device::admin_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            authentication_middleware,
        ))
}
