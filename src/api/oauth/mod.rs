//! Authorization-code flow (OAuth 2.0 + mandatory PKCE).
//!
//! ## Endpoints
//! - `GET /authorize`: validates the request, returns a consent descriptor
//!   (or redirects immediately when prior grants cover it)
//! - `POST /consent`: single-use approval/denial, redirects with a code
//! - `POST /token`: authorization_code and refresh_token grants
//! - `POST /introspect`: capability token introspection for resource servers
//!
//! Flow artifacts live in the store behind [`store::AuthFlowStore`]; tokens
//! themselves are signed and self-contained.

pub mod handlers;
pub mod models;
pub mod store;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;

/// Creates the authorization-code flow routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authorize", get(handlers::authorize))
        .route("/consent", post(handlers::consent))
        .route("/token", post(handlers::token))
        .route("/introspect", post(handlers::introspect))
}
