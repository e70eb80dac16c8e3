//! Revocation endpoint and the inbound identity-provider webhook receiver.

use crate::errors::ApiError;
use crate::openapi::{REVOCATION_TAG, WEBHOOK_TAG};
use crate::revocation::{RevocationEntry, RevocationOutcome};
use crate::state::AppState;
use crate::webhooks::{
    self, SignatureError, IDEMPOTENCY_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

/// Revocation request from the platform (user settings, abuse desk).
#[derive(Debug, Deserialize, ToSchema)]
pub struct RevokeRequest {
    pub user_id: String,
    pub client_id: String,
    /// Scopes to revoke; omit (or send empty) to revoke everything granted
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Revokes (user, client, scope) grants. API-key protected.
#[utoipa::path(
    post,
    path = "/revoke",
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Revocation recorded", body = RevocationOutcome),
        (status = 400, description = "Missing identifiers")
    ),
    tag = REVOCATION_TAG
)]
pub(crate) async fn revoke(
    State(state): State<AppState>,
    Json(request): Json<RevokeRequest>,
) -> Response {
    let reason = request.reason.as_deref().unwrap_or("user_initiated");
    match state
        .revocations
        .revoke(&request.user_id, &request.client_id, request.scopes, reason)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Webhook event pushed by the identity provider.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IdentityEvent {
    pub event: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Inbound webhook receiver for identity-provider events.
///
/// The raw body is authenticated against the shared secret before parsing;
/// deliveries deduplicate on the idempotency key for 24 hours, replaying the
/// original response flagged as a duplicate.
#[utoipa::path(
    post,
    path = "/webhooks/identity",
    request_body = IdentityEvent,
    responses(
        (status = 200, description = "Event processed (or duplicate replayed)"),
        (status = 400, description = "Malformed request"),
        (status = 401, description = "Signature verification failed"),
        (status = 409, description = "Duplicate delivery still being processed")
    ),
    tag = WEBHOOK_TAG
)]
pub(crate) async fn identity_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    match handle_identity_webhook(&state, &headers, &body).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_identity_webhook(
    state: &AppState,
    headers: &HeaderMap,
    body: &str,
) -> Result<Response, ApiError> {
    let timestamp = header_str(headers, TIMESTAMP_HEADER);
    let signature = header_str(headers, SIGNATURE_HEADER);

    let secret = &state.config.identity.webhook_secret;
    if let Err(kind) = webhooks::verify_signature(secret, timestamp, body, signature) {
        warn!("identity webhook rejected: {kind}");
        return Err(match kind {
            SignatureError::MissingSignature | SignatureError::MissingTimestamp => {
                ApiError::invalid_request(kind.to_string())
            }
            _ => ApiError::invalid_signature("webhook verification failed"),
        });
    }

    // Deduplicate by idempotency key when the sender provides one.
    let idempotency_key = header_str(headers, IDEMPOTENCY_HEADER);
    if !idempotency_key.is_empty() {
        let fresh = webhooks::claim_idempotency(&state.cache, idempotency_key)
            .await
            .map_err(|e| ApiError::internal(format!("idempotency claim failed: {e}")))?;
        if !fresh {
            return match webhooks::load_idempotent_response(&state.cache, idempotency_key)
                .await
                .map_err(|e| ApiError::internal(format!("idempotency lookup failed: {e}")))?
            {
                Some(mut original) => {
                    if let Some(obj) = original.as_object_mut() {
                        obj.insert("duplicate".to_string(), json!(true));
                    }
                    Ok(Json(original).into_response())
                }
                // Claimed but not yet answered: a concurrent duplicate.
                None => Err(ApiError::conflict("delivery is still being processed")),
            };
        }
    }

    let event: IdentityEvent = serde_json::from_str(body)
        .map_err(|_| ApiError::invalid_request("malformed webhook payload"))?;

    let response = process_identity_event(state, event).await?;

    if !idempotency_key.is_empty() {
        if let Err(e) =
            webhooks::store_idempotent_response(&state.cache, idempotency_key, &response).await
        {
            warn!("failed to store idempotent webhook response: {e}");
        }
    }

    Ok(Json(response).into_response())
}

async fn process_identity_event(
    state: &AppState,
    event: IdentityEvent,
) -> Result<serde_json::Value, ApiError> {
    match event.event.as_str() {
        "token_revoked" => {
            let (user_id, client_id) = required_pair(&event)?;
            let entry = RevocationEntry {
                revoked_at: Utc::now().timestamp(),
                reason: "identity_provider".to_string(),
                event_id: format!("rev_idp_{}", Utc::now().timestamp()),
            };
            state
                .ledger()
                .record(user_id, client_id, &event.scopes, &entry)
                .await
                .map_err(|e| ApiError::internal(format!("ledger write failed: {e}")))?;
            info!(
                "identity provider revoked {} scope(s) for '{}' on '{}'",
                event.scopes.len(),
                user_id,
                client_id
            );
            Ok(json!({"status": "processed", "event": "token_revoked"}))
        }
        "permission_changed" => {
            let (user_id, client_id) = required_pair(&event)?;
            state
                .grants
                .clear(user_id, client_id)
                .await
                .map_err(|e| ApiError::internal(format!("failed to clear grants: {e}")))?;
            info!("cleared grants for '{}' on '{}' after permission change", user_id, client_id);
            Ok(json!({"status": "processed", "event": "permission_changed"}))
        }
        other => Ok(json!({"status": "ignored", "event": other})),
    }
}

fn required_pair(event: &IdentityEvent) -> Result<(&str, &str), ApiError> {
    let user_id = event
        .user_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::invalid_request("user_id is required"))?;
    let client_id = event
        .client_id
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::invalid_request("client_id is required"))?;
    Ok((user_id, client_id))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}
