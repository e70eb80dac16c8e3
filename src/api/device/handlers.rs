//! Device-code flow endpoints (RFC 8628 style).

use crate::api::device::models::{
    DeviceApproveRequest, DeviceAuthResponse, DeviceCodeForm, DeviceStatusResponse,
    DeviceTokenForm,
};
use crate::api::device::store::{DeviceStatus, DeviceStore, StoredDeviceAuth};
use crate::api::oauth::models::TokenResponse;
use crate::api::oauth::store::{unix_now, AuthFlowStore};
use crate::errors::ApiError;
use crate::openapi::DEVICE_TAG;
use crate::scopes;
use crate::state::AppState;
use crate::tokens::MintRequest;
use axum::extract::{Form, Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::{info, warn};
use std::collections::HashMap;
use uuid::Uuid;

pub const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

fn device_store(state: &AppState) -> DeviceStore {
    DeviceStore::new(state.cache.clone(), state.config.tokens.device_ttl)
}

/// Device authorization endpoint: hands out a device code for polling and a
/// short user code for the human to type elsewhere.
#[utoipa::path(
    post,
    path = "/device/code",
    request_body = DeviceCodeForm,
    responses(
        (status = 200, description = "Device authorization created", body = DeviceAuthResponse),
        (status = 400, description = "Unknown client or no usable scopes")
    ),
    tag = DEVICE_TAG
)]
pub(crate) async fn create(
    State(state): State<AppState>,
    Form(form): Form<DeviceCodeForm>,
) -> Response {
    match handle_create(&state, form).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_create(
    state: &AppState,
    form: DeviceCodeForm,
) -> Result<DeviceAuthResponse, ApiError> {
    if form.client_id.is_empty() {
        return Err(ApiError::invalid_request("client_id is required"));
    }

    let app = state
        .registry
        .fetch_app(&form.client_id)
        .await
        .map_err(ApiError::from)?
        .filter(|app| app.active)
        .ok_or_else(|| ApiError::invalid_client("Mini-app not found or inactive"))?;

    // Unknown and unregistered scopes are silently dropped; the registered
    // manifest is the ceiling here just like in the redirect flow.
    let requested = scopes::parse_scope_string(form.scope.as_deref().unwrap_or_default());
    let usable: Vec<String> = requested
        .into_iter()
        .filter(|s| scopes::is_known_scope(s) && app.registered_scopes.contains(s))
        .collect();
    if !usable.iter().any(|s| scopes::is_platform_scope(s)) {
        return Err(ApiError::invalid_scope(
            "At least one registered platform scope is required",
        ));
    }

    let record = device_store(state)
        .create(&form.client_id, usable)
        .await
        .map_err(|e| ApiError::internal(format!("failed to persist device authorization: {e}")))?;

    info!(
        "device authorization created for client '{}' (user code {})",
        form.client_id, record.user_code
    );

    let verification_uri = format!(
        "{}/device",
        state.config.public_url.trim_end_matches('/')
    );
    Ok(DeviceAuthResponse {
        verification_uri_complete: format!(
            "{verification_uri}?user_code={}",
            record.user_code
        ),
        verification_uri,
        device_code: record.device_code,
        user_code: record.user_code,
        expires_in: state.config.tokens.device_ttl,
        interval: state.config.tokens.device_interval,
    })
}

/// Device token endpoint, polled by the device until approval.
#[utoipa::path(
    post,
    path = "/device/token",
    request_body = DeviceTokenForm,
    responses(
        (status = 200, description = "Capability token issued", body = TokenResponse),
        (status = 400, description = "authorization_pending, expired_token or invalid_grant")
    ),
    tag = DEVICE_TAG
)]
pub(crate) async fn token(
    State(state): State<AppState>,
    Form(form): Form<DeviceTokenForm>,
) -> Response {
    match handle_token(&state, form).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_token(state: &AppState, form: DeviceTokenForm) -> Result<TokenResponse, ApiError> {
    if form.grant_type != DEVICE_GRANT_TYPE {
        return Err(ApiError::unsupported_grant_type());
    }
    let device_code = form
        .device_code
        .as_deref()
        .ok_or_else(|| ApiError::invalid_request("device_code parameter is required"))?;

    let store = device_store(state);
    let record = store
        .find_by_device_code(device_code)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load device authorization: {e}")))?
        .ok_or_else(|| ApiError::invalid_grant("Invalid or expired device_code"))?;

    if let Some(err) = purge_if_expired(&store, &record).await {
        return Err(err);
    }

    let (user_id, wallet_id) = match &record.state {
        DeviceStatus::Pending => {
            return Err(ApiError::new(
                "authorization_pending",
                "Device authorization is still pending",
                http::StatusCode::BAD_REQUEST,
            ));
        }
        DeviceStatus::Approved { user_id, wallet_id } => (user_id.clone(), wallet_id.clone()),
    };

    // One poll wins; the device code is spent once credentials are built.
    let claimed = store
        .claim_for_issuance(device_code)
        .await
        .map_err(|e| ApiError::internal(format!("failed to claim device code: {e}")))?;
    if !claimed {
        return Err(ApiError::invalid_grant("Invalid or expired device_code"));
    }
    store
        .purge(&record)
        .await
        .map_err(|e| ApiError::internal(format!("failed to purge device authorization: {e}")))?;

    let mut context = HashMap::new();
    context.insert(
        "launch_source".to_string(),
        serde_json::Value::String("device_flow".to_string()),
    );

    let platform_scopes =
        scopes::parse_scope_string(&scopes::format_for(&record.scopes, scopes::ScopeDomain::Platform));
    let (access_token, _) = state
        .issuer
        .mint(MintRequest {
            subject: user_id.clone(),
            audience: record.client_id.clone(),
            scopes: platform_scopes,
            wallet_id: wallet_id.clone(),
            session_id: Some(format!("sess_{}", Uuid::new_v4().simple())),
            context,
        })
        .map_err(|e| {
            warn!("failed to mint device-flow token: {e}");
            ApiError::invalid_grant("No grantable scopes remain")
        })?;

    let flow_store = AuthFlowStore::new(
        state.cache.clone(),
        state.config.tokens.auth_request_ttl,
        state.config.tokens.code_ttl,
        state.config.tokens.refresh_ttl,
    );
    let refresh_token = flow_store
        .issue_refresh_token(
            &user_id,
            wallet_id.as_deref(),
            &record.client_id,
            record.scopes.clone(),
        )
        .await
        .map_err(|e| ApiError::internal(format!("failed to issue refresh token: {e}")))?;

    info!(
        "device flow completed for user '{}' on client '{}'",
        user_id, record.client_id
    );

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.tokens.access_ttl,
        refresh_token,
        scope: record.scopes.join(" "),
        user_id,
        wallet_id,
    })
}

/// Out-of-band approval: the platform UI resolves a typed user code to the
/// authenticated user. API-key protected.
#[utoipa::path(
    post,
    path = "/device/approve",
    request_body = DeviceApproveRequest,
    responses(
        (status = 200, description = "Device authorization approved", body = DeviceStatusResponse),
        (status = 400, description = "Unknown or expired user_code")
    ),
    tag = DEVICE_TAG
)]
pub(crate) async fn approve(
    State(state): State<AppState>,
    Json(request): Json<DeviceApproveRequest>,
) -> Response {
    match handle_approve(&state, request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_approve(
    state: &AppState,
    request: DeviceApproveRequest,
) -> Result<DeviceStatusResponse, ApiError> {
    if request.user_id.is_empty() {
        return Err(ApiError::invalid_request("user_id is required"));
    }

    // When the platform hands us the user's identity-provider session, it
    // must introspect as active and belong to the approving user.
    if let Some(identity_token) = request.identity_token.as_deref() {
        let info = state
            .identity
            .introspect(identity_token)
            .await
            .map_err(ApiError::from)?;
        if !info.active || info.sub.as_deref() != Some(request.user_id.as_str()) {
            return Err(ApiError::invalid_grant("identity session is not active for this user"));
        }
    }

    let store = device_store(state);
    let record = store
        .find_by_user_code(&request.user_code)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load device authorization: {e}")))?
        .ok_or_else(|| ApiError::invalid_grant("Unknown or expired user_code"))?;

    if let Some(err) = purge_if_expired(&store, &record).await {
        return Err(err);
    }

    let approved = store
        .approve(&record, &request.user_id, request.wallet_id.as_deref())
        .await
        .map_err(|e| ApiError::internal(format!("failed to approve device authorization: {e}")))?;

    // Device consent is session-level too; critical scopes stay per-use.
    if let Err(e) = state
        .grants
        .record(&request.user_id, &record.client_id, &record.scopes, "device_flow")
        .await
    {
        warn!("failed to record device-flow grants: {e}");
    }

    info!(
        "user '{}' approved device authorization for client '{}'",
        request.user_id, record.client_id
    );

    Ok(DeviceStatusResponse {
        user_code: approved.user_code,
        status: "approved".to_string(),
        client_id: approved.client_id,
        scopes: approved.scopes,
    })
}

/// Status probe for the verification page.
#[utoipa::path(
    get,
    path = "/device/{user_code}",
    params(("user_code" = String, Path, description = "The code the user typed")),
    responses(
        (status = 200, description = "Current status", body = DeviceStatusResponse),
        (status = 400, description = "Unknown or expired user_code")
    ),
    tag = DEVICE_TAG
)]
pub(crate) async fn status(
    State(state): State<AppState>,
    Path(user_code): Path<String>,
) -> Response {
    match handle_status(&state, &user_code).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_status(state: &AppState, user_code: &str) -> Result<DeviceStatusResponse, ApiError> {
    let store = device_store(state);
    let record = store
        .find_by_user_code(user_code)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load device authorization: {e}")))?
        .ok_or_else(|| ApiError::invalid_grant("Unknown or expired user_code"))?;

    if let Some(err) = purge_if_expired(&store, &record).await {
        return Err(err);
    }

    Ok(DeviceStatusResponse {
        user_code: record.user_code.clone(),
        status: match record.state {
            DeviceStatus::Pending => "pending".to_string(),
            DeviceStatus::Approved { .. } => "approved".to_string(),
        },
        client_id: record.client_id,
        scopes: record.scopes,
    })
}

/// Logical-expiry check at use time; purges the record when the store's own
/// eviction has not caught up yet.
async fn purge_if_expired(store: &DeviceStore, record: &StoredDeviceAuth) -> Option<ApiError> {
    if unix_now() < record.expires_at {
        return None;
    }
    if let Err(e) = store.purge(record).await {
        warn!("failed to purge expired device authorization: {e}");
    }
    Some(ApiError::new(
        "expired_token",
        "Device authorization has expired",
        http::StatusCode::BAD_REQUEST,
    ))
}
