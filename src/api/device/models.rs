//! Request/response models for the device-code flow.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Device authorization request posted by an input-constrained client.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceCodeForm {
    pub client_id: String,
    /// Requested scopes, space-separated
    pub scope: Option<String>,
}

/// Device authorization response (RFC 8628 §3.2 shape).
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceAuthResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub verification_uri_complete: String,
    pub expires_in: u64,
    pub interval: u64,
}

/// Device token poll form.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceTokenForm {
    /// Must be "urn:ietf:params:oauth:grant-type:device_code"
    pub grant_type: String,
    pub device_code: Option<String>,
}

/// Out-of-band approval posted by the platform UI after the user typed the
/// user code and authenticated.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeviceApproveRequest {
    pub user_code: String,
    pub user_id: String,
    pub wallet_id: Option<String>,
    /// Identity-provider session token; when present it is introspected and
    /// must belong to `user_id`.
    pub identity_token: Option<String>,
}

/// Status probe response for a user code.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceStatusResponse {
    pub user_code: String,
    pub status: String,
    pub client_id: String,
    pub scopes: Vec<String>,
}
