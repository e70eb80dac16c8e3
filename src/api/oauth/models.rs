//! Request/response models for the authorization-code flow endpoints.

use crate::scopes::Sensitivity;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Query parameters of the authorization endpoint. Everything is optional at
/// the type level so missing parameters can be reported precisely.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AuthorizeParams {
    /// Must be "code"
    pub response_type: Option<String>,
    /// Mini-app client identifier
    pub client_id: Option<String>,
    /// Redirect URI where the authorization code will be sent
    pub redirect_uri: Option<String>,
    /// Requested scopes (space-separated)
    pub scope: Option<String>,
    /// Opaque CSRF token echoed back to the client
    pub state: Option<String>,
    /// PKCE code challenge
    pub code_challenge: Option<String>,
    /// PKCE code challenge method - must be "S256"
    pub code_challenge_method: Option<String>,
    /// Authenticated platform user, when the session layer knows one.
    /// Enables skipping consent for fully pre-granted, non-critical requests.
    pub user_id: Option<String>,
    /// Wallet reference of the authenticated user
    pub wallet_id: Option<String>,
}

/// Consent form posted by the platform UI after the user decides.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentForm {
    pub auth_request_id: String,
    pub approved: bool,
    /// The authenticated platform user making the decision
    pub user_id: String,
    /// Wallet reference of the authenticated user
    pub wallet_id: Option<String>,
}

/// Token endpoint form (authorization_code and refresh_token grants).
#[derive(Debug, Deserialize, ToSchema)]
pub struct TokenForm {
    pub grant_type: String,
    /// Authorization code (authorization_code grant)
    pub code: Option<String>,
    /// PKCE code verifier (authorization_code grant)
    pub code_verifier: Option<String>,
    /// State echo; verified against the stored request when present
    pub state: Option<String>,
    /// Refresh token (refresh_token grant)
    pub refresh_token: Option<String>,
}

/// Successful token response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    /// Granted scopes, space-separated, in request order
    pub scope: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
}

/// Mini-app identity shown on the consent screen.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MiniAppSummary {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub developer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub verified: bool,
}

/// One requested scope as presented to the user.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentScope {
    pub scope: String,
    pub description: String,
    pub sensitivity: Sensitivity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Everything the platform UI needs to render the consent screen.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsentDescriptor {
    pub auth_request_id: String,
    pub miniapp: MiniAppSummary,
    pub requested_scopes: Vec<ConsentScope>,
    pub expires_in: u64,
}

/// Token introspection form.
#[derive(Debug, Deserialize, ToSchema)]
pub struct IntrospectionForm {
    pub token: String,
}

/// Token introspection response (RFC 7662 shape).
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Scopes still live after consulting the revocation ledger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl IntrospectionResponse {
    /// The uniform "not valid" answer; deliberately free of detail.
    pub fn inactive() -> Self {
        Self {
            active: false,
            sub: None,
            client_id: None,
            scope: None,
            exp: None,
            iat: None,
            iss: None,
            token_type: None,
            wallet_id: None,
            session_id: None,
        }
    }
}
