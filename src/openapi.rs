use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth 2.0";
pub(crate) const DEVICE_TAG: &str = "Device Flow";
pub(crate) const REVOCATION_TAG: &str = "Revocation";
pub(crate) const WEBHOOK_TAG: &str = "Webhooks";

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Authorization-code flow with mandatory PKCE"),
        (name = DEVICE_TAG, description = "Device-code flow for input-constrained clients"),
        (name = REVOCATION_TAG, description = "Capability revocation"),
        (name = WEBHOOK_TAG, description = "Inbound signed webhooks"),
    ),
    paths(
        crate::api::oauth::handlers::authorize,
        crate::api::oauth::handlers::consent,
        crate::api::oauth::handlers::token,
        crate::api::oauth::handlers::introspect,
        crate::api::device::handlers::create,
        crate::api::device::handlers::token,
        crate::api::device::handlers::approve,
        crate::api::device::handlers::status,
        crate::api::revocation::revoke,
        crate::api::revocation::identity_webhook,
    ),
    info(
        title = "Capability Token Service API",
        description = "Issues, verifies and revokes scope-limited capability tokens for mini-apps",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;
