//! Authorization-code flow endpoints: authorize, consent, token exchange and
//! token introspection.

use crate::api::oauth::models::{
    AuthorizeParams, ConsentDescriptor, ConsentForm, ConsentScope, IntrospectionForm,
    IntrospectionResponse, MiniAppSummary, TokenForm, TokenResponse,
};
use crate::api::oauth::store::{
    pkce_matches, unix_now, AuthFlowStore, Consumed, StoredAuthCode, StoredAuthRequest,
};
use crate::clients::registry::RegisteredApp;
use crate::errors::ApiError;
use crate::openapi::OAUTH_TAG;
use crate::scopes;
use crate::state::AppState;
use crate::tokens::MintRequest;
use axum::{
    extract::{Form, Query, State},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use log::{debug, info, warn};
use std::collections::HashMap;
use url::Url;
use uuid::Uuid;

const REQUIRED_AUTHORIZE_PARAMS: &[(&str, fn(&AuthorizeParams) -> bool)] = &[
    ("response_type", |p| p.response_type.is_some()),
    ("client_id", |p| p.client_id.is_some()),
    ("redirect_uri", |p| p.redirect_uri.is_some()),
    ("scope", |p| p.scope.is_some()),
    ("state", |p| p.state.is_some()),
    ("code_challenge", |p| p.code_challenge.is_some()),
    ("code_challenge_method", |p| p.code_challenge_method.is_some()),
];

fn flow_store(state: &AppState) -> AuthFlowStore {
    AuthFlowStore::new(
        state.cache.clone(),
        state.config.tokens.auth_request_ttl,
        state.config.tokens.code_ttl,
        state.config.tokens.refresh_ttl,
    )
}

/// Looks up the client and enforces the registered-scope manifest.
async fn validated_app(
    state: &AppState,
    client_id: &str,
    requested: &[String],
) -> Result<RegisteredApp, ApiError> {
    let app = state
        .registry
        .fetch_app(client_id)
        .await
        .map_err(ApiError::from)?
        .filter(|app| app.active)
        .ok_or_else(|| ApiError::invalid_client("Mini-app not found or inactive"))?;

    let validation = scopes::validate(requested, &app.registered_scopes);
    if !validation.all_allowed() {
        let denied: Vec<&str> = validation.denied.iter().map(|d| d.scope.as_str()).collect();
        warn!(
            "client '{}' requested unregistered scopes: {}",
            client_id,
            denied.join(", ")
        );
        return Err(ApiError::scope_escalation(format!(
            "Scopes not registered for this mini-app: {}",
            denied.join(", ")
        )));
    }
    Ok(app)
}

/// Authorization endpoint (authorization-code flow with mandatory PKCE).
///
/// Returns a consent descriptor for the platform UI, or redirects straight
/// back with a code when prior grants already cover the request.
#[utoipa::path(
    get,
    path = "/authorize",
    params(
        ("response_type" = Option<String>, Query, description = "Must be 'code'"),
        ("client_id" = Option<String>, Query, description = "Mini-app client identifier"),
        ("redirect_uri" = Option<String>, Query, description = "Redirect URI"),
        ("scope" = Option<String>, Query, description = "Requested scopes, space-separated"),
        ("state" = Option<String>, Query, description = "CSRF token echoed on the redirect"),
        ("code_challenge" = Option<String>, Query, description = "PKCE code challenge"),
        ("code_challenge_method" = Option<String>, Query, description = "Must be 'S256'")
    ),
    responses(
        (status = 200, description = "Consent descriptor for the platform UI", body = ConsentDescriptor),
        (status = 302, description = "Redirect with code when prior grants cover the request"),
        (status = 400, description = "Invalid request"),
        (status = 403, description = "Scope escalation attempt")
    ),
    tag = OAUTH_TAG
)]
pub(crate) async fn authorize(
    State(state): State<AppState>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    match handle_authorize(&state, params).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_authorize(state: &AppState, params: AuthorizeParams) -> Result<Response, ApiError> {
    let missing: Vec<&str> = REQUIRED_AUTHORIZE_PARAMS
        .iter()
        .filter(|(_, present)| !present(&params))
        .map(|(name, _)| *name)
        .collect();
    if !missing.is_empty() {
        return Err(ApiError::invalid_request(format!(
            "Missing required parameters: {}",
            missing.join(", ")
        )));
    }

    // All required parameters are present past this point.
    let client_id = params.client_id.as_deref().unwrap_or_default();
    let redirect_uri = params.redirect_uri.as_deref().unwrap_or_default();
    let request_state = params.state.as_deref().unwrap_or_default();
    let code_challenge = params.code_challenge.as_deref().unwrap_or_default();

    if params.response_type.as_deref() != Some("code") {
        return Err(ApiError::unsupported_response_type());
    }
    if params.code_challenge_method.as_deref() != Some("S256") {
        return Err(ApiError::invalid_request("code_challenge_method must be S256"));
    }
    if Url::parse(redirect_uri).is_err() {
        return Err(ApiError::invalid_request("Invalid redirect_uri format"));
    }

    let requested = scopes::parse_scope_string(params.scope.as_deref().unwrap_or_default());
    let unknown: Vec<&str> = requested
        .iter()
        .filter(|s| !scopes::is_known_scope(s))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(ApiError::invalid_scope(format!(
            "Invalid scopes: {}",
            unknown.join(", ")
        )));
    }
    if !requested.iter().any(|s| scopes::is_platform_scope(s)) {
        return Err(ApiError::invalid_scope(
            "At least one platform scope is required",
        ));
    }

    let app = validated_app(state, client_id, &requested).await?;

    info!(
        "authorization request from client '{}' for {} scope(s)",
        client_id,
        requested.len()
    );

    let store = flow_store(state);

    // Prior consent covering every requested scope (and nothing critical)
    // skips the prompt entirely: the code is bound to an ephemeral request
    // that never reaches the store.
    if let Some(user_id) = params.user_id.as_deref() {
        let covered = state
            .grants
            .covers(user_id, client_id, &requested)
            .await
            .unwrap_or(false);
        if covered {
            let now = unix_now();
            let request = StoredAuthRequest {
                id: String::new(),
                client_id: client_id.to_string(),
                redirect_uri: redirect_uri.to_string(),
                scopes: requested.clone(),
                state: request_state.to_string(),
                code_challenge: code_challenge.to_string(),
                client_name: app.name.clone(),
                created_at: now,
                expires_at: now + store.auth_request_ttl(),
            };
            let code = store
                .issue_code(&request, user_id, params.wallet_id.as_deref())
                .await
                .map_err(|e| ApiError::internal(format!("failed to issue code: {e}")))?;

            debug!("prior grants cover request, skipping consent for '{user_id}'");
            return Ok(redirect_with_code(redirect_uri, &code, request_state));
        }
    }

    let request = store
        .put_auth_request(
            client_id,
            redirect_uri,
            requested.clone(),
            request_state,
            code_challenge,
            &app.name,
        )
        .await
        .map_err(|e| ApiError::internal(format!("failed to persist request: {e}")))?;

    let descriptor = ConsentDescriptor {
        auth_request_id: request.id,
        miniapp: MiniAppSummary {
            id: app.client_id,
            name: app.name,
            developer: app.developer,
            icon_url: app.icon_url,
            verified: app.verified,
        },
        requested_scopes: requested
            .iter()
            .map(|scope| ConsentScope {
                scope: scope.clone(),
                description: scopes::description(scope).to_string(),
                sensitivity: scopes::classify(scope),
                note: scopes::note(scope).map(str::to_string),
            })
            .collect(),
        expires_in: store.auth_request_ttl(),
    };

    Ok(Json(descriptor).into_response())
}

/// Consent decision endpoint, posted by the platform UI. Single use.
#[utoipa::path(
    post,
    path = "/consent",
    request_body = ConsentForm,
    responses(
        (status = 302, description = "Redirect to the mini-app with a code or access_denied"),
        (status = 400, description = "Unknown or expired authorization request"),
        (status = 409, description = "Authorization request already decided")
    ),
    tag = OAUTH_TAG
)]
pub(crate) async fn consent(
    State(state): State<AppState>,
    Form(form): Form<ConsentForm>,
) -> Response {
    match handle_consent(&state, form).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn handle_consent(state: &AppState, form: ConsentForm) -> Result<Response, ApiError> {
    if form.user_id.is_empty() {
        return Err(ApiError::invalid_request("user_id is required"));
    }

    let store = flow_store(state);
    let request = match store
        .consume_auth_request(&form.auth_request_id)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load request: {e}")))?
    {
        Consumed::Fresh(request) => request,
        Consumed::Replayed => {
            return Err(ApiError::conflict("Authorization request already decided"))
        }
        Consumed::Missing => {
            return Err(ApiError::invalid_request("Authorization request not found"))
        }
    };

    if unix_now() >= request.expires_at {
        return Err(ApiError::invalid_request("Authorization request has expired"));
    }

    if !form.approved {
        info!(
            "user '{}' denied authorization for client '{}'",
            form.user_id, request.client_id
        );
        return Ok(redirect_with_error(
            &request.redirect_uri,
            "access_denied",
            &request.state,
        ));
    }

    // Session-level consent is durable; critical scopes are excluded inside
    // the store and re-prompt every time.
    if let Err(e) = state
        .grants
        .record(&form.user_id, &request.client_id, &request.scopes, "oauth_consent")
        .await
    {
        warn!("failed to record grants for '{}': {e}", form.user_id);
    }

    let code = store
        .issue_code(&request, &form.user_id, form.wallet_id.as_deref())
        .await
        .map_err(|e| ApiError::internal(format!("failed to issue code: {e}")))?;

    info!(
        "user '{}' approved {} scope(s) for client '{}'",
        form.user_id,
        request.scopes.len(),
        request.client_id
    );

    Ok(redirect_with_code(&request.redirect_uri, &code, &request.state))
}

/// Token endpoint: authorization_code and refresh_token grants.
#[utoipa::path(
    post,
    path = "/token",
    request_body = TokenForm,
    responses(
        (status = 200, description = "Capability token issued", body = TokenResponse),
        (status = 400, description = "Invalid grant"),
        (status = 409, description = "Authorization code already redeemed")
    ),
    tag = OAUTH_TAG
)]
pub(crate) async fn token(State(state): State<AppState>, Form(form): Form<TokenForm>) -> Response {
    let result = match form.grant_type.as_str() {
        "authorization_code" => handle_authorization_code(&state, &form).await,
        "refresh_token" => handle_refresh_token(&state, &form).await,
        other => {
            warn!("unsupported grant type '{other}'");
            Err(ApiError::unsupported_grant_type())
        }
    };

    match result {
        Ok(response) => Json(response).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn handle_authorization_code(
    state: &AppState,
    form: &TokenForm,
) -> Result<TokenResponse, ApiError> {
    let code = form
        .code
        .as_deref()
        .ok_or_else(|| ApiError::invalid_request("code parameter is required"))?;
    let verifier = form
        .code_verifier
        .as_deref()
        .ok_or_else(|| ApiError::invalid_request("code_verifier parameter is required"))?;

    let store = flow_store(state);
    let stored = match store
        .consume_code(code)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load code: {e}")))?
    {
        Consumed::Fresh(stored) => stored,
        Consumed::Replayed => {
            warn!("authorization code replay detected");
            return Err(ApiError::conflict("Authorization code already redeemed"));
        }
        Consumed::Missing => {
            return Err(ApiError::invalid_grant("Authorization code expired or invalid"))
        }
    };

    if unix_now() >= stored.expires_at {
        return Err(ApiError::invalid_grant("Authorization code expired or invalid"));
    }

    if let Some(echoed) = form.state.as_deref() {
        if echoed != stored.state {
            return Err(ApiError::invalid_grant("state does not match authorization request"));
        }
    }

    if !pkce_matches(&stored.code_challenge, verifier) {
        warn!("PKCE verification failed for client '{}'", stored.client_id);
        return Err(ApiError::invalid_grant("Code verifier does not match challenge"));
    }

    let mut context = HashMap::new();
    context.insert(
        "launch_source".to_string(),
        serde_json::Value::String("oauth_flow".to_string()),
    );
    mint_response(state, &store, stored, context).await
}

async fn handle_refresh_token(
    state: &AppState,
    form: &TokenForm,
) -> Result<TokenResponse, ApiError> {
    let token = form
        .refresh_token
        .as_deref()
        .ok_or_else(|| ApiError::invalid_request("refresh_token parameter is required"))?;

    let store = flow_store(state);
    let record = match store
        .rotate_refresh_token(token)
        .await
        .map_err(|e| ApiError::internal(format!("failed to load refresh token: {e}")))?
    {
        Consumed::Fresh(record) => record,
        // Losing a rotation race reads the same as an unknown token: the
        // grant is gone.
        Consumed::Replayed | Consumed::Missing => {
            return Err(ApiError::invalid_grant("Refresh token expired or invalid"))
        }
    };

    let mut context = HashMap::new();
    context.insert(
        "launch_source".to_string(),
        serde_json::Value::String("refresh".to_string()),
    );
    let stored = StoredAuthCode {
        client_id: record.client_id,
        redirect_uri: String::new(),
        user_id: record.user_id,
        wallet_id: record.wallet_id,
        scopes: record.scopes,
        state: String::new(),
        code_challenge: String::new(),
        created_at: record.issued_at,
        expires_at: record.expires_at,
    };
    mint_response(state, &store, stored, context).await
}

/// Mints the capability token plus a fresh refresh token for a resolved
/// grant.
async fn mint_response(
    state: &AppState,
    store: &AuthFlowStore,
    stored: StoredAuthCode,
    context: HashMap<String, serde_json::Value>,
) -> Result<TokenResponse, ApiError> {
    // The capability token carries only the platform-domain projection;
    // identity-provider scopes live in the IdP's own tokens.
    let platform_scopes =
        scopes::parse_scope_string(&scopes::format_for(&stored.scopes, scopes::ScopeDomain::Platform));

    let (access_token, claims) = state
        .issuer
        .mint(MintRequest {
            subject: stored.user_id.clone(),
            audience: stored.client_id.clone(),
            scopes: platform_scopes,
            wallet_id: stored.wallet_id.clone(),
            session_id: Some(format!("sess_{}", Uuid::new_v4().simple())),
            context,
        })
        .map_err(|e| {
            warn!("failed to mint capability token: {e}");
            ApiError::invalid_grant("No grantable scopes remain")
        })?;

    let refresh_token = store
        .issue_refresh_token(
            &stored.user_id,
            stored.wallet_id.as_deref(),
            &stored.client_id,
            stored.scopes.clone(),
        )
        .await
        .map_err(|e| ApiError::internal(format!("failed to issue refresh token: {e}")))?;

    info!(
        "issued capability token to user '{}' for client '{}' ({} scope(s))",
        stored.user_id,
        stored.client_id,
        claims.scopes().len()
    );

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.tokens.access_ttl,
        refresh_token,
        scope: stored.scopes.join(" "),
        user_id: stored.user_id,
        wallet_id: stored.wallet_id,
    })
}

/// Token introspection for resource servers.
///
/// Every failure kind collapses to `active: false` so the endpoint cannot be
/// used as an oracle; the precise reason is logged instead.
#[utoipa::path(
    post,
    path = "/introspect",
    request_body = IntrospectionForm,
    responses(
        (status = 200, description = "Introspection result", body = IntrospectionResponse)
    ),
    tag = OAUTH_TAG
)]
pub(crate) async fn introspect(
    State(state): State<AppState>,
    Form(form): Form<IntrospectionForm>,
) -> Response {
    if form.token.is_empty() {
        return ApiError::invalid_request("token parameter is required").into_response();
    }

    // Partial revocation narrows the scope set; any failure kind collapses
    // to the same inactive answer.
    let (claims, live) = match state.verify_token(&form.token).await {
        Ok(verified) => verified,
        Err(kind) => {
            debug!("token rejected during introspection: {kind}");
            return Json(IntrospectionResponse::inactive()).into_response();
        }
    };

    Json(IntrospectionResponse {
        active: true,
        sub: Some(claims.sub),
        client_id: Some(claims.aud),
        scope: Some(live.join(" ")),
        exp: Some(claims.exp),
        iat: Some(claims.iat),
        iss: Some(claims.iss),
        token_type: Some(claims.token_type),
        wallet_id: claims.wallet_id,
        session_id: claims.session_id,
    })
    .into_response()
}

fn redirect_with_code(redirect_uri: &str, code: &str, state: &str) -> Response {
    match Url::parse(redirect_uri) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("code", code)
                .append_pair("state", state);
            Redirect::to(url.as_str()).into_response()
        }
        Err(_) => ApiError::invalid_request("Invalid redirect_uri").into_response(),
    }
}

fn redirect_with_error(redirect_uri: &str, error: &str, state: &str) -> Response {
    match Url::parse(redirect_uri) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("error", error)
                .append_pair("state", state);
            Redirect::to(url.as_str()).into_response()
        }
        Err(_) => ApiError::invalid_request("Invalid redirect_uri").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::oauth::store::pkce_challenge;
    use crate::test_utils::TestFixture;
    use http::StatusCode;
    use url::form_urlencoded;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const REDIRECT_URI: &str = "https://app.example.com/callback";

    fn authorize_uri(client_id: &str, scope: &str) -> String {
        authorize_uri_with(client_id, scope, &[])
    }

    fn authorize_uri_with(client_id: &str, scope: &str, extra: &[(&str, &str)]) -> String {
        let challenge = pkce_challenge(VERIFIER);
        let mut pairs = vec![
            ("response_type", "code"),
            ("client_id", client_id),
            ("redirect_uri", REDIRECT_URI),
            ("scope", scope),
            ("state", "xyz123"),
            ("code_challenge", challenge.as_str()),
            ("code_challenge_method", "S256"),
        ];
        pairs.extend_from_slice(extra);
        let query: String = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        format!("/authorize?{query}")
    }

    /// Drives authorize + consent and returns the one-time code.
    async fn approved_code(fixture: &TestFixture, client_id: &str, scope: &str) -> String {
        let response = fixture.get(&authorize_uri(client_id, scope)).await;
        response.assert_status(StatusCode::OK);
        let auth_request_id = response.json()["auth_request_id"]
            .as_str()
            .expect("descriptor carries auth_request_id")
            .to_string();

        let response = fixture
            .post_form(
                "/consent",
                &[
                    ("auth_request_id", auth_request_id.as_str()),
                    ("approved", "true"),
                    ("user_id", "@alice:platform.example"),
                    ("wallet_id", "w_alice"),
                ],
            )
            .await;
        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(response.redirect_param("state").as_deref(), Some("xyz123"));
        response.redirect_param("code").expect("redirect carries code")
    }

    #[tokio::test]
    async fn test_authorize_reports_missing_params() {
        let fixture = TestFixture::new().await;
        let response = fixture.get("/authorize?client_id=app_weather").await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body = response.json();
        assert_eq!(body["error"], "invalid_request");
        let description = body["error_description"].as_str().unwrap();
        assert!(description.contains("response_type"));
        assert!(description.contains("code_challenge"));
        assert!(!description.contains("client_id,"));
    }

    #[tokio::test]
    async fn test_authorize_rejects_other_response_types() {
        let fixture = TestFixture::new().await;
        let challenge = pkce_challenge(VERIFIER);
        let uri = format!(
            "/authorize?response_type=token&client_id=a&redirect_uri={REDIRECT_URI}&scope=user:read&state=s&code_challenge={challenge}&code_challenge_method=S256"
        );
        let response = fixture.get(&uri).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "unsupported_response_type");
    }

    #[tokio::test]
    async fn test_authorize_rejects_plain_challenge_method() {
        let fixture = TestFixture::new().await;
        let uri = format!(
            "/authorize?response_type=code&client_id=a&redirect_uri={REDIRECT_URI}&scope=user:read&state=s&code_challenge=abc&code_challenge_method=plain"
        );
        let response = fixture.get(&uri).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "invalid_request");
        assert!(response.json()["error_description"]
            .as_str()
            .unwrap()
            .contains("S256"));
    }

    #[tokio::test]
    async fn test_authorize_rejects_unknown_scope() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .get(&authorize_uri("app_weather", "wallet:steal user:read"))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        let body = response.json();
        assert_eq!(body["error"], "invalid_scope");
        assert!(body["error_description"]
            .as_str()
            .unwrap()
            .contains("wallet:steal"));
    }

    #[tokio::test]
    async fn test_authorize_denies_unregistered_scope() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_weather", &["user:read"]).await;

        // wallet:pay is a perfectly valid scope, just not in this app's
        // manifest.
        let response = fixture
            .get(&authorize_uri("app_weather", "wallet:pay user:read"))
            .await;

        response.assert_status(StatusCode::FORBIDDEN);
        let body = response.json();
        assert_eq!(body["error"], "invalid_scope");
        assert!(body["error_description"]
            .as_str()
            .unwrap()
            .contains("wallet:pay"));
    }

    #[tokio::test]
    async fn test_authorize_rejects_unknown_client() {
        let fixture = TestFixture::new().await;
        let response = fixture.get(&authorize_uri("ghost", "user:read")).await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "invalid_client");
    }

    #[tokio::test]
    async fn test_authorize_rejects_inactive_client() {
        let fixture = TestFixture::new().await;
        fixture
            .mount_app_with("app_dead", &["user:read"], false, None)
            .await;

        let response = fixture.get(&authorize_uri("app_dead", "user:read")).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "invalid_client");
    }

    #[tokio::test]
    async fn test_consent_descriptor_lists_sensitivities() {
        let fixture = TestFixture::new().await;
        fixture
            .mount_app("app_shop", &["wallet:pay", "wallet:balance"])
            .await;

        let response = fixture
            .get(&authorize_uri("app_shop", "wallet:pay wallet:balance"))
            .await;
        response.assert_status(StatusCode::OK);

        let body = response.json();
        assert_eq!(body["miniapp"]["id"], "app_shop");
        assert_eq!(body["miniapp"]["verified"], true);

        let requested = body["requested_scopes"].as_array().unwrap();
        assert_eq!(requested.len(), 2);
        assert_eq!(requested[0]["scope"], "wallet:pay");
        assert_eq!(requested[0]["sensitivity"], "critical");
        assert_eq!(
            requested[0]["note"],
            "You'll confirm each payment individually"
        );
        assert_eq!(requested[1]["scope"], "wallet:balance");
        assert_eq!(requested[1]["sensitivity"], "medium");
    }

    #[tokio::test]
    async fn test_consent_denial_redirects_with_access_denied() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let response = fixture.get(&authorize_uri("app_shop", "user:read")).await;
        let auth_request_id = response.json()["auth_request_id"].as_str().unwrap().to_string();

        let response = fixture
            .post_form(
                "/consent",
                &[
                    ("auth_request_id", auth_request_id.as_str()),
                    ("approved", "false"),
                    ("user_id", "@alice:platform.example"),
                ],
            )
            .await;

        response.assert_status(StatusCode::SEE_OTHER);
        assert_eq!(
            response.redirect_param("error").as_deref(),
            Some("access_denied")
        );
        assert_eq!(response.redirect_param("state").as_deref(), Some("xyz123"));
    }

    #[tokio::test]
    async fn test_full_flow_issues_capability_token() {
        let fixture = TestFixture::new().await;
        fixture
            .mount_app("app_shop", &["wallet:pay", "wallet:balance"])
            .await;

        let code = approved_code(&fixture, "app_shop", "wallet:pay wallet:balance").await;
        let response = fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", VERIFIER),
                ],
            )
            .await;

        response.assert_status(StatusCode::OK);
        let body = response.json();
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["expires_in"], 3600);
        assert_eq!(body["scope"], "wallet:pay wallet:balance");
        assert_eq!(body["user_id"], "@alice:platform.example");
        assert_eq!(body["wallet_id"], "w_alice");
        assert!(body["refresh_token"].as_str().is_some());

        // The signed claim set carries exactly the requested scopes, in
        // order, no duplicates.
        let claims = fixture
            .state
            .issuer
            .verify(body["access_token"].as_str().unwrap())
            .unwrap();
        assert_eq!(claims.scope, "wallet:pay wallet:balance");
        assert_eq!(claims.aud, "app_shop");
        assert_eq!(claims.sub, "@alice:platform.example");
        assert_eq!(claims.wallet_id.as_deref(), Some("w_alice"));
    }

    #[tokio::test]
    async fn test_token_rejects_wrong_verifier() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let code = approved_code(&fixture, "app_shop", "user:read").await;
        let response = fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", "completely-wrong-verifier"),
                ],
            )
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_token_rejects_state_mismatch() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let code = approved_code(&fixture, "app_shop", "user:read").await;
        let response = fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", VERIFIER),
                    ("state", "not-the-original-state"),
                ],
            )
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_code_replay_is_a_conflict() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let code = approved_code(&fixture, "app_shop", "user:read").await;
        let exchange = [
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("code_verifier", VERIFIER),
        ];

        fixture
            .post_form("/token", &exchange)
            .await
            .assert_status(StatusCode::OK);
        fixture
            .post_form("/token", &exchange)
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_consent_is_single_use() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let response = fixture.get(&authorize_uri("app_shop", "user:read")).await;
        let auth_request_id = response.json()["auth_request_id"].as_str().unwrap().to_string();

        let form = [
            ("auth_request_id", auth_request_id.as_str()),
            ("approved", "true"),
            ("user_id", "@alice:platform.example"),
        ];
        fixture
            .post_form("/consent", &form)
            .await
            .assert_status(StatusCode::SEE_OTHER);
        fixture
            .post_form("/consent", &form)
            .await
            .assert_status(StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_refresh_rotates_exactly_once() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let code = approved_code(&fixture, "app_shop", "user:read").await;
        let response = fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", VERIFIER),
                ],
            )
            .await;
        let first_refresh = response.json()["refresh_token"].as_str().unwrap().to_string();

        let response = fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", first_refresh.as_str()),
                ],
            )
            .await;
        response.assert_status(StatusCode::OK);
        let body = response.json();
        assert_eq!(body["scope"], "user:read");
        let second_refresh = body["refresh_token"].as_str().unwrap().to_string();
        assert_ne!(first_refresh, second_refresh);

        // The rotated-out token is dead.
        let response = fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", first_refresh.as_str()),
                ],
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .post_form("/token", &[("grant_type", "password")])
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json()["error"], "unsupported_grant_type");
    }

    #[tokio::test]
    async fn test_prior_grants_skip_consent() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        // First round goes through consent and records the grant.
        let code = approved_code(&fixture, "app_shop", "user:read").await;
        fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", VERIFIER),
                ],
            )
            .await
            .assert_status(StatusCode::OK);

        // Second authorize with a known user skips straight to the redirect.
        let response = fixture
            .get(&authorize_uri_with(
                "app_shop",
                "user:read",
                &[("user_id", "@alice:platform.example"), ("wallet_id", "w_alice")],
            ))
            .await;
        response.assert_status(StatusCode::SEE_OTHER);
        let code = response.redirect_param("code").expect("redirect carries code");
        assert_eq!(response.redirect_param("state").as_deref(), Some("xyz123"));

        fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", VERIFIER),
                ],
            )
            .await
            .assert_status(StatusCode::OK);
    }

    #[tokio::test]
    async fn test_critical_scopes_always_reprompt() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["wallet:pay"]).await;

        let code = approved_code(&fixture, "app_shop", "wallet:pay").await;
        fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", VERIFIER),
                ],
            )
            .await
            .assert_status(StatusCode::OK);

        // Even with the user known, wallet:pay needs fresh consent.
        let response = fixture
            .get(&authorize_uri_with(
                "app_shop",
                "wallet:pay",
                &[("user_id", "@alice:platform.example")],
            ))
            .await;
        response.assert_status(StatusCode::OK);
        assert!(response.json()["auth_request_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_consent_after_request_expiry() {
        let fixture = TestFixture::with_config(|config| {
            config.tokens.auth_request_ttl = 1;
        })
        .await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let response = fixture.get(&authorize_uri("app_shop", "user:read")).await;
        let auth_request_id = response.json()["auth_request_id"].as_str().unwrap().to_string();

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;

        let response = fixture
            .post_form(
                "/consent",
                &[
                    ("auth_request_id", auth_request_id.as_str()),
                    ("approved", "true"),
                    ("user_id", "@alice:platform.example"),
                ],
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert!(response.json()["error_description"]
            .as_str()
            .unwrap()
            .contains("expired"));
    }

    #[tokio::test]
    async fn test_introspect_live_token() {
        let fixture = TestFixture::new().await;
        fixture.mount_app("app_shop", &["user:read"]).await;

        let code = approved_code(&fixture, "app_shop", "user:read").await;
        let response = fixture
            .post_form(
                "/token",
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code.as_str()),
                    ("code_verifier", VERIFIER),
                ],
            )
            .await;
        let access_token = response.json()["access_token"].as_str().unwrap().to_string();

        let response = fixture
            .post_form("/introspect", &[("token", access_token.as_str())])
            .await;
        response.assert_status(StatusCode::OK);
        let body = response.json();
        assert_eq!(body["active"], true);
        assert_eq!(body["sub"], "@alice:platform.example");
        assert_eq!(body["client_id"], "app_shop");
        assert_eq!(body["scope"], "user:read");
        assert_eq!(body["token_type"], "capability_access_token");
    }

    #[tokio::test]
    async fn test_introspect_garbage_is_inactive() {
        let fixture = TestFixture::new().await;
        let response = fixture
            .post_form("/introspect", &[("token", "not.a.token")])
            .await;

        // No oracle: any failure is a bare inactive response.
        response.assert_status(StatusCode::OK);
        assert_eq!(response.json(), serde_json::json!({"active": false}));
    }
}
