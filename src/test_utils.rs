use crate::cache::{memory::InMemoryCache, Cache};
use crate::config::CapConfig;
use crate::create_app;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::Serialize;
use serde_json::Value;
use tower::ServiceExt;
use url::form_urlencoded;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Test fixture wiring the full application against mock servers for the
/// mini-app registry and the identity provider.
///
/// ```rust
/// let fixture = TestFixture::new().await;
/// fixture.mount_app("app_weather", &["user:read"]).await;
/// let response = fixture.get("/authorize?...").await;
/// response.assert_status(StatusCode::OK);
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Application state (for direct access to stores in assertions)
    pub state: AppState,
    /// Mock server standing in for the mini-app registry
    pub registry_mock: MockServer,
    /// Mock server standing in for the identity provider
    pub identity_mock: MockServer,
}

pub const TEST_API_KEY: &str = "test_api_key";
pub const TEST_WEBHOOK_SECRET: &str = "idp-hook-secret";

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds a fixture with configuration tweaks applied (short TTLs for
    /// expiry tests and the like).
    pub async fn with_config(tweak: impl FnOnce(&mut CapConfig)) -> Self {
        // Initialize test logger
        let _ = env_logger::builder()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();

        let registry_mock = MockServer::start().await;
        let identity_mock = MockServer::start().await;

        let mut config = CapConfig::default();
        config.api_key = TEST_API_KEY.to_string();
        config.registry.url = registry_mock.uri();
        config.registry.api_key = "registry-key".to_string();
        config.identity.url = identity_mock.uri();
        config.identity.client_id = "cap-server".to_string();
        config.identity.client_secret = "s3cret".to_string();
        config.identity.webhook_secret = TEST_WEBHOOK_SECRET.to_string();
        tweak(&mut config);

        let cache = Cache::InMemory(InMemoryCache::new(3600, 128).expect("test cache"));
        let state = AppState::with_existing_cache(config, cache).expect("test state");
        let app = create_app(state.clone()).await;

        Self {
            app,
            state,
            registry_mock,
            identity_mock,
        }
    }

    /// Registers a mini-app in the registry mock with the given manifest.
    pub async fn mount_app(&self, client_id: &str, registered_scopes: &[&str]) {
        self.mount_app_with(client_id, registered_scopes, true, None)
            .await;
    }

    /// Registers a mini-app with full control over activity and webhook
    /// endpoint.
    pub async fn mount_app_with(
        &self,
        client_id: &str,
        registered_scopes: &[&str],
        active: bool,
        webhook_url: Option<&str>,
    ) {
        Mock::given(method("GET"))
            .and(path(format!("/v1/clients/{client_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "client_id": client_id,
                "name": format!("{client_id} app"),
                "developer": "Example Dev",
                "active": active,
                "verified": true,
                "registered_scopes": registered_scopes,
                "webhook_url": webhook_url,
                "webhook_secret": webhook_url.map(|_| "hook-secret"),
            })))
            .mount(&self.registry_mock)
            .await;
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.request(Method::GET, uri, None, &[], None).await
    }

    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> TestResponse {
        let body: String = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.request(
            Method::POST,
            uri,
            Some(body),
            &[("content-type", "application/x-www-form-urlencoded")],
            None,
        )
        .await
    }

    pub async fn post_json<T: Serialize>(&self, uri: &str, body: &T) -> TestResponse {
        self.request(
            Method::POST,
            uri,
            Some(serde_json::to_string(body).expect("serialize body")),
            &[("content-type", "application/json")],
            None,
        )
        .await
    }

    /// POST with the admin API key attached.
    pub async fn post_json_authed<T: Serialize>(&self, uri: &str, body: &T) -> TestResponse {
        self.request(
            Method::POST,
            uri,
            Some(serde_json::to_string(body).expect("serialize body")),
            &[("content-type", "application/json")],
            Some(TEST_API_KEY),
        )
        .await
    }

    /// POST a raw body with explicit headers (webhook receiver tests).
    pub async fn post_raw(
        &self,
        uri: &str,
        body: String,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.request(Method::POST, uri, Some(body), headers, None)
            .await
    }

    async fn request(
        &self,
        http_method: Method,
        uri: &str,
        body: Option<String>,
        headers: &[(&str, &str)],
        bearer: Option<&str>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(http_method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .expect("Failed to build request");

        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        TestResponse {
            status,
            headers,
            body: bytes.to_vec(),
        }
    }
}

/// A collected response with assertion helpers.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn assert_status(&self, expected: StatusCode) {
        assert_eq!(
            self.status,
            expected,
            "unexpected status, body: {}",
            String::from_utf8_lossy(&self.body)
        );
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or_else(|e| {
            panic!(
                "response body is not JSON ({e}): {}",
                String::from_utf8_lossy(&self.body)
            )
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The `Location` header of a redirect, parsed.
    pub fn redirect_url(&self) -> url::Url {
        let location = self
            .header("location")
            .expect("response has no Location header");
        url::Url::parse(location).expect("Location header is not a URL")
    }

    /// Query parameter from the redirect Location.
    pub fn redirect_param(&self, name: &str) -> Option<String> {
        self.redirect_url()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}
