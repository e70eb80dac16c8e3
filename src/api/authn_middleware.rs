use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use log::warn;

/// Bearer API-key gate for the administrative surface (/revoke,
/// /device/approve). The key is shared with the platform's own backends;
/// mini-apps never hold it.
pub(super) async fn authentication_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Extract the authorization header
    let auth_header = match request.headers().get(http::header::AUTHORIZATION) {
        Some(header) => header,
        None => {
            warn!("Missing Authorization header");
            return Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body("Missing Authorization header".into())
                .expect("Failed to create response");
        }
    };

    // Extract the token from the authorization header
    let api_key = match auth_header.to_str() {
        Ok(header_str) if header_str.to_lowercase().starts_with("bearer ") => {
            // Remove the "Bearer " prefix
            header_str[7..].to_string()
        }
        Ok(header_str) => {
            warn!(
                "Invalid Authorization header format, missing 'Bearer ' prefix: {}",
                header_str
            );
            return forbidden();
        }
        Err(e) => {
            warn!("Failed to parse Authorization header to string: {}", e);
            return forbidden();
        }
    };

    // Verify the API key
    if state.config.api_key.is_empty() || api_key != state.config.api_key {
        warn!("Authentication failed: Invalid API key");
        return forbidden();
    }
    next.run(request).await
}

fn forbidden() -> Response {
    Response::builder()
        .status(StatusCode::FORBIDDEN)
        .body("You are not authorized to access this resource, please check your API key.".into())
        .expect("Failed to create response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{memory::InMemoryCache, Cache};
    use crate::config::CapConfig;
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const TEST_ROUTE: &str = "/test";

    /// Helper function to set up a mock app with authentication middleware
    fn setup_authn_mock_app(api_key: &str) -> Router {
        let config = CapConfig {
            api_key: api_key.to_string(),
            ..Default::default()
        };
        let cache = Cache::InMemory(InMemoryCache::new(60, 128).unwrap());
        let state = AppState::with_existing_cache(config, cache).unwrap();

        Router::new()
            .route(TEST_ROUTE, get(|| async { (StatusCode::OK, "Authenticated") }))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                authentication_middleware,
            ))
            .with_state(state)
    }

    /// Helper function to build a request with optional authorization header
    async fn send_request(app: &Router, auth_header: Option<&str>) -> (StatusCode, String) {
        let mut request_builder = Request::builder().uri(TEST_ROUTE);

        if let Some(auth) = auth_header {
            request_builder = request_builder.header("Authorization", auth);
        }

        let request = request_builder
            .body(Body::empty())
            .expect("Failed to build request");

        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let body = String::from_utf8(body_bytes.to_vec())
            .expect("Failed to convert response body to string");

        (status, body)
    }

    #[tokio::test]
    async fn test_authentication_middleware() {
        let app = setup_authn_mock_app("test_api_key");
        let (status, body) = send_request(&app, Some("Bearer test_api_key")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "Authenticated");
    }

    #[tokio::test]
    async fn test_missing_authorization_header() {
        let app = setup_authn_mock_app("test_api_key");
        let (status, body) = send_request(&app, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "Missing Authorization header");
    }

    #[tokio::test]
    async fn test_invalid_authorization_format() {
        let app = setup_authn_mock_app("test_api_key");
        let (status, _) = send_request(&app, Some("test_api_key")).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_invalid_api_key() {
        let app = setup_authn_mock_app("test_api_key");
        let (status, _) = send_request(&app, Some("Bearer wrong_api_key")).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_empty_configured_key_rejects_everything() {
        // An unset API key must fail closed, not open.
        let app = setup_authn_mock_app("");
        let (status, _) = send_request(&app, Some("Bearer ")).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}
