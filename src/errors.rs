use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use serde_json::json;

/// API error response in the OAuth 2.0 error envelope.
///
/// Every error leaving the service is `{error, error_description}` plus a
/// status code; circuit rejections additionally carry `Retry-After` so
/// callers can tell "we didn't even try" from a genuine downstream failure.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub error: &'static str,
    pub description: Option<String>,
    pub status_code: StatusCode,
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Create a new ApiError with an error code, description and status code
    pub fn new<S: ToString>(error: &'static str, description: S, status_code: StatusCode) -> Self {
        Self {
            error,
            description: Some(description.to_string()),
            status_code,
            retry_after_secs: None,
        }
    }

    /// Malformed or missing parameters (400, never retried)
    pub fn invalid_request<S: ToString>(description: S) -> Self {
        Self::new("invalid_request", description, StatusCode::BAD_REQUEST)
    }

    /// Anything other than `response_type=code` (400)
    pub fn unsupported_response_type() -> Self {
        Self {
            error: "unsupported_response_type",
            description: None,
            status_code: StatusCode::BAD_REQUEST,
            retry_after_secs: None,
        }
    }

    /// A scope outside the global vocabularies (400)
    pub fn invalid_scope<S: ToString>(description: S) -> Self {
        Self::new("invalid_scope", description, StatusCode::BAD_REQUEST)
    }

    /// A scope the client never registered: the escalation guard (403)
    pub fn scope_escalation<S: ToString>(description: S) -> Self {
        Self::new("invalid_scope", description, StatusCode::FORBIDDEN)
    }

    /// Unknown or inactive client (400)
    pub fn invalid_client<S: ToString>(description: S) -> Self {
        Self::new("invalid_client", description, StatusCode::BAD_REQUEST)
    }

    /// Unknown/expired code, device code or refresh token (400)
    pub fn invalid_grant<S: ToString>(description: S) -> Self {
        Self::new("invalid_grant", description, StatusCode::BAD_REQUEST)
    }

    /// A grant type this server does not implement (400)
    pub fn unsupported_grant_type() -> Self {
        Self {
            error: "unsupported_grant_type",
            description: None,
            status_code: StatusCode::BAD_REQUEST,
            retry_after_secs: None,
        }
    }

    /// A replayed one-time artifact or duplicate idempotency key (409)
    pub fn conflict<S: ToString>(description: S) -> Self {
        Self::new("duplicate_request", description, StatusCode::CONFLICT)
    }

    /// Signature verification failure on a signed request (401)
    pub fn invalid_signature<S: ToString>(description: S) -> Self {
        Self::new("invalid_signature", description, StatusCode::UNAUTHORIZED)
    }

    /// Circuit open: the dependency was not even called (503 + Retry-After)
    pub fn unavailable(dependency: &str, retry_after_secs: u64) -> Self {
        Self {
            error: "temporarily_unavailable",
            description: Some(format!("{dependency} is currently unavailable")),
            status_code: StatusCode::SERVICE_UNAVAILABLE,
            retry_after_secs: Some(retry_after_secs.max(1)),
        }
    }

    /// The dependency was called and genuinely failed (502)
    pub fn bad_gateway<S: ToString>(description: S) -> Self {
        Self::new("upstream_error", description, StatusCode::BAD_GATEWAY)
    }

    /// Create new Internal Server Error (500) with a detail message
    pub fn internal<S: ToString>(description: S) -> Self {
        Self::new(
            "server_error",
            description,
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code;
        let body = json!({
            "error": self.error,
            "error_description": self.description,
        });

        let mut response = (status_code, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(http::header::RETRY_AFTER, value);
            }
        }
        response
    }
}
