//! HTTP clients for the external collaborators: the identity provider and
//! the mini-app registry. Every call goes through the dependency's circuit
//! breaker and carries a bounded timeout so a stalled collaborator cannot
//! exhaust the request pool.

pub mod identity;
pub mod registry;

use crate::breaker::BreakerError;
use crate::errors::ApiError;
use http::StatusCode;
use thiserror::Error;

/// Errors from a breaker-wrapped collaborator call.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The circuit is open; the collaborator was not called at all.
    #[error("{dependency} is currently unavailable")]
    Unavailable {
        dependency: String,
        retry_after_secs: u64,
    },
    /// The collaborator was called and the transport failed.
    #[error("request to {dependency} failed: {source}")]
    Request {
        dependency: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// The collaborator answered with an unexpected status.
    #[error("{dependency} returned status {status}")]
    Status {
        dependency: &'static str,
        status: StatusCode,
    },
    /// The collaborator answered with a body we could not parse.
    #[error("failed to parse {dependency} response: {message}")]
    Parse {
        dependency: &'static str,
        message: String,
    },
}

impl ClientError {
    pub(crate) fn from_breaker(err: BreakerError<ClientError>) -> Self {
        match err {
            BreakerError::Open { name, retry_after } => ClientError::Unavailable {
                dependency: name,
                retry_after_secs: retry_after.as_secs(),
            },
            BreakerError::Inner(inner) => inner,
        }
    }
}

impl From<ClientError> for ApiError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unavailable {
                dependency,
                retry_after_secs,
            } => ApiError::unavailable(&dependency, retry_after_secs),
            ClientError::Request { dependency, .. } => {
                ApiError::bad_gateway(format!("request to {dependency} failed"))
            }
            ClientError::Status { dependency, status } => {
                ApiError::bad_gateway(format!("{dependency} returned status {status}"))
            }
            ClientError::Parse { dependency, .. } => {
                ApiError::internal(format!("failed to parse {dependency} response"))
            }
        }
    }
}
