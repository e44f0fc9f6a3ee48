// suppliersync/src/utils/http.rs
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};

use crate::errors::{Result, SyncError};

/// Which side of the sync an HTTP call talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Source,
    Store,
}

/// Builds the shared HTTP client with the per-request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("suppliersync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::ConfigInvalid(format!("failed to build HTTP client: {e}")))
}

/// Maps a transport-level failure onto the retryable error of the service.
pub fn transport_error(service: Service, err: reqwest::Error) -> SyncError {
    let message = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    };
    match service {
        Service::Source => SyncError::SourceUnavailable(message),
        Service::Store => SyncError::StoreUnavailable(message),
    }
}

/// Parses a `Retry-After` header given in seconds.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Passes successful responses through and classifies the rest.
///
/// 429 is a rate limit, 5xx is unavailability (both retryable), 401/403 are
/// credential failures, any other status is a rejection of the request.
pub async fn check_status(service: Service, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after(response.headers());
        return Err(match service {
            Service::Source => SyncError::SourceRateLimited { retry_after },
            Service::Store => SyncError::StoreRateLimited { retry_after },
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_failure(service, status, body))
}

pub fn classify_failure(service: Service, status: StatusCode, body: String) -> SyncError {
    let auth_failure = status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN;
    match service {
        Service::Source if auth_failure => SyncError::SourceAuth(format!("{status}: {body}")),
        Service::Store if auth_failure => SyncError::StoreAuth(format!("{status}: {body}")),
        Service::Source if status.is_server_error() => {
            SyncError::SourceUnavailable(format!("{status}: {body}"))
        }
        Service::Store if status.is_server_error() => {
            SyncError::StoreUnavailable(format!("{status}: {body}"))
        }
        Service::Source => SyncError::SourceRejected { status: status.as_u16(), body },
        Service::Store => SyncError::StoreRejected { status: status.as_u16(), body },
    }
}
