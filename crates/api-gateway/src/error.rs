//! Mapping of failures onto HTTP responses
//!
//! Clients get a status code and a one-line diagnostic. The full error
//! chain only goes to the operator log.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use common::error::Error;
use common::utils::truncate_string;

use crate::schema::ErrorBody;

const MAX_DETAIL_CHARS: usize = 200;

/// Error returned by the router's handlers
#[derive(Debug)]
pub enum ApiError {
    /// Body was not valid JSON or did not match the request schema
    Json(JsonRejection),

    /// Failure reported by validation or the lifecycle manager
    Lifecycle(Error),
}

impl ApiError {
    /// HTTP status for this error
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Json(rejection) => rejection.status(),
            ApiError::Lifecycle(err) => match err {
                Error::InvalidParameter(_) => StatusCode::BAD_REQUEST,
                Error::Initialization(_) => StatusCode::SERVICE_UNAVAILABLE,
                Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::Json(rejection) => ErrorBody {
                error: "invalid_request".to_string(),
                detail: truncate_string(&rejection.body_text(), MAX_DETAIL_CHARS),
            },
            ApiError::Lifecycle(err) => {
                let detail = match err {
                    Error::Internal(_) => "internal server error".to_string(),
                    other => truncate_string(&other.to_string(), MAX_DETAIL_CHARS),
                };
                ErrorBody {
                    error: err.kind().to_string(),
                    detail,
                }
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Json(rejection)
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Lifecycle(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            ApiError::Lifecycle(err) if status.is_server_error() => {
                error!("Request failed with {}: {}", status, error_chain(err));
            }
            ApiError::Lifecycle(err) => warn!("Request rejected with {}: {}", status, err),
            ApiError::Json(rejection) => warn!("Request rejected with {}: {}", status, rejection),
        }

        (status, Json(self.body())).into_response()
    }
}

/// Renders an error followed by the sources its message does not already show
fn error_chain(err: &Error) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.ends_with(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}
