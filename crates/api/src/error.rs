//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Saga engine error.
    Saga(SagaError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Saga(err) => saga_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn saga_error_to_response(err: SagaError) -> (StatusCode, String) {
    let status = match &err {
        SagaError::Uncorrelated { .. } | SagaError::InvalidInstanceId(_) => StatusCode::BAD_REQUEST,
        SagaError::ConcurrencyExhausted { .. } | SagaError::SagaTypeMismatch { .. } => {
            StatusCode::CONFLICT
        }
        SagaError::Publish { .. } | SagaError::Schedule { .. } => StatusCode::BAD_GATEWAY,
        SagaError::DispatcherClosed => StatusCode::SERVICE_UNAVAILABLE,
        SagaError::Store(_) | SagaError::Serialization(_) | SagaError::Registry(_) => {
            tracing::error!(error = %err, "internal server error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SagaId;

    #[test]
    fn test_business_errors_map_to_client_statuses() {
        let (status, _) = saga_error_to_response(SagaError::Uncorrelated {
            message_type: "IdentityCreated",
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, message) = saga_error_to_response(SagaError::ConcurrencyExhausted {
            instance_id: SagaId::from("saga-1"),
            attempts: 4,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(message.contains("saga-1"));
    }

    #[test]
    fn test_transport_errors_map_to_gateway_statuses() {
        let (status, _) = saga_error_to_response(SagaError::Publish {
            instance_id: SagaId::from("saga-1"),
            reason: "broker down".to_string(),
        });
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, _) = saga_error_to_response(SagaError::DispatcherClosed);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
