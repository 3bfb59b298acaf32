use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::blockchain::client::ClientError;
use crate::db::StoreError;
use crate::service::ServiceError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("upstream node error: {0}")]
    Upstream(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Upstream(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            // Do not leak database details to the caller.
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(e) => ApiError::BadRequest(e.to_string()),
            ServiceError::Store(StoreError::InvalidIdentifier(e)) => {
                ApiError::BadRequest(e.to_string())
            }
            ServiceError::Store(e) => ApiError::Internal(e.to_string()),
            ServiceError::Client(ClientError::InvalidRawTransaction(e)) => {
                ApiError::BadRequest(e)
            }
            ServiceError::Client(e) => ApiError::Upstream(e.to_string()),
        }
    }
}
