//! API error types for the scheduler hub
//!
//! A dedicated enum lets every handler return `Result<_, ApiError>` and get
//! consistent HTTP status codes and a [`Fault`]-shaped JSON body for free.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use koji_common::api::ApiResponse;
use koji_common::error::{Fault, FaultCode};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Task {0} was not FREE (or ASSIGNED, when overriding) at commit time")]
    TaskAlreadyAssigned(i64),
    #[error("Task {task_id} is not assigned to host {host_id}")]
    WrongHost { task_id: i64, host_id: i64 },
    #[error("No such task: {0}")]
    NotFound(i64),
    #[error("Too many requests")]
    TooManyRequests,
    #[error("Database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, FaultCode::Unauthorized),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, FaultCode::BadRequest),
            ApiError::TaskAlreadyAssigned(_) => {
                (StatusCode::CONFLICT, FaultCode::TaskAlreadyAssigned)
            }
            ApiError::WrongHost { .. } => (StatusCode::FORBIDDEN, FaultCode::WrongHost),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, FaultCode::BadRequest),
            ApiError::TooManyRequests => (StatusCode::TOO_MANY_REQUESTS, FaultCode::BadRequest),
            ApiError::Database(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, FaultCode::DatabaseError)
            }
        };

        let body: ApiResponse<()> = ApiResponse::failure(Fault::new(code, self.to_string()));
        (status, Json(body)).into_response()
    }
}
