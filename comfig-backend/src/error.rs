use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::ranking::QuickplayError;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  DatabaseError(comfig_db::DbError),
  QuickplayError(QuickplayError),
  ValidationError(String),
  Unauthorized,
}

fn internal_error() -> (StatusCode, ErrorResponse) {
  (
    StatusCode::INTERNAL_SERVER_ERROR,
    ErrorResponse::new("An internal error occurred. Please try again later."),
  )
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let (status, error_response) = match self {
      AppError::DatabaseError(db_err) => {
        // Don't expose internal database errors
        tracing::error!(?db_err, "Database error occurred");
        internal_error()
      }
      AppError::QuickplayError(qp_err) => match qp_err {
        QuickplayError::MissingGeolocation => (
          StatusCode::BAD_REQUEST,
          ErrorResponse::new("Client location is unavailable"),
        ),
        QuickplayError::UnknownEdgeNode(edge) => (
          StatusCode::BAD_REQUEST,
          ErrorResponse::with_details("Unknown edge node", edge),
        ),
        QuickplayError::StoreTimeout => {
          tracing::error!("Backing store timed out");
          (
            StatusCode::GATEWAY_TIMEOUT,
            ErrorResponse::new("Server list is temporarily unavailable"),
          )
        }
        QuickplayError::Store(_) | QuickplayError::CorruptSnapshot(_) => {
          tracing::error!(?qp_err, "Server list error occurred");
          internal_error()
        }
      },
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        (StatusCode::BAD_REQUEST, ErrorResponse::new(msg))
      }
      AppError::Unauthorized => {
        tracing::warn!("Rejected request with invalid token");
        (
          StatusCode::UNAUTHORIZED,
          ErrorResponse::new("Invalid or missing API token"),
        )
      }
    };

    (status, Json(error_response)).into_response()
  }
}

impl From<comfig_db::DbError> for AppError {
  fn from(err: comfig_db::DbError) -> Self {
    AppError::DatabaseError(err)
  }
}

impl From<QuickplayError> for AppError {
  fn from(err: QuickplayError) -> Self {
    AppError::QuickplayError(err)
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
