use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use crosstab_core::CoreError;
use serde::Serialize;

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
  Core(CoreError),
  ValidationError(String),
  Unauthorized,
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::Core(core_err) => {
        let (status, response) = match &core_err {
          CoreError::ServerNotFound(name) => (
            StatusCode::NOT_FOUND,
            ErrorResponse::with_details("Server not found", name.clone()),
          ),
          CoreError::ViewerNotTracked => (
            StatusCode::NOT_FOUND,
            ErrorResponse::new("Viewer is not connected"),
          ),
          CoreError::PlayerNameTooLong => (
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(core_err.to_string()),
          ),
          CoreError::UnsupportedPlaceholder { .. }
          | CoreError::MissingArgument { .. }
          | CoreError::NotAnInteger { .. }
          | CoreError::DanglingPercent { .. }
          | CoreError::Registry(_) => {
            // Don't expose internal errors
            tracing::error!(error = %core_err, "Internal error");
            (
              StatusCode::INTERNAL_SERVER_ERROR,
              ErrorResponse::new("An internal error occurred. Please try again later."),
            )
          }
        };
        (status, Json(response)).into_response()
      }
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
      AppError::Unauthorized => {
        tracing::warn!("Rejected request with missing or invalid API key");
        let error_response = ErrorResponse::new("Invalid or missing API key");
        (StatusCode::UNAUTHORIZED, Json(error_response)).into_response()
      }
    }
  }
}

impl From<CoreError> for AppError {
  fn from(err: CoreError) -> Self {
    AppError::Core(err)
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
