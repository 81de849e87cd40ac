/* src/server/adapter/axum/src/error.rs */

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use trellis_server::TrellisError;

/// Failures the adapter cannot turn into a pipeline response.
#[derive(Debug, thiserror::Error)]
pub enum AxumError {
  #[error(transparent)]
  Core(#[from] TrellisError),

  #[error("failed to read request body: {0}")]
  Body(axum::Error),

  #[error("invalid request url: {0}")]
  Url(#[from] url::ParseError),
}

impl AxumError {
  fn code(&self) -> &'static str {
    match self {
      Self::Core(err) => err.code(),
      Self::Body(_) | Self::Url(_) => "BAD_REQUEST",
    }
  }

  fn status(&self) -> StatusCode {
    match self {
      Self::Core(err) => err.status(),
      Self::Body(_) | Self::Url(_) => StatusCode::BAD_REQUEST,
    }
  }

  /// Upstream fetches (dev asset server) may succeed on retry.
  fn transient(&self) -> bool {
    matches!(self, Self::Core(TrellisError::Fetch { .. }))
  }
}

impl IntoResponse for AxumError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      tracing::error!(code = self.code(), error = %self, "request failed");
    }
    let body = serde_json::json!({
      "ok": false,
      "error": {
        "code": self.code(),
        "message": self.to_string(),
        "transient": self.transient(),
      }
    });
    (status, axum::Json(body)).into_response()
  }
}
