/* src/server/core/rust/src/errors.rs */

use http::StatusCode;

/// Error taxonomy of the request pipeline.
///
/// Per-request variants (`NotFound`, `MethodNotSupported`, `UnexpectedLoader`)
/// are contained to the route slot that produced them; `Configuration` is
/// fatal to startup or a dev rebuild and is never retried.
#[derive(Debug, thiserror::Error)]
pub enum TrellisError {
  #[error("configuration error: {0}")]
  Configuration(String),

  #[error("{0}")]
  NotFound(String),

  #[error("route \"{route_id}\" does not define an action")]
  MethodNotSupported { route_id: String },

  #[error("unexpected error in {phase} for route \"{route_id}\": {source}")]
  UnexpectedLoader {
    route_id: String,
    phase: &'static str,
    #[source]
    source: anyhow::Error,
  },

  #[error("failed to fetch {url}: {message}")]
  Fetch { url: String, message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("toml error: {0}")]
  Toml(#[from] toml::de::Error),
}

impl TrellisError {
  pub fn configuration(msg: impl Into<String>) -> Self {
    Self::Configuration(msg.into())
  }

  pub fn not_found(msg: impl Into<String>) -> Self {
    Self::NotFound(msg.into())
  }

  pub fn method_not_supported(route_id: impl Into<String>) -> Self {
    Self::MethodNotSupported { route_id: route_id.into() }
  }

  pub fn unexpected(route_id: impl Into<String>, phase: &'static str, source: anyhow::Error) -> Self {
    Self::UnexpectedLoader { route_id: route_id.into(), phase, source }
  }

  pub fn code(&self) -> &'static str {
    match self {
      Self::Configuration(_) => "CONFIGURATION_ERROR",
      Self::NotFound(_) => "NOT_FOUND",
      Self::MethodNotSupported { .. } => "METHOD_NOT_ALLOWED",
      Self::UnexpectedLoader { .. } => "UNEXPECTED_LOADER_ERROR",
      Self::Fetch { .. } => "FETCH_ERROR",
      Self::Io(_) | Self::Json(_) | Self::Toml(_) => "INTERNAL_ERROR",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Self::NotFound(_) => StatusCode::NOT_FOUND,
      Self::MethodNotSupported { .. } => StatusCode::METHOD_NOT_ALLOWED,
      Self::Fetch { .. } => StatusCode::BAD_GATEWAY,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn status_per_variant() {
    assert_eq!(TrellisError::configuration("x").status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(TrellisError::not_found("x").status(), StatusCode::NOT_FOUND);
    assert_eq!(TrellisError::method_not_supported("r").status(), StatusCode::METHOD_NOT_ALLOWED);
    let err = TrellisError::unexpected("routes/a", "loader", anyhow::anyhow!("boom"));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[test]
  fn codes() {
    assert_eq!(TrellisError::configuration("x").code(), "CONFIGURATION_ERROR");
    assert_eq!(TrellisError::not_found("x").code(), "NOT_FOUND");
    assert_eq!(TrellisError::method_not_supported("r").code(), "METHOD_NOT_ALLOWED");
  }

  #[test]
  fn display_includes_route_and_phase() {
    let err = TrellisError::unexpected("routes/posts", "loader", anyhow::anyhow!("db down"));
    assert_eq!(err.to_string(), "unexpected error in loader for route \"routes/posts\": db down");
  }

  #[test]
  fn not_found_display_is_the_message() {
    let err = TrellisError::not_found("No routes matched path \"/x\"");
    assert_eq!(err.to_string(), "No routes matched path \"/x\"");
  }

  #[test]
  fn method_not_supported_display() {
    let err = TrellisError::method_not_supported("routes/about");
    assert_eq!(err.to_string(), "route \"routes/about\" does not define an action");
  }
}
