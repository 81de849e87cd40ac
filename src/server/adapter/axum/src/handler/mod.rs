/* src/server/adapter/axum/src/handler/mod.rs */

mod convert;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::request::Parts;
use axum::response::Response;
use trellis_server::{LoadContext, RequestHandler, Session};

use crate::error::AxumError;
use convert::{into_axum_response, into_core_request};

/// Upper bound on buffered request bodies (form posts, action payloads).
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Derives the session and load context for one request from its head.
pub type ContextFn = Arc<dyn Fn(&Parts) -> (Session, LoadContext) + Send + Sync>;

pub(crate) struct AppState {
  pub handler: RequestHandler,
  pub context: Option<ContextFn>,
}

/// Every path is owned by the pipeline, so the whole app is one fallback.
pub(crate) fn build_router(handler: RequestHandler, context: Option<ContextFn>) -> Router {
  let state = Arc::new(AppState { handler, context });
  Router::new().fallback(handle_request).with_state(state)
}

async fn handle_request(
  State(state): State<Arc<AppState>>,
  req: axum::extract::Request,
) -> Result<Response, AxumError> {
  let (parts, body) = req.into_parts();
  let (session, context) = match &state.context {
    Some(f) => f(&parts),
    None => (Session::empty(), LoadContext::empty()),
  };
  let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(AxumError::Body)?;
  let request = into_core_request(&parts, body)?;
  let response = state.handler.handle(request, session, context).await?;
  Ok(into_axum_response(response))
}
