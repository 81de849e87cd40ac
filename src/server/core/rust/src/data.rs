/* src/server/core/rust/src/data.rs */

// Uniform calling convention for loaders and actions. User code returns a
// `DataOutput` or fails with a `DataError`; the outcome is classified into a
// `DataResult` so the dispatcher never has to inspect raw errors.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::errors::TrellisError;
use crate::handoff::resolve_inline;
use crate::http::{Body, JSON_CONTENT_TYPE, Request, Response, is_redirect_status, json_error};
use crate::module::{ActionFn, LoaderFn, RouteModule};
use crate::route::Params;
use crate::value::Value;

/// Route id used for the app-wide loader that runs before route loaders.
pub const GLOBAL_LOADER_ID: &str = "_global";

macro_rules! opaque_handle {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Clone, Default)]
    pub struct $name(Option<Arc<dyn Any + Send + Sync>>);

    impl $name {
      pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
      }

      pub fn empty() -> Self {
        Self(None)
      }

      pub fn get<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
      }
    }

    impl fmt::Debug for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(concat!(stringify!($name), "(..)"))
      }
    }
  };
}

opaque_handle!(
  /// Session supplied by the embedding environment. Passed through to every
  /// loader and action; the core never reads it.
  Session
);

opaque_handle!(
  /// Embedder-owned context value (database pools, platform bindings).
  LoadContext
);

/// Everything a loader or action receives. `request` is this invocation's own
/// clone; consuming its body does not affect sibling invocations.
#[derive(Debug, Clone)]
pub struct DataArgs {
  pub request: Request,
  pub params: Params,
  pub session: Session,
  pub context: LoadContext,
}

pub enum Payload {
  Data(Value),
  Body(Body),
}

impl fmt::Debug for Payload {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Data(v) => f.debug_tuple("Data").field(v).finish(),
      Self::Body(b) => f.debug_tuple("Body").field(b).finish(),
    }
  }
}

/// A response produced by a loader or action.
#[derive(Debug)]
pub struct DataResponse {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub payload: Payload,
}

impl DataResponse {
  pub fn data(value: impl Into<Value>) -> Self {
    Self::with_status(value, StatusCode::OK)
  }

  pub fn with_status(value: impl Into<Value>, status: StatusCode) -> Self {
    Self { status, headers: HeaderMap::new(), payload: Payload::Data(value.into()) }
  }

  pub fn redirect(location: &str) -> Self {
    Self::redirect_with(location, StatusCode::FOUND)
  }

  /// A location that is not a valid header value is left out; classifying
  /// the response then reports the redirect as an unexpected error.
  pub fn redirect_with(location: &str, status: StatusCode) -> Self {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(location) {
      Ok(value) => {
        headers.insert(LOCATION, value);
      }
      Err(err) => tracing::warn!(location, error = %err, "dropping invalid redirect location"),
    }
    Self { status, headers, payload: Payload::Body(Body::Empty) }
  }

  /// Wrap a fully built response; its body is passed through untouched.
  pub fn raw(response: Response) -> Self {
    Self { status: response.status, headers: response.headers, payload: Payload::Body(response.body) }
  }

  #[must_use]
  pub fn header(mut self, name: http::HeaderName, value: HeaderValue) -> Self {
    self.headers.append(name, value);
    self
  }

  pub fn location(&self) -> Option<&str> {
    self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
  }

  /// Extract the data value. Raw JSON bodies are parsed; anything else
  /// degrades to `Null`.
  pub async fn into_value(self) -> Value {
    match self.payload {
      Payload::Data(value) => value,
      Payload::Body(body) => {
        let response = Response { status: self.status, headers: HeaderMap::new(), body };
        match response.into_bytes().await {
          Ok(bytes) if bytes.is_empty() => Value::Null,
          Ok(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes).map_or(Value::Null, Value::from),
          Err(err) => {
            tracing::warn!(error = %err, "failed to read loader response body");
            Value::Null
          }
        }
      }
    }
  }

  /// Convert into a wire response. Deferred values are awaited and inlined.
  pub async fn into_response(self) -> Response {
    match self.payload {
      Payload::Body(body) => Response { status: self.status, headers: self.headers, body },
      Payload::Data(value) => {
        let json = resolve_inline(&value).await;
        let bytes = serde_json::to_vec(&json).unwrap_or_else(|_| b"null".to_vec());
        let mut headers = self.headers;
        if !headers.contains_key(CONTENT_TYPE) {
          headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
        }
        Response { status: self.status, headers, body: Body::Full(Bytes::from(bytes)) }
      }
    }
  }
}

/// What a loader or action returns on its normal path.
#[derive(Debug)]
pub enum DataOutput {
  /// Plain data; becomes a 200 JSON result.
  Data(Value),
  /// A response value, passed through unchanged.
  Response(DataResponse),
}

impl From<Value> for DataOutput {
  fn from(value: Value) -> Self {
    Self::Data(value)
  }
}

impl From<DataResponse> for DataOutput {
  fn from(response: DataResponse) -> Self {
    Self::Response(response)
  }
}

/// Failure path of a loader or action. A response with a redirect status is
/// treated as a redirect; everything else is an unexpected error.
#[derive(Debug)]
pub enum DataError {
  Response(DataResponse),
  Unexpected(anyhow::Error),
}

impl DataError {
  pub fn redirect(location: &str) -> Self {
    Self::Response(DataResponse::redirect(location))
  }
}

impl From<anyhow::Error> for DataError {
  fn from(err: anyhow::Error) -> Self {
    Self::Unexpected(err)
  }
}

/// Classified outcome of one invocation. Produced once per matched route and
/// consumed once by the dispatcher.
#[derive(Debug)]
pub enum DataResult {
  Ok(DataResponse),
  Redirect { location: String, status: StatusCode, headers: HeaderMap },
  Error { route_id: String, error: TrellisError },
}

impl DataResult {
  pub fn empty() -> Self {
    Self::Ok(DataResponse::data(Value::Null))
  }

  pub fn status(&self) -> StatusCode {
    match self {
      Self::Ok(response) => response.status,
      Self::Redirect { status, .. } => *status,
      Self::Error { error, .. } => error.status(),
    }
  }

  pub fn is_redirect(&self) -> bool {
    matches!(self, Self::Redirect { .. })
  }

  pub fn headers(&self) -> Option<&HeaderMap> {
    match self {
      Self::Ok(response) => Some(&response.headers),
      Self::Redirect { headers, .. } => Some(headers),
      Self::Error { .. } => None,
    }
  }

  /// The data carried into the handoff; failed slots contribute `Null`.
  pub async fn into_value(self) -> Value {
    match self {
      Self::Ok(response) => response.into_value().await,
      Self::Redirect { .. } | Self::Error { .. } => Value::Null,
    }
  }

  /// Final wire response for a direct (non-document) invocation.
  pub async fn into_response(self) -> Response {
    match self {
      Self::Ok(response) => response.into_response().await,
      Self::Redirect { location, status, headers } => {
        crate::http::redirect(&location, status).with_headers(without_location(headers))
      }
      Self::Error { error, .. } => json_error(error.to_string(), error.status()),
    }
  }
}

fn without_location(mut headers: HeaderMap) -> HeaderMap {
  headers.remove(LOCATION);
  headers
}

fn classify_response(route_id: &str, response: DataResponse, phase: &'static str, thrown: bool) -> DataResult {
  if is_redirect_status(response.status) {
    let Some(location) = response.location().map(str::to_string) else {
      let err = anyhow::anyhow!("{phase} redirected with status {} but no valid Location", response.status);
      return DataResult::Error {
        route_id: route_id.to_string(),
        error: TrellisError::unexpected(route_id, phase, err),
      };
    };
    return DataResult::Redirect { location, status: response.status, headers: response.headers };
  }
  if thrown {
    let err = anyhow::anyhow!("{phase} threw a non-redirect response with status {}", response.status);
    return DataResult::Error {
      route_id: route_id.to_string(),
      error: TrellisError::unexpected(route_id, phase, err),
    };
  }
  DataResult::Ok(response)
}

fn classify(route_id: &str, phase: &'static str, outcome: Result<DataOutput, DataError>) -> DataResult {
  match outcome {
    Ok(DataOutput::Data(value)) => DataResult::Ok(DataResponse::data(value)),
    Ok(DataOutput::Response(response)) => classify_response(route_id, response, phase, false),
    Err(DataError::Response(response)) => classify_response(route_id, response, phase, true),
    Err(DataError::Unexpected(source)) => DataResult::Error {
      route_id: route_id.to_string(),
      error: TrellisError::unexpected(route_id, phase, source),
    },
  }
}

async fn call(route_id: &str, phase: &'static str, f: &LoaderFn, args: DataArgs) -> DataResult {
  classify(route_id, phase, f(args).await)
}

/// Run a route's loader. Routes without one yield an empty ok result.
pub async fn invoke_loader(route_id: &str, module: Option<&RouteModule>, args: DataArgs) -> DataResult {
  match module.and_then(|m| m.loader.as_ref()) {
    Some(loader) => call(route_id, "loader", loader, args).await,
    None => DataResult::empty(),
  }
}

/// Run a route's action. Routes without one fail with method-not-supported.
pub async fn invoke_action(route_id: &str, module: Option<&RouteModule>, args: DataArgs) -> DataResult {
  let action: Option<&ActionFn> = module.and_then(|m| m.action.as_ref());
  match action {
    Some(action) => call(route_id, "action", action, args).await,
    None => DataResult::Error {
      route_id: route_id.to_string(),
      error: TrellisError::method_not_supported(route_id),
    },
  }
}

/// Run the app-wide loader, if one is registered.
pub async fn invoke_global_loader(loader: Option<&LoaderFn>, args: DataArgs) -> DataResult {
  match loader {
    Some(loader) => call(GLOBAL_LOADER_ID, "loader", loader, args).await,
    None => DataResult::empty(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::module::RouteModule;

  fn args() -> DataArgs {
    DataArgs {
      request: Request::get("http://localhost/posts").unwrap(),
      params: Params::new(),
      session: Session::empty(),
      context: LoadContext::empty(),
    }
  }

  #[tokio::test]
  async fn missing_loader_is_empty_ok() {
    let result = invoke_loader("routes/about", None, args()).await;
    assert_eq!(result.status(), StatusCode::OK);
    assert!(matches!(result.into_value().await, Value::Null));
  }

  #[tokio::test]
  async fn missing_action_is_method_not_supported() {
    let module = RouteModule::new();
    let result = invoke_action("routes/about", Some(&module), args()).await;
    assert_eq!(result.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(matches!(
      result,
      DataResult::Error { error: TrellisError::MethodNotSupported { .. }, .. }
    ));
  }

  #[tokio::test]
  async fn plain_value_becomes_ok_json() {
    let module = RouteModule::new().loader(|_| async { Ok(Value::from("hello").into()) });
    let result = invoke_loader("root", Some(&module), args()).await;
    assert_eq!(result.status(), StatusCode::OK);
    let response = result.into_response().await;
    assert_eq!(response.headers[CONTENT_TYPE], JSON_CONTENT_TYPE);
    assert_eq!(&response.into_bytes().await.unwrap()[..], br#""hello""#);
  }

  #[tokio::test]
  async fn returned_response_passes_through() {
    let module = RouteModule::new().loader(|_| async {
      Ok(
        DataResponse::with_status(Value::object([("missing", true)]), StatusCode::NOT_FOUND)
          .header(http::header::CACHE_CONTROL, HeaderValue::from_static("no-store"))
          .into(),
      )
    });
    let result = invoke_loader("root", Some(&module), args()).await;
    assert_eq!(result.status(), StatusCode::NOT_FOUND);
    assert_eq!(result.headers().unwrap()[http::header::CACHE_CONTROL], "no-store");
  }

  #[tokio::test]
  async fn thrown_redirect_becomes_redirect_result() {
    let module = RouteModule::new().loader(|_| async { Err(DataError::redirect("/login")) });
    let result = invoke_loader("routes/admin", Some(&module), args()).await;
    match result {
      DataResult::Redirect { location, status, .. } => {
        assert_eq!(location, "/login");
        assert_eq!(status, StatusCode::FOUND);
      }
      other => panic!("expected redirect, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn returned_redirect_is_also_a_redirect() {
    let module = RouteModule::new().action(|_| async {
      Ok(DataResponse::redirect_with("/posts/1", StatusCode::SEE_OTHER).into())
    });
    let result = invoke_action("routes/posts/new", Some(&module), args()).await;
    assert!(result.is_redirect());
    let response = result.into_response().await;
    assert_eq!(response.status, StatusCode::SEE_OTHER);
    assert_eq!(response.location(), Some("/posts/1"));
  }

  #[tokio::test]
  async fn redirect_without_usable_location_is_unexpected() {
    let module = RouteModule::new().loader(|_| async { Err(DataError::redirect("/posts\n1")) });
    let result = invoke_loader("routes/posts", Some(&module), args()).await;
    assert!(!result.is_redirect());
    assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let DataResult::Error { error, .. } = result else { panic!("expected error") };
    assert!(error.to_string().contains("no valid Location"), "{error}");
  }

  #[tokio::test]
  async fn unexpected_error_becomes_500_with_route_id() {
    let module =
      RouteModule::new().loader(|_| async { Err(anyhow::anyhow!("connection refused").into()) });
    let result = invoke_loader("routes/posts", Some(&module), args()).await;
    assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
    match &result {
      DataResult::Error { route_id, error } => {
        assert_eq!(route_id, "routes/posts");
        assert!(error.to_string().contains("connection refused"));
      }
      other => panic!("expected error, got {other:?}"),
    }
    assert!(matches!(result.into_value().await, Value::Null));
  }

  #[tokio::test]
  async fn thrown_non_redirect_response_is_unexpected() {
    let module = RouteModule::new()
      .loader(|_| async { Err(DataError::Response(DataResponse::with_status(1, StatusCode::OK))) });
    let result = invoke_loader("root", Some(&module), args()).await;
    assert_eq!(result.status(), StatusCode::INTERNAL_SERVER_ERROR);
  }

  #[tokio::test]
  async fn raw_json_body_is_parsed_into_value() {
    let raw = Response::new(StatusCode::OK).with_body(r#"{"n":1}"#);
    let value = DataResponse::raw(raw).into_value().await;
    assert!(matches!(value.get("n"), Some(Value::Number(_))));
  }

  #[test]
  fn opaque_handles_downcast() {
    let ctx = LoadContext::new(42_u32);
    assert_eq!(ctx.get::<u32>(), Some(&42));
    assert_eq!(ctx.get::<String>(), None);
    assert!(Session::empty().get::<u32>().is_none());
  }
}
