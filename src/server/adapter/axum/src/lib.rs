/* src/server/adapter/axum/src/lib.rs */

mod error;
mod handler;

use std::sync::Arc;

use axum::http::request::Parts;
use trellis_server::{LoadContext, RequestHandler, Session};

pub use error::AxumError;
pub use handler::{ContextFn, MAX_BODY_BYTES};
/// Re-export trellis-server core for convenience
pub use trellis_server;

/// Extension trait that mounts a `RequestHandler` as an Axum router.
pub trait IntoAxumRouter {
  fn into_axum_router(self) -> axum::Router;

  /// Like `into_axum_router`, deriving each request's session and load
  /// context from its head.
  fn into_axum_router_with<F>(self, context: F) -> axum::Router
  where
    F: Fn(&Parts) -> (Session, LoadContext) + Send + Sync + 'static;

  fn serve(
    self,
    addr: &str,
  ) -> impl std::future::Future<Output = Result<(), Box<dyn std::error::Error>>> + Send;
}

impl IntoAxumRouter for RequestHandler {
  fn into_axum_router(self) -> axum::Router {
    handler::build_router(self, None)
  }

  fn into_axum_router_with<F>(self, context: F) -> axum::Router
  where
    F: Fn(&Parts) -> (Session, LoadContext) + Send + Sync + 'static,
  {
    handler::build_router(self, Some(Arc::new(context)))
  }

  async fn serve(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mode = self.mode();
    let router = self.into_axum_router();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(mode = mode.as_str(), "trellis server running on http://localhost:{port}");
    axum::serve(listener, router).await?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use axum::body::Body;
  use axum::http::header::{CONTENT_TYPE, LOCATION};
  use axum::http::{Request, StatusCode};
  use pretty_assertions::assert_eq;
  use tower::ServiceExt;
  use trellis_server::config::ServerMode;
  use trellis_server::{
    AssetEntry, AssetManifest, AssetSource, DataArgs, DataError, DataOutput, DataResponse,
    Deferred, DocumentShell, HandlerOptions, ModuleRegistry, RouteDefinition, RouteManifest,
    RouteModule, Value,
  };

  use super::*;

  struct User(&'static str);

  fn data(value: impl Into<Value>) -> Result<DataOutput, DataError> {
    Ok(DataOutput::Data(value.into()))
  }

  fn respond(response: DataResponse) -> Result<DataOutput, DataError> {
    Ok(DataOutput::Response(response))
  }

  fn handler() -> RequestHandler {
    let routes = RouteManifest::from_routes([
      RouteDefinition::new("root").path("/").with_loader(),
      RouteDefinition::new("routes/posts").parent("root").path("posts").with_loader().with_action(),
    ])
    .unwrap();
    let registry = ModuleRegistry::new()
      .route(
        "root",
        RouteModule::new().loader(|args: DataArgs| async move {
          let user = args.session.get::<User>().map_or("anonymous", |u| u.0);
          data(Value::object([("user", user)]))
        }),
      )
      .route(
        "routes/posts",
        RouteModule::new()
          .loader(|_| async {
            data(Value::object([(
              "comments",
              Deferred::resolved(Value::array([Value::from("first!")])),
            )]))
          })
          .action(|args: DataArgs| async move {
            let title = String::from_utf8_lossy(args.request.body()).into_owned();
            respond(DataResponse::redirect(&format!("/posts?created={title}")))
          }),
      );
    let mut entries = BTreeMap::new();
    entries.insert(
      "entry-browser".to_string(),
      AssetEntry { file: "entry-browser-7e.js".into(), imports: vec![] },
    );
    let assets = AssetSource::Static(Arc::new(AssetManifest { version: "7e".into(), entries }));
    RequestHandler::new(routes, registry, DocumentShell::new(), assets)
      .unwrap()
      .options(HandlerOptions { mode: ServerMode::Test, ..HandlerOptions::default() })
  }

  async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
  }

  #[tokio::test]
  async fn document_is_streamed_through() {
    let router = handler().into_axum_router();
    let req = Request::get("/posts").header("host", "localhost").body(Body::empty()).unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
    let html = body_text(response).await;
    assert!(html.contains("\"user\":\"anonymous\""), "{html}");
    assert!(html.contains(r#"{"id":"0","value":["first!"]}"#), "{html}");
    assert!(html.ends_with("</body></html>"));
  }

  #[tokio::test]
  async fn action_redirect_reaches_client() {
    let router = handler().into_axum_router();
    let req = Request::post("/posts").body(Body::from("hello")).unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/posts?created=hello");
  }

  #[tokio::test]
  async fn data_request_returns_json() {
    let router = handler().into_axum_router();
    let req = Request::get("/_internal/data?url=%2Fposts&id=routes%2Fposts")
      .body(Body::empty())
      .unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"comments":["first!"]}"#);
  }

  #[tokio::test]
  async fn context_fn_supplies_session() {
    let router = handler().into_axum_router_with(|parts: &Parts| {
      let session = match parts.headers.get("x-user") {
        Some(_) => Session::new(User("ada")),
        None => Session::empty(),
      };
      (session, LoadContext::empty())
    });
    let req = Request::get("/").header("x-user", "1").body(Body::empty()).unwrap();
    let html = body_text(router.oneshot(req).await.unwrap()).await;
    assert!(html.contains("\"user\":\"ada\""), "{html}");
  }

  #[tokio::test]
  async fn pipeline_error_becomes_json_envelope() {
    let routes = RouteManifest::from_routes([RouteDefinition::new("root").path("/")]).unwrap();
    let registry = ModuleRegistry::new().route("root", RouteModule::new());
    let empty = AssetSource::Static(Arc::new(AssetManifest { version: "0".into(), entries: BTreeMap::new() }));
    let router = RequestHandler::new(routes, registry, DocumentShell::new(), empty)
      .unwrap()
      .into_axum_router();
    let response = router.oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
  }
}
