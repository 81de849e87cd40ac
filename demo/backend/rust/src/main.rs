/* demo/backend/rust/src/main.rs */

mod routes;
mod store;

use axum::http::header::COOKIE;
use axum::http::request::Parts;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use trellis_server::{
  DocumentShell, LoadContext, RequestHandler, Session, TrellisConfig, TrellisError, find_config,
  load_config, load_route_manifest,
};
use trellis_server_axum::IntoAxumRouter;

use routes::{SESSION_COOKIE, User};
use store::Store;

fn config() -> Result<TrellisConfig, TrellisError> {
  let cwd = std::env::current_dir()?;
  match find_config(&cwd) {
    Ok(path) => load_config(&path),
    Err(err) => {
      tracing::warn!(error = %err, "using default configuration");
      Ok(TrellisConfig::default())
    }
  }
}

fn session(parts: &Parts) -> Session {
  let user = parts
    .headers
    .get_all(COOKIE)
    .iter()
    .filter_map(|v| v.to_str().ok())
    .flat_map(|v| v.split(';'))
    .find_map(|pair| {
      let (name, value) = pair.trim().split_once('=')?;
      (name == SESSION_COOKIE && !value.is_empty()).then(|| User { name: value.to_string() })
    });
  user.map_or_else(Session::empty, Session::new)
}

fn app(config: &TrellisConfig, store: Store) -> Result<axum::Router, TrellisError> {
  let manifest = load_route_manifest(&config.server.build_dir)?;
  let shell = DocumentShell::new().title("Trellis Blog");
  let handler = RequestHandler::from_config(config, manifest, routes::registry(), shell)?;
  Ok(handler.into_axum_router_with(move |parts: &Parts| {
    (session(parts), LoadContext::new(store.clone()))
  }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "trellis_demo=debug,trellis_server=info".into()),
    )
    .with(tracing_subscriber::fmt::layer())
    .init();

  let config = config()?;
  let router = app(&config, Store::seeded())?;
  let addr = format!("0.0.0.0:{}", config.server.port);
  let listener = tokio::net::TcpListener::bind(&addr).await?;
  tracing::info!(%addr, mode = config.server.mode.as_str(), "trellis demo listening");
  axum::serve(listener, router).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use axum::body::Body;
  use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, LOCATION, SET_COOKIE};
  use axum::http::{Request, StatusCode};
  use tower::ServiceExt;
  use trellis_server::config::ServerMode;

  use super::*;

  fn test_config() -> TrellisConfig {
    let mut config = TrellisConfig::default();
    config.server.mode = ServerMode::Test;
    config.server.build_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("build");
    config
  }

  async fn text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
  }

  fn form(uri: &str, body: &'static str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri).header(CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
      builder = builder.header(COOKIE, cookie);
    }
    builder.body(Body::from(body)).unwrap()
  }

  #[test]
  fn shipped_config_parses() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("trellis.toml");
    let config = load_config(&path).unwrap();
    assert_eq!(config.server.port, 3000);
    assert!(config.server.build_dir.ends_with("build"));
  }

  #[tokio::test]
  async fn post_page_renders_with_cache_header() {
    let router = app(&test_config(), Store::seeded()).unwrap();
    let req = Request::get("/posts/hello-world").body(Body::empty()).unwrap();
    let response = router.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CACHE_CONTROL], "max-age=60");
    let html = text(response).await;
    assert!(html.contains("Hello, world"));
    assert!(html.contains("/build/entry-browser-d3m0.js"));
  }

  #[tokio::test]
  async fn unknown_post_is_404() {
    let router = app(&test_config(), Store::seeded()).unwrap();
    let req = Request::get("/posts/nope").body(Body::empty()).unwrap();
    assert_eq!(router.oneshot(req).await.unwrap().status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn creating_a_post_requires_login() {
    let router = app(&test_config(), Store::seeded()).unwrap();
    let response =
      router.clone().oneshot(form("/posts/new", "title=Draft", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(response.headers()[LOCATION], "/login");

    let response = router.clone().oneshot(form("/login", "name=ada", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let cookie = response.headers()[SET_COOKIE].to_str().unwrap().split(';').next().unwrap().to_string();

    let response =
      router.clone().oneshot(form("/posts/new", "title=Second+Post&body=hi", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[LOCATION], "/posts/second-post");

    let req = Request::get("/posts/second-post").body(Body::empty()).unwrap();
    let html = text(router.oneshot(req).await.unwrap()).await;
    assert!(html.contains("Second Post"));
  }

  #[tokio::test]
  async fn posts_list_streams_stats() {
    let router = app(&test_config(), Store::seeded()).unwrap();
    let req = Request::get("/posts").body(Body::empty()).unwrap();
    let html = text(router.oneshot(req).await.unwrap()).await;
    assert!(html.contains(r#""stats":{"$deferred":"0"}"#), "{html}");
    assert!(html.contains(r#"{"id":"0","value":{"count":1}}"#), "{html}");
  }
}
