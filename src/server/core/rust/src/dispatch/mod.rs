/* src/server/core/rust/src/dispatch/mod.rs */

mod aggregate;


use std::sync::Arc;

use http::header::{CACHE_CONTROL, ETAG};
use http::{HeaderName, HeaderValue, StatusCode};
use tokio::task::{JoinError, JoinHandle};

use crate::assets::{AssetManifest, AssetSource};
use crate::config::{ServerMode, TrellisConfig};
use crate::data::{
  DataArgs, DataResult, GLOBAL_LOADER_ID, LoadContext, Session, invoke_action, invoke_global_loader,
  invoke_loader,
};
use crate::dev::{DevBuilder, ManifestWriter, narrow_manifest};
use crate::entry::{create_entry_manifest, create_partial_manifest};
use crate::errors::TrellisError;
use crate::handoff::{handoff_string, serialize};
use crate::http::{Request, Response, json, json_error};
use crate::module::{EntryContext, ModuleRegistry, ServerEntry};
use crate::route::{Params, RouteManifest, RouteMatch, RouteTree};
use aggregate::{aggregate, fold_headers};

/// Carries the redirect target of a data request; fetches cannot observe
/// redirects, so the client follows this header itself.
pub const REDIRECT_HEADER: &str = "x-trellis-redirect";

/// Manifest responses are content-addressed by version.
pub const ONE_YEAR: u32 = 31_536_000;

pub const NOT_FOUND_ROUTE_ID: &str = "routes/404";
pub const SERVER_ERROR_ROUTE_ID: &str = "routes/500";

/// Where development rebuilds are written, relative to the build dir.
pub const DEV_CACHE_DIR: &str = ".cache/build";

#[derive(Debug, Clone)]
pub struct HandlerOptions {
  pub mode: ServerMode,
  pub public_path: String,
  pub data_path: String,
  pub manifest_path: String,
}

impl Default for HandlerOptions {
  fn default() -> Self {
    Self::from(&TrellisConfig::default())
  }
}

impl From<&TrellisConfig> for HandlerOptions {
  fn from(config: &TrellisConfig) -> Self {
    Self {
      mode: config.server.mode,
      public_path: config.server.public_path.clone(),
      data_path: config.server.data_path.clone(),
      manifest_path: config.server.manifest_path.clone(),
    }
  }
}

/// Serves every request for one app: data requests, manifest requests and
/// documents. Cheap to clone; the route tree and registry are shared
/// read-only across requests.
#[derive(Clone)]
pub struct RequestHandler {
  tree: Arc<RouteTree>,
  manifest: Arc<RouteManifest>,
  registry: Arc<ModuleRegistry>,
  entry: Arc<dyn ServerEntry>,
  assets: AssetSource,
  dev_builder: Option<Arc<dyn DevBuilder>>,
  options: Arc<HandlerOptions>,
}

impl RequestHandler {
  /// Build the route tree and check the registry against the manifest.
  /// Both failures are configuration errors.
  pub fn new(
    manifest: RouteManifest,
    registry: ModuleRegistry,
    entry: impl ServerEntry + 'static,
    assets: AssetSource,
  ) -> Result<Self, TrellisError> {
    let tree = RouteTree::new(&manifest)?;
    registry.validate(&manifest)?;
    tracing::info!(routes = manifest.len(), "request handler ready");
    Ok(Self {
      tree: Arc::new(tree),
      manifest: Arc::new(manifest),
      registry: Arc::new(registry),
      entry: Arc::new(entry),
      assets,
      dev_builder: None,
      options: Arc::new(HandlerOptions::default()),
    })
  }

  /// Wire a handler from `trellis.toml`. Development mode fetches assets
  /// from the dev origin and writes narrowed manifests under the build dir.
  pub fn from_config(
    config: &TrellisConfig,
    manifest: RouteManifest,
    registry: ModuleRegistry,
    entry: impl ServerEntry + 'static,
  ) -> Result<Self, TrellisError> {
    config.validate()?;
    let options = HandlerOptions::from(config);
    let assets = match (options.mode, config.dev_origin()) {
      (ServerMode::Development, Some(origin)) => AssetSource::dev_origin(origin),
      _ => AssetSource::BuildDir(config.server.build_dir.clone()),
    };
    let mut handler = Self::new(manifest, registry, entry, assets)?.options(options);
    if handler.mode().is_development() {
      handler = handler.dev_builder(ManifestWriter::new(config.server.build_dir.join(DEV_CACHE_DIR)));
    }
    Ok(handler)
  }

  #[must_use]
  pub fn options(mut self, options: HandlerOptions) -> Self {
    self.options = Arc::new(options);
    self
  }

  #[must_use]
  pub fn dev_builder(mut self, builder: impl DevBuilder + 'static) -> Self {
    self.dev_builder = Some(Arc::new(builder));
    self
  }

  pub fn mode(&self) -> ServerMode {
    self.options.mode
  }

  pub fn manifest(&self) -> &RouteManifest {
    &self.manifest
  }

  /// Handle one request. Per-route failures become statuses inside the
  /// response; only asset, build, and render failures surface as `Err`.
  pub async fn handle(
    &self,
    request: Request,
    session: Session,
    context: LoadContext,
  ) -> Result<Response, TrellisError> {
    let path = request.url().path();
    tracing::debug!(method = %request.method(), path, "handling request");

    if path.starts_with(self.options.data_path.as_str()) {
      return Ok(self.handle_data_request(request, session, context).await);
    }
    if path.starts_with(self.options.manifest_path.as_str()) {
      return self.handle_manifest_request(&request).await;
    }
    self.handle_document_request(request, session, context).await
  }

  async fn handle_data_request(
    &self,
    request: Request,
    session: Session,
    context: LoadContext,
  ) -> Response {
    let Some(url_param) = request.query_param("url") else {
      return json_error("Missing ?url", StatusCode::FORBIDDEN);
    };
    let Some(route_id) = request.query_param("id") else {
      return json_error("Missing ?id", StatusCode::FORBIDDEN);
    };
    let params: Params = match request.query_param("params") {
      None => Params::new(),
      Some(raw) => match serde_json::from_str(&raw) {
        Ok(params) => params,
        Err(err) => return json_error(format!("Invalid ?params: {err}"), StatusCode::BAD_REQUEST),
      },
    };
    let Ok(url) = request.url().join(&url_param) else {
      return json_error(format!("Invalid ?url \"{url_param}\""), StatusCode::BAD_REQUEST);
    };

    let is_action = request.is_action();
    let args = DataArgs { request: request.retarget(url), params, session, context };
    let result = if route_id == GLOBAL_LOADER_ID {
      invoke_global_loader(self.registry.global(), args).await
    } else if !self.manifest.contains(&route_id) {
      return json_error(format!("No route with id \"{route_id}\""), StatusCode::NOT_FOUND);
    } else {
      let module = self.registry.get(&route_id).map(Arc::as_ref);
      if is_action {
        invoke_action(&route_id, module, args).await
      } else {
        invoke_loader(&route_id, module, args).await
      }
    };
    self.report(&result, if is_action { "action" } else { "loader" });

    match result {
      DataResult::Redirect { location, .. } => match HeaderValue::from_str(&location) {
        Ok(value) => Response::new(StatusCode::NO_CONTENT)
          .with_header(HeaderName::from_static(REDIRECT_HEADER), value),
        Err(err) => {
          tracing::error!(route_id = %route_id, location = %location, error = %err, "unusable redirect target");
          json_error(
            format!("Redirect target \"{location}\" is not a valid header value"),
            StatusCode::INTERNAL_SERVER_ERROR,
          )
        }
      },
      other => other.into_response().await,
    }
  }

  async fn handle_manifest_request(&self, request: &Request) -> Result<Response, TrellisError> {
    let Some(url_param) = request.query_param("url") else {
      return Ok(json_error("Missing ?url", StatusCode::FORBIDDEN));
    };
    let Ok(url) = request.url().join(&url_param) else {
      return Ok(json_error(format!("Invalid ?url \"{url_param}\""), StatusCode::BAD_REQUEST));
    };
    let Some(matches) = self.tree.match_path(url.path()) else {
      return Ok(not_found(url.path()));
    };

    let assets = match self.assets.load().await {
      Ok(assets) => assets,
      Err(err) if self.options.mode.is_development() => {
        tracing::error!(error = %err, "manifest request failed");
        return Ok(json_error("Unable to fetch asset manifest", StatusCode::INTERNAL_SERVER_ERROR));
      }
      Err(err) => return Err(err),
    };

    let manifest =
      create_partial_manifest(&matches, &self.registry, &assets, &self.options.public_path);
    let mut response = json(&manifest, StatusCode::OK);
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={ONE_YEAR}")) {
      response.headers.insert(CACHE_CONTROL, value);
    }
    if let Ok(value) = HeaderValue::from_str(&manifest.version) {
      response.headers.insert(ETAG, value);
    }
    Ok(response)
  }

  async fn handle_document_request(
    &self,
    request: Request,
    session: Session,
    context: LoadContext,
  ) -> Result<Response, TrellisError> {
    let pathname = request.url().path().to_string();
    let matched = self.tree.match_path(&pathname);

    if request.is_action() {
      return Ok(self.handle_action(request, session, context, matched).await);
    }

    let (mut matches, initial_status) = match matched {
      Some(matches) => (matches, StatusCode::OK),
      None => {
        let err = no_match(&pathname);
        tracing::debug!(code = err.code(), error = %err, "rendering not-found document");
        (vec![RouteMatch::synthetic(NOT_FOUND_ROUTE_ID, &pathname)], StatusCode::NOT_FOUND)
      }
    };

    // every loader is launched before any is awaited
    let args = |params: Params| DataArgs {
      request: request.clone(),
      params,
      session: session.clone(),
      context: context.clone(),
    };
    let global_task: JoinHandle<DataResult> = {
      let registry = self.registry.clone();
      let args = args(Params::new());
      tokio::spawn(async move { invoke_global_loader(registry.global(), args).await })
    };
    let route_tasks: Vec<JoinHandle<DataResult>> = matches
      .iter()
      .map(|m| {
        let module = self.registry.get(&m.route.id).cloned();
        let route_id = m.route.id.clone();
        let args = args(m.params.clone());
        tokio::spawn(async move { invoke_loader(&route_id, module.as_deref(), args).await })
      })
      .collect();

    // aggregation is root-to-leaf regardless of completion order
    let mut results = Vec::with_capacity(route_tasks.len() + 1);
    results.push(joined(GLOBAL_LOADER_ID, global_task.await));
    for (m, task) in matches.iter().zip(route_tasks) {
      results.push(joined(&m.route.id, task.await));
    }
    for result in &results {
      self.report(result, "loader");
    }

    let verdict = aggregate(&results);
    if let Some(index) = verdict.redirect {
      return Ok(results.swap_remove(index).into_response().await);
    }
    let status = verdict.status_or(initial_status);

    let global_result = results.remove(0);
    let mut route_results = results;
    if matches!(global_result, DataResult::Error { .. }) {
      matches = vec![RouteMatch::synthetic(SERVER_ERROR_ROUTE_ID, &pathname)];
      route_results = vec![DataResult::empty()];
    }

    let assets = self.load_assets(&matches).await?;
    let headers = fold_headers(&matches, &route_results, &self.registry);

    let global_data = global_result.into_value().await;
    let mut route_data = Vec::with_capacity(route_results.len());
    for result in route_results {
      route_data.push(result.into_value().await);
    }

    let entry_manifest = create_entry_manifest(
      &matches,
      &self.registry,
      &assets,
      &self.options.public_path,
      &self.options.data_path,
    )?;
    let handoff = serialize(&matches, &global_data, &route_data, entry_manifest);
    let context = EntryContext {
      handoff_string: handoff_string(&handoff.server)?,
      handoff: handoff.server,
      deferred: handoff.deferred,
      route_ids: matches.iter().map(|m| m.route.id.clone()).collect(),
    };

    tracing::debug!(path = %pathname, status = status.as_u16(), "rendering document");
    self.entry.render(request, status, headers, context).await
  }

  /// Mutations run only the leaf route's action; no loaders and no document.
  async fn handle_action(
    &self,
    request: Request,
    session: Session,
    context: LoadContext,
    matched: Option<Vec<RouteMatch>>,
  ) -> Response {
    let Some(leaf) = matched.as_ref().and_then(|matches| matches.last()) else {
      return not_found(request.url().path());
    };
    let route_id = leaf.route.id.as_str();
    let module = self.registry.get(route_id).map(Arc::as_ref);
    let args = DataArgs { request, params: leaf.params.clone(), session, context };
    let result = invoke_action(route_id, module, args).await;
    self.report(&result, "action");
    result.into_response().await
  }

  async fn load_assets(&self, matches: &[RouteMatch]) -> Result<Arc<AssetManifest>, TrellisError> {
    match &self.dev_builder {
      Some(builder) if self.options.mode.is_development() => {
        let narrowed = narrow_manifest(matches)?;
        let (assets, built) = tokio::join!(self.assets.load(), builder.rebuild(narrowed));
        let assets = assets?;
        built?;
        Ok(assets)
      }
      _ => self.assets.load().await,
    }
  }

  fn report(&self, result: &DataResult, phase: &'static str) {
    let DataResult::Error { route_id, error } = result else {
      return;
    };
    if self.options.mode == ServerMode::Test {
      return;
    }
    if error.status().is_server_error() {
      tracing::error!(route_id = %route_id, phase, code = error.code(), error = %error, "route {phase} failed");
    } else {
      tracing::warn!(route_id = %route_id, phase, code = error.code(), error = %error, "route {phase} rejected");
    }
  }
}

fn no_match(path: &str) -> TrellisError {
  TrellisError::not_found(format!("No routes matched path \"{path}\""))
}

fn not_found(path: &str) -> Response {
  let err = no_match(path);
  json_error(err.to_string(), err.status())
}

/// A panicked or cancelled loader task counts as an unexpected error in its
/// own slot.
fn joined(route_id: &str, outcome: Result<DataResult, JoinError>) -> DataResult {
  outcome.unwrap_or_else(|err| DataResult::Error {
    route_id: route_id.to_string(),
    error: TrellisError::unexpected(route_id, "loader", anyhow::anyhow!("loader task failed: {err}")),
  })
}
