/* src/server/core/rust/src/module.rs */

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::data::{DataArgs, DataError, DataOutput};
use crate::errors::TrellisError;
use crate::handoff::{DeferredSet, ServerHandoff};
use crate::http::{BoxFuture, Request, Response};
use crate::route::RouteManifest;

pub type DataFn =
  Arc<dyn Fn(DataArgs) -> BoxFuture<Result<DataOutput, DataError>> + Send + Sync>;

pub type LoaderFn = DataFn;

pub type ActionFn = DataFn;

/// Inputs to a route's `headers` hook.
pub struct HeadersArgs<'a> {
  /// Headers returned by this route's own loader.
  pub loader_headers: &'a HeaderMap,
  /// Headers accumulated from every ancestor, outermost first.
  pub parent_headers: &'a HeaderMap,
}

pub type HeadersFn = Arc<dyn Fn(HeadersArgs<'_>) -> anyhow::Result<HeaderMap> + Send + Sync>;

fn boxed<F, Fut>(f: F) -> DataFn
where
  F: Fn(DataArgs) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = Result<DataOutput, DataError>> + Send + 'static,
{
  Arc::new(move |args| -> BoxFuture<Result<DataOutput, DataError>> { Box::pin(f(args)) })
}

/// Statically registered code for one route id.
#[derive(Clone, Default)]
pub struct RouteModule {
  pub loader: Option<LoaderFn>,
  pub action: Option<ActionFn>,
  pub headers: Option<HeadersFn>,
}

impl RouteModule {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn loader<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(DataArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DataOutput, DataError>> + Send + 'static,
  {
    self.loader = Some(boxed(f));
    self
  }

  #[must_use]
  pub fn action<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(DataArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DataOutput, DataError>> + Send + 'static,
  {
    self.action = Some(boxed(f));
    self
  }

  #[must_use]
  pub fn headers<F>(mut self, f: F) -> Self
  where
    F: Fn(HeadersArgs<'_>) -> anyhow::Result<HeaderMap> + Send + Sync + 'static,
  {
    self.headers = Some(Arc::new(f));
    self
  }
}

/// Route id -> module, plus the optional app-wide loader. Populated at link
/// time and checked against the manifest before serving.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
  modules: HashMap<String, Arc<RouteModule>>,
  global_loader: Option<LoaderFn>,
}

impl ModuleRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn route(mut self, id: impl Into<String>, module: RouteModule) -> Self {
    self.modules.insert(id.into(), Arc::new(module));
    self
  }

  #[must_use]
  pub fn global_loader<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(DataArgs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<DataOutput, DataError>> + Send + 'static,
  {
    self.global_loader = Some(boxed(f));
    self
  }

  pub fn get(&self, id: &str) -> Option<&Arc<RouteModule>> {
    self.modules.get(id)
  }

  pub fn global(&self) -> Option<&LoaderFn> {
    self.global_loader.as_ref()
  }

  /// Every manifest route needs a module; declared loaders/actions must
  /// exist; modules for unknown ids are rejected.
  pub fn validate(&self, manifest: &RouteManifest) -> Result<(), TrellisError> {
    for route in manifest.iter() {
      let Some(module) = self.modules.get(&route.id) else {
        return Err(TrellisError::configuration(format!(
          "route \"{}\" has no registered module",
          route.id
        )));
      };
      if route.has_loader && module.loader.is_none() {
        return Err(TrellisError::configuration(format!(
          "route \"{}\" declares a loader but its module has none",
          route.id
        )));
      }
      if route.has_action && module.action.is_none() {
        return Err(TrellisError::configuration(format!(
          "route \"{}\" declares an action but its module has none",
          route.id
        )));
      }
    }
    let mut unknown: Vec<&str> =
      self.modules.keys().map(String::as_str).filter(|id| !manifest.contains(id)).collect();
    if !unknown.is_empty() {
      unknown.sort_unstable();
      return Err(TrellisError::configuration(format!(
        "modules registered for unknown routes: {unknown:?}"
      )));
    }
    Ok(())
  }
}

/// State handed to the server entry to render a document.
#[derive(Debug)]
pub struct EntryContext {
  pub handoff: ServerHandoff,
  /// `handoff` as script-safe JSON text.
  pub handoff_string: String,
  /// Deferred values still pending; resolved out-of-band by the renderer.
  pub deferred: DeferredSet,
  /// Ids of the routes being rendered, outermost first.
  pub route_ids: Vec<String>,
}

/// Renders the document for a document request. Implemented by the
/// embedding rendering layer.
pub trait ServerEntry: Send + Sync {
  fn render(
    &self,
    request: Request,
    status: StatusCode,
    headers: HeaderMap,
    context: EntryContext,
  ) -> BoxFuture<Result<Response, TrellisError>>;
}
