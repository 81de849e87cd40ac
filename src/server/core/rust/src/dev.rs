/* src/server/core/rust/src/dev.rs */

use std::path::PathBuf;

use crate::build_loader::write_route_manifest;
use crate::errors::TrellisError;
use crate::http::BoxFuture;
use crate::route::{RouteDefinition, RouteManifest, RouteMatch};

/// Rebuilds server output on demand in development. Receives only the routes
/// a request matched, so a rebuild touches as little as possible.
pub trait DevBuilder: Send + Sync {
  fn rebuild(&self, routes: RouteManifest) -> BoxFuture<Result<(), TrellisError>>;
}

/// The matched chain as a standalone manifest, root first.
pub fn narrow_manifest(matches: &[RouteMatch]) -> Result<RouteManifest, TrellisError> {
  RouteManifest::from_routes(matches.iter().map(|m| RouteDefinition::clone(&m.route)))
}

/// Writes the narrowed route manifest into a cache directory for the
/// external bundler to pick up.
#[derive(Debug, Clone)]
pub struct ManifestWriter {
  build_dir: PathBuf,
}

impl ManifestWriter {
  pub fn new(build_dir: impl Into<PathBuf>) -> Self {
    Self { build_dir: build_dir.into() }
  }
}

impl DevBuilder for ManifestWriter {
  fn rebuild(&self, routes: RouteManifest) -> BoxFuture<Result<(), TrellisError>> {
    let build_dir = self.build_dir.clone();
    Box::pin(async move {
      write_route_manifest(&build_dir, &routes).await?;
      tracing::debug!(dir = %build_dir.display(), routes = routes.len(), "wrote dev route manifest");
      Ok(())
    })
  }
}
