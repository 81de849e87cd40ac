/* src/server/core/rust/src/build_loader/mod.rs */

mod types;

use std::path::Path;

use crate::errors::TrellisError;
use crate::route::{RouteManifest, build_tree};
use types::RouteManifestFile;

pub const ROUTE_MANIFEST_FILENAME: &str = "route-manifest.json";

/// Load `route-manifest.json` from a build directory and check that it
/// forms a valid tree.
pub fn load_route_manifest(build_dir: &Path) -> Result<RouteManifest, TrellisError> {
  let path = build_dir.join(ROUTE_MANIFEST_FILENAME);
  let content = std::fs::read_to_string(&path).map_err(|e| {
    TrellisError::configuration(format!("failed to read {}: {e}", path.display()))
  })?;
  let file: RouteManifestFile = serde_json::from_str(&content).map_err(|e| {
    TrellisError::configuration(format!("failed to parse {}: {e}", path.display()))
  })?;
  build_tree(&file.routes)?;
  tracing::info!(
    path = %path.display(),
    routes = file.routes.len(),
    version = file.version.as_deref().unwrap_or("-"),
    "loaded route manifest"
  );
  Ok(file.routes)
}

/// Write a route manifest in the format `load_route_manifest` reads.
pub async fn write_route_manifest(
  build_dir: &Path,
  routes: &RouteManifest,
) -> Result<(), TrellisError> {
  tokio::fs::create_dir_all(build_dir).await?;
  let file = RouteManifestFile { version: None, routes: routes.clone() };
  let json = serde_json::to_vec_pretty(&file)?;
  tokio::fs::write(build_dir.join(ROUTE_MANIFEST_FILENAME), json).await?;
  Ok(())
}
