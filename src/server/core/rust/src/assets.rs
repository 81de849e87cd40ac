/* src/server/core/rust/src/assets.rs */

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::TrellisError;

pub const ASSET_MANIFEST_FILENAME: &str = "asset-manifest.json";

/// Bundler output: a content version plus one record per entry point
/// (route ids, `entry-browser`, `global.css`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
  pub version: String,
  pub entries: BTreeMap<String, AssetEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
  pub file: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub imports: Vec<String>,
}

impl AssetManifest {
  pub fn get(&self, name: &str) -> Option<&AssetEntry> {
    self.entries.get(name)
  }
}

/// Read `asset-manifest.json` from a build directory.
pub async fn read_asset_manifest(build_dir: &Path) -> Result<AssetManifest, TrellisError> {
  let path = build_dir.join(ASSET_MANIFEST_FILENAME);
  let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
    TrellisError::configuration(format!("failed to read {}: {e}", path.display()))
  })?;
  Ok(serde_json::from_str(&content)?)
}

/// Fetch the live asset manifest served by the dev asset server.
pub async fn fetch_dev_asset_manifest(
  client: &reqwest::Client,
  origin: &str,
) -> Result<AssetManifest, TrellisError> {
  let url = format!("{}/{ASSET_MANIFEST_FILENAME}", origin.trim_end_matches('/'));
  let result = async {
    let response = client.get(&url).send().await?.error_for_status()?;
    response.json::<AssetManifest>().await
  }
  .await;

  result.map_err(|e| {
    tracing::error!(%url, error = %e, "unable to fetch the asset manifest; is the dev asset server running?");
    TrellisError::Fetch { url, message: e.to_string() }
  })
}

/// Where a request gets its asset manifest from.
#[derive(Debug, Clone)]
pub enum AssetSource {
  /// Loaded once at startup.
  Static(Arc<AssetManifest>),
  /// Re-read from the build directory on every request.
  BuildDir(PathBuf),
  /// Fetched from the dev asset server on every request.
  DevOrigin { client: reqwest::Client, origin: String },
}

impl AssetSource {
  pub fn dev_origin(origin: impl Into<String>) -> Self {
    Self::DevOrigin { client: reqwest::Client::new(), origin: origin.into() }
  }

  pub async fn load(&self) -> Result<Arc<AssetManifest>, TrellisError> {
    match self {
      Self::Static(manifest) => Ok(manifest.clone()),
      Self::BuildDir(dir) => read_asset_manifest(dir).await.map(Arc::new),
      Self::DevOrigin { client, origin } => fetch_dev_asset_manifest(client, origin).await.map(Arc::new),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn reads_manifest_from_build_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join(ASSET_MANIFEST_FILENAME),
      r#"{
        "version": "a1b2c3",
        "entries": {
          "entry-browser": { "file": "entry-browser-4f2a.js", "imports": ["chunk-1.js"] },
          "routes/posts": { "file": "routes/posts-9c1d.js" }
        }
      }"#,
    )
    .unwrap();

    let manifest = read_asset_manifest(dir.path()).await.unwrap();
    assert_eq!(manifest.version, "a1b2c3");
    assert_eq!(manifest.get("entry-browser").unwrap().imports, ["chunk-1.js"]);
    assert!(manifest.get("routes/posts").unwrap().imports.is_empty());
  }

  #[tokio::test]
  async fn build_dir_source_rereads_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(ASSET_MANIFEST_FILENAME);
    let source = AssetSource::BuildDir(dir.path().to_path_buf());

    std::fs::write(&path, r#"{"version": "1", "entries": {}}"#).unwrap();
    assert_eq!(source.load().await.unwrap().version, "1");
    std::fs::write(&path, r#"{"version": "2", "entries": {}}"#).unwrap();
    assert_eq!(source.load().await.unwrap().version, "2");
  }

  #[tokio::test]
  async fn static_source_shares_manifest() {
    let manifest = Arc::new(AssetManifest { version: "s".into(), entries: BTreeMap::new() });
    let source = AssetSource::Static(manifest.clone());
    assert!(Arc::ptr_eq(&source.load().await.unwrap(), &manifest));
  }

  #[tokio::test]
  async fn missing_manifest_is_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_asset_manifest(dir.path()).await.unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");
  }

  #[tokio::test]
  async fn malformed_manifest_is_json_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(ASSET_MANIFEST_FILENAME), "{\"version\": 1}").unwrap();
    assert!(matches!(read_asset_manifest(dir.path()).await, Err(TrellisError::Json(_))));
  }

  #[tokio::test]
  async fn unreachable_dev_origin_is_fetch_error() {
    let client = reqwest::Client::new();
    // port 9 (discard) on loopback is closed in test environments
    let err = fetch_dev_asset_manifest(&client, "http://127.0.0.1:9/").await.unwrap_err();
    match err {
      TrellisError::Fetch { url, .. } => assert_eq!(url, "http://127.0.0.1:9/asset-manifest.json"),
      other => panic!("expected fetch error, got {other:?}"),
    }
  }
}
