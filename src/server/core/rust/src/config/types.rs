/* src/server/core/rust/src/config/types.rs */

use std::path::PathBuf;

use serde::Deserialize;

use crate::errors::TrellisError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrellisConfig {
  #[serde(default)]
  pub server: ServerSection,
  #[serde(default)]
  pub dev: DevSection,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
  #[default]
  Production,
  Development,
  Test,
}

impl ServerMode {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Production => "production",
      Self::Development => "development",
      Self::Test => "test",
    }
  }

  pub fn is_development(self) -> bool {
    self == Self::Development
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
  #[serde(default)]
  pub mode: ServerMode,
  #[serde(default = "default_port")]
  pub port: u16,
  /// URL prefix assets are served under; starts and ends with `/`.
  #[serde(default = "default_public_path")]
  pub public_path: String,
  /// Build output holding `asset-manifest.json` and `route-manifest.json`.
  /// Relative paths resolve against the config file's directory.
  #[serde(default = "default_build_dir")]
  pub build_dir: PathBuf,
  #[serde(default = "default_data_path")]
  pub data_path: String,
  #[serde(default = "default_manifest_path")]
  pub manifest_path: String,
}

impl Default for ServerSection {
  fn default() -> Self {
    Self {
      mode: ServerMode::default(),
      port: default_port(),
      public_path: default_public_path(),
      build_dir: default_build_dir(),
      data_path: default_data_path(),
      manifest_path: default_manifest_path(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevSection {
  /// Origin of the dev asset server, e.g. `http://localhost:8002`.
  pub origin: Option<String>,
}

fn default_port() -> u16 {
  3000
}

fn default_public_path() -> String {
  "/build/".to_string()
}

fn default_build_dir() -> PathBuf {
  PathBuf::from("build")
}

fn default_data_path() -> String {
  "/_internal/data".to_string()
}

fn default_manifest_path() -> String {
  "/_internal/manifest".to_string()
}

impl TrellisConfig {
  pub fn validate(&self) -> Result<(), TrellisError> {
    let server = &self.server;
    if !server.public_path.starts_with('/') || !server.public_path.ends_with('/') {
      return Err(TrellisError::configuration(format!(
        "server.public_path \"{}\" must start and end with \"/\"",
        server.public_path
      )));
    }
    for (key, path) in [("data_path", &server.data_path), ("manifest_path", &server.manifest_path)] {
      if !path.starts_with('/') {
        return Err(TrellisError::configuration(format!(
          "server.{key} \"{path}\" must start with \"/\""
        )));
      }
    }
    if server.data_path == server.manifest_path {
      return Err(TrellisError::configuration(format!(
        "server.data_path and server.manifest_path must differ (both \"{}\")",
        server.data_path
      )));
    }
    if server.mode.is_development() && self.dev.origin.is_none() {
      return Err(TrellisError::configuration("development mode requires dev.origin"));
    }
    Ok(())
  }

  pub fn dev_origin(&self) -> Option<&str> {
    self.dev.origin.as_deref()
  }
}
