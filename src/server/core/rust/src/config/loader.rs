/* src/server/core/rust/src/config/loader.rs */

use std::path::{Path, PathBuf};

use super::TrellisConfig;
use crate::errors::TrellisError;

pub const CONFIG_FILENAME: &str = "trellis.toml";

/// Walk upward from `start` to find `trellis.toml`, like Cargo.toml discovery
pub fn find_config(start: &Path) -> Result<PathBuf, TrellisError> {
  let mut dir = start.canonicalize().map_err(|e| {
    TrellisError::configuration(format!("failed to canonicalize {}: {e}", start.display()))
  })?;
  loop {
    let candidate = dir.join(CONFIG_FILENAME);
    if candidate.is_file() {
      return Ok(candidate);
    }
    if !dir.pop() {
      return Err(TrellisError::configuration(format!(
        "{CONFIG_FILENAME} not found (searched upward from {})",
        start.display()
      )));
    }
  }
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<TrellisConfig, TrellisError> {
  let config: TrellisConfig = toml::from_str(content)?;
  config.validate()?;
  Ok(config)
}

/// Load a config file, resolving a relative `build_dir` against its directory.
pub fn load_config(path: &Path) -> Result<TrellisConfig, TrellisError> {
  let content = std::fs::read_to_string(path).map_err(|e| {
    TrellisError::configuration(format!("failed to read {}: {e}", path.display()))
  })?;
  let mut config = parse_config(&content).map_err(|e| match e {
    TrellisError::Toml(err) => {
      TrellisError::configuration(format!("failed to parse {}: {err}", path.display()))
    }
    other => other,
  })?;
  if config.server.build_dir.is_relative()
    && let Some(base) = path.parent()
  {
    config.server.build_dir = base.join(&config.server.build_dir);
  }
  tracing::debug!(path = %path.display(), mode = config.server.mode.as_str(), "loaded config");
  Ok(config)
}
