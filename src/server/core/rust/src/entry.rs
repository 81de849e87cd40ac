/* src/server/core/rust/src/entry.rs */

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::assets::AssetManifest;
use crate::errors::TrellisError;
use crate::module::ModuleRegistry;
use crate::route::{Params, RouteMatch};

/// Asset entry holding the client bootstrap module.
pub const ENTRY_BROWSER: &str = "entry-browser";
/// Optional app-wide stylesheet entry.
pub const GLOBAL_STYLES: &str = "global.css";

fn is_false(b: &bool) -> bool {
  !*b
}

/// Per-route metadata shipped to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryRoute {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(default, skip_serializing_if = "is_false")]
  pub index: bool,
  #[serde(default, skip_serializing_if = "is_false")]
  pub case_sensitive: bool,
  pub has_loader: bool,
  pub has_action: bool,
  pub has_error_boundary: bool,
  pub has_catch_boundary: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub module_url: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub imports: Vec<String>,
}

/// Versioned route and asset metadata. The manifest endpoint sends only
/// `version` and `routes`; documents fill in the entry urls as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryManifest {
  pub version: String,
  pub routes: BTreeMap<String, EntryRoute>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entry_module_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub global_loader_url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub global_styles_url: Option<String>,
}

/// A matched route as the client sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMatch {
  pub route_id: String,
  pub params: Params,
  pub pathname: String,
}

/// Build per-route entries for the matched chain only.
pub fn create_route_manifest(
  matches: &[RouteMatch],
  registry: &ModuleRegistry,
  assets: &AssetManifest,
  public_path: &str,
) -> BTreeMap<String, EntryRoute> {
  let mut routes = BTreeMap::new();
  for m in matches {
    let route = &m.route;
    let module = registry.get(&route.id);
    let asset = assets.get(&route.id);
    let entry = EntryRoute {
      id: route.id.clone(),
      parent_id: route.parent_id.clone(),
      path: route.path.clone(),
      index: route.index,
      case_sensitive: route.case_sensitive,
      has_loader: route.has_loader || module.is_some_and(|m| m.loader.is_some()),
      has_action: route.has_action || module.is_some_and(|m| m.action.is_some()),
      // default boundaries live at the root
      has_error_boundary: route.has_error_boundary || route.is_root(),
      has_catch_boundary: route.has_catch_boundary || route.is_root(),
      module_url: asset.map(|a| format!("{public_path}{}", a.file)),
      imports: asset
        .map(|a| a.imports.iter().map(|i| format!("{public_path}{i}")).collect())
        .unwrap_or_default(),
    };
    routes.insert(route.id.clone(), entry);
  }
  routes
}

/// Routes only; what the manifest endpoint returns.
pub fn create_partial_manifest(
  matches: &[RouteMatch],
  registry: &ModuleRegistry,
  assets: &AssetManifest,
  public_path: &str,
) -> EntryManifest {
  EntryManifest {
    version: assets.version.clone(),
    routes: create_route_manifest(matches, registry, assets, public_path),
    entry_module_url: None,
    global_loader_url: None,
    global_styles_url: None,
  }
}

/// Full manifest for a document. The asset manifest must contain the
/// `entry-browser` entry; `global_loader_url` is set only when a global
/// loader is registered.
pub fn create_entry_manifest(
  matches: &[RouteMatch],
  registry: &ModuleRegistry,
  assets: &AssetManifest,
  public_path: &str,
  data_path: &str,
) -> Result<EntryManifest, TrellisError> {
  let entry = assets.get(ENTRY_BROWSER).ok_or_else(|| {
    TrellisError::configuration(format!("asset manifest has no \"{ENTRY_BROWSER}\" entry"))
  })?;

  Ok(EntryManifest {
    entry_module_url: Some(format!("{public_path}{}", entry.file)),
    global_loader_url: registry.global().map(|_| data_path.to_string()),
    global_styles_url: assets.get(GLOBAL_STYLES).map(|a| format!("{public_path}{}", a.file)),
    ..create_partial_manifest(matches, registry, assets, public_path)
  })
}

pub fn create_entry_matches(matches: &[RouteMatch]) -> Vec<EntryMatch> {
  matches
    .iter()
    .map(|m| EntryMatch {
      route_id: m.route.id.clone(),
      params: m.params.clone(),
      pathname: m.pathname.clone(),
    })
    .collect()
}
