/* src/server/core/rust/src/build_loader/types.rs */

use serde::{Deserialize, Serialize};

use crate::route::RouteManifest;

/// On-disk shape of `route-manifest.json`. Routes are a list so sibling
/// order survives the round trip.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RouteManifestFile {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub(super) version: Option<String>,
  pub(super) routes: RouteManifest,
}
