/* src/server/core/rust/src/route/manifest.rs */

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::TrellisError;

/// One route as declared in the flat manifest.
///
/// Ids are slash-segment paths from the app root (`routes/posts/$id`). The
/// `path` pattern is relative to the parent; index routes render at their
/// parent's path and ignore `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDefinition {
  pub id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub parent_id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub path: Option<String>,
  #[serde(default)]
  pub index: bool,
  #[serde(default)]
  pub case_sensitive: bool,
  #[serde(default)]
  pub has_loader: bool,
  #[serde(default)]
  pub has_action: bool,
  #[serde(default)]
  pub has_error_boundary: bool,
  #[serde(default)]
  pub has_catch_boundary: bool,
}

impl RouteDefinition {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      parent_id: None,
      path: None,
      index: false,
      case_sensitive: false,
      has_loader: false,
      has_action: false,
      has_error_boundary: false,
      has_catch_boundary: false,
    }
  }

  #[must_use]
  pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
    self.parent_id = Some(parent_id.into());
    self
  }

  #[must_use]
  pub fn path(mut self, path: impl Into<String>) -> Self {
    self.path = Some(path.into());
    self
  }

  #[must_use]
  pub fn index(mut self) -> Self {
    self.index = true;
    self
  }

  #[must_use]
  pub fn case_sensitive(mut self) -> Self {
    self.case_sensitive = true;
    self
  }

  #[must_use]
  pub fn with_loader(mut self) -> Self {
    self.has_loader = true;
    self
  }

  #[must_use]
  pub fn with_action(mut self) -> Self {
    self.has_action = true;
    self
  }

  #[must_use]
  pub fn with_error_boundary(mut self) -> Self {
    self.has_error_boundary = true;
    self
  }

  pub fn is_root(&self) -> bool {
    self.parent_id.is_none()
  }
}

/// Flat, parent-indexed route registry. Iteration order is insertion order,
/// which decides sibling priority when match ranks tie.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<RouteDefinition>", into = "Vec<RouteDefinition>")]
pub struct RouteManifest {
  routes: Vec<Arc<RouteDefinition>>,
  by_id: HashMap<String, usize>,
}

impl RouteManifest {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn from_routes(routes: impl IntoIterator<Item = RouteDefinition>) -> Result<Self, TrellisError> {
    let mut manifest = Self::new();
    for route in routes {
      manifest.insert(route)?;
    }
    Ok(manifest)
  }

  pub fn insert(&mut self, route: RouteDefinition) -> Result<(), TrellisError> {
    if self.by_id.contains_key(&route.id) {
      return Err(TrellisError::configuration(format!("duplicate route id \"{}\"", route.id)));
    }
    self.by_id.insert(route.id.clone(), self.routes.len());
    self.routes.push(Arc::new(route));
    Ok(())
  }

  pub fn get(&self, id: &str) -> Option<&Arc<RouteDefinition>> {
    self.by_id.get(id).map(|&i| &self.routes[i])
  }

  pub fn contains(&self, id: &str) -> bool {
    self.by_id.contains_key(id)
  }

  pub fn iter(&self) -> impl Iterator<Item = &Arc<RouteDefinition>> {
    self.routes.iter()
  }

  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.routes.iter().map(|r| r.id.as_str())
  }

  pub fn len(&self) -> usize {
    self.routes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.routes.is_empty()
  }
}

impl TryFrom<Vec<RouteDefinition>> for RouteManifest {
  type Error = TrellisError;

  fn try_from(routes: Vec<RouteDefinition>) -> Result<Self, Self::Error> {
    Self::from_routes(routes)
  }
}

impl From<RouteManifest> for Vec<RouteDefinition> {
  fn from(manifest: RouteManifest) -> Self {
    manifest.routes.iter().map(|r| RouteDefinition::clone(r)).collect()
  }
}
