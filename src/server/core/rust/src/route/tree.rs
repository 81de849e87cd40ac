/* src/server/core/rust/src/route/tree.rs */

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::manifest::{RouteDefinition, RouteManifest};
use crate::errors::TrellisError;

/// A route plus its children, in manifest order. Immutable once built and
/// shared read-only across requests.
#[derive(Debug, Clone)]
pub struct RouteNode {
  pub route: Arc<RouteDefinition>,
  pub children: Vec<RouteNode>,
}

impl RouteNode {
  pub fn id(&self) -> &str {
    &self.route.id
  }
}

/// Nest the flat manifest by parent id. Roots are routes without a parent.
///
/// Every manifest entry must end up attached; orphans (unknown parent) and
/// parent cycles are reported as configuration errors.
pub fn build_tree(manifest: &RouteManifest) -> Result<Vec<RouteNode>, TrellisError> {
  let mut buckets: HashMap<&str, Vec<&Arc<RouteDefinition>>> = HashMap::new();
  for route in manifest.iter() {
    let parent = route.parent_id.as_deref().unwrap_or("");
    buckets.entry(parent).or_default().push(route);
  }

  let mut visited = HashSet::new();
  let roots = attach(&buckets, "", &mut visited)?;

  if visited.len() != manifest.len() {
    let detached: Vec<&str> = manifest.ids().filter(|id| !visited.contains(id)).collect();
    let first = detached[0];
    let reason = match manifest.get(first).and_then(|r| r.parent_id.as_deref()) {
      Some(parent) if !manifest.contains(parent) => format!("unknown parent \"{parent}\""),
      _ => "parent chain forms a cycle".to_string(),
    };
    return Err(TrellisError::configuration(format!(
      "route \"{first}\" is not reachable from a root route ({reason}); detached: {detached:?}"
    )));
  }

  Ok(roots)
}

fn attach<'a>(
  buckets: &HashMap<&str, Vec<&'a Arc<RouteDefinition>>>,
  parent_id: &str,
  visited: &mut HashSet<&'a str>,
) -> Result<Vec<RouteNode>, TrellisError> {
  let Some(routes) = buckets.get(parent_id) else {
    return Ok(Vec::new());
  };

  let mut nodes = Vec::with_capacity(routes.len());
  for &route in routes {
    if !visited.insert(route.id.as_str()) {
      return Err(TrellisError::configuration(format!("route \"{}\" visited twice", route.id)));
    }
    let children = attach(buckets, &route.id, visited)?;
    if route.index && !children.is_empty() {
      return Err(TrellisError::configuration(format!(
        "index route \"{}\" cannot have children",
        route.id
      )));
    }
    nodes.push(RouteNode { route: Arc::clone(route), children });
  }
  Ok(nodes)
}
