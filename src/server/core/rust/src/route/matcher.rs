/* src/server/core/rust/src/route/matcher.rs */

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use percent_encoding::percent_decode_str;

use super::manifest::{RouteDefinition, RouteManifest};
use super::tree::{RouteNode, build_tree};
use crate::errors::TrellisError;

pub type Params = BTreeMap<String, String>;

/// Key under which a catch-all segment stores the unmatched suffix.
pub const SPLAT_PARAM: &str = "*";

/// One entry of a matched chain. `params` is cumulative: it holds every
/// parameter captured by this route and its ancestors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
  pub route: Arc<RouteDefinition>,
  pub params: Params,
  pub pathname: String,
}

impl RouteMatch {
  /// A match for a route that is not part of the manifest, used when the
  /// real chain is replaced by a not-found or error page.
  pub fn synthetic(id: &str, pathname: &str) -> Self {
    let mut route = RouteDefinition::new(id).path(pathname);
    route.has_error_boundary = true;
    Self { route: Arc::new(route), params: Params::new(), pathname: pathname.to_string() }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SegmentKind {
  Splat,
  Dynamic,
  Static,
}

#[derive(Debug, Clone)]
struct Segment {
  kind: SegmentKind,
  text: String,
  case_sensitive: bool,
}

impl Segment {
  fn parse(raw: &str, case_sensitive: bool) -> Self {
    let (kind, text) = if raw == SPLAT_PARAM {
      (SegmentKind::Splat, SPLAT_PARAM.to_string())
    } else if let Some(name) = raw.strip_prefix(':') {
      (SegmentKind::Dynamic, name.to_string())
    } else if case_sensitive {
      (SegmentKind::Static, raw.to_string())
    } else {
      (SegmentKind::Static, raw.to_lowercase())
    };
    Self { kind, text, case_sensitive }
  }
}

/// A root-to-node chain with the segments each node contributes.
#[derive(Debug, Clone)]
struct Branch {
  chain: Vec<(Arc<RouteDefinition>, Vec<Segment>)>,
  /// Preorder position; the final tie-break.
  order: usize,
}

impl Branch {
  fn kinds(&self) -> impl Iterator<Item = SegmentKind> + '_ {
    self.chain.iter().flat_map(|(_, segs)| segs.iter().map(|s| s.kind))
  }

  fn segment_count(&self) -> usize {
    self.chain.iter().map(|(_, segs)| segs.len()).sum()
  }
}

/// Higher rank first: segment-wise static > dynamic > splat; when one
/// branch's segments are a prefix of the other's the shorter one wins; equal
/// segments prefer the deeper chain (index routes over their bare parent);
/// then declaration order.
fn rank(a: &Branch, b: &Branch) -> Ordering {
  let mut ak = a.kinds();
  let mut bk = b.kinds();
  loop {
    match (ak.next(), bk.next()) {
      (Some(x), Some(y)) if x != y => return y.cmp(&x),
      (Some(_), Some(_)) => {}
      (None, Some(_)) => return Ordering::Less,
      (Some(_), None) => return Ordering::Greater,
      (None, None) => break,
    }
  }
  b.chain.len().cmp(&a.chain.len()).then(a.order.cmp(&b.order))
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
  path.split('/').filter(|s| !s.is_empty())
}

/// A request path segment: the raw text for `pathname`, the decoded text for
/// comparison and params.
struct PathSegment<'a> {
  raw: &'a str,
  decoded: Cow<'a, str>,
}

impl<'a> PathSegment<'a> {
  /// Segments that do not decode to UTF-8 are compared as written.
  fn new(raw: &'a str) -> Self {
    let decoded = percent_decode_str(raw).decode_utf8().unwrap_or(Cow::Borrowed(raw));
    Self { raw, decoded }
  }
}

fn collect_branches(
  nodes: &[RouteNode],
  prefix: &mut Vec<(Arc<RouteDefinition>, Vec<Segment>)>,
  out: &mut Vec<Branch>,
) {
  for node in nodes {
    let route = &node.route;
    let segments = if route.index {
      Vec::new()
    } else {
      split_path(route.path.as_deref().unwrap_or(""))
        .map(|raw| Segment::parse(raw, route.case_sensitive))
        .collect()
    };
    prefix.push((Arc::clone(route), segments));
    let order = out.len();
    out.push(Branch { chain: prefix.clone(), order });
    collect_branches(&node.children, prefix, out);
    prefix.pop();
  }
}

fn match_branch(branch: &Branch, segments: &[PathSegment<'_>]) -> Option<Vec<RouteMatch>> {
  let mut pos = 0;
  let mut params = Params::new();
  let mut matches = Vec::with_capacity(branch.chain.len());

  for (route, route_segments) in &branch.chain {
    for segment in route_segments {
      match segment.kind {
        SegmentKind::Splat => {
          let rest: Vec<&str> = segments[pos..].iter().map(|s| s.decoded.as_ref()).collect();
          params.insert(SPLAT_PARAM.to_string(), rest.join("/"));
          pos = segments.len();
        }
        SegmentKind::Dynamic => {
          let value = segments.get(pos)?;
          params.insert(segment.text.clone(), value.decoded.clone().into_owned());
          pos += 1;
        }
        SegmentKind::Static => {
          let value = &segments.get(pos)?.decoded;
          let equal = if segment.case_sensitive {
            *value == segment.text
          } else {
            value.to_lowercase() == segment.text
          };
          if !equal {
            return None;
          }
          pos += 1;
        }
      }
    }
    let raw: Vec<&str> = segments[..pos].iter().map(|s| s.raw).collect();
    let pathname = format!("/{}", raw.join("/"));
    matches.push(RouteMatch { route: Arc::clone(route), params: params.clone(), pathname });
  }

  (pos == segments.len()).then_some(matches)
}

/// Match `pathname` against a route tree. Returns the root-to-leaf chain of
/// the best-ranked branch that consumes the whole pathname, or `None`.
pub fn match_routes(roots: &[RouteNode], pathname: &str) -> Option<Vec<RouteMatch>> {
  let mut branches = Vec::new();
  collect_branches(roots, &mut Vec::new(), &mut branches);
  branches.sort_by(rank);
  match_ranked(&branches, pathname)
}

/// `pathname` is percent-encoded, as in a URL; each segment is decoded once
/// before comparison and the raw form is kept for `RouteMatch::pathname`.
fn match_ranked(branches: &[Branch], pathname: &str) -> Option<Vec<RouteMatch>> {
  let segments: Vec<PathSegment<'_>> = split_path(pathname).map(PathSegment::new).collect();
  branches.iter().find_map(|branch| {
    // Cheap reject before walking the chain.
    let has_splat = branch.kinds().any(|k| k == SegmentKind::Splat);
    if !has_splat && branch.segment_count() != segments.len() {
      return None;
    }
    match_branch(branch, &segments)
  })
}

/// A built route tree with its branches pre-ranked, shared read-only across
/// requests.
#[derive(Debug, Clone)]
pub struct RouteTree {
  roots: Vec<RouteNode>,
  branches: Vec<Branch>,
}

impl RouteTree {
  pub fn new(manifest: &RouteManifest) -> Result<Self, TrellisError> {
    Ok(Self::from_roots(build_tree(manifest)?))
  }

  pub fn from_roots(roots: Vec<RouteNode>) -> Self {
    let mut branches = Vec::new();
    collect_branches(&roots, &mut Vec::new(), &mut branches);
    branches.sort_by(rank);
    Self { roots, branches }
  }

  pub fn roots(&self) -> &[RouteNode] {
    &self.roots
  }

  pub fn match_path(&self, pathname: &str) -> Option<Vec<RouteMatch>> {
    match_ranked(&self.branches, pathname)
  }
}
