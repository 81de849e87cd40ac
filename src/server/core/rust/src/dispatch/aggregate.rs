/* src/server/core/rust/src/dispatch/aggregate.rs */

use http::{HeaderMap, StatusCode};

use crate::data::DataResult;
use crate::module::{HeadersArgs, ModuleRegistry};
use crate::route::RouteMatch;

/// Folded view of settled loader results, in root-to-leaf order with the
/// global loader first.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct Verdict {
  /// Position of the first redirect, if any.
  pub(super) redirect: Option<usize>,
  /// Status of the first non-200 result, if any.
  pub(super) status: Option<StatusCode>,
}

impl Verdict {
  fn observe(mut self, index: usize, result: &DataResult) -> Self {
    if self.redirect.is_none() && result.is_redirect() {
      self.redirect = Some(index);
    }
    let status = result.status();
    if self.status.is_none() && status != StatusCode::OK {
      self.status = Some(status);
    }
    self
  }

  /// Final status: the first non-200 result, else `initial`.
  pub(super) fn status_or(self, initial: StatusCode) -> StatusCode {
    self.status.unwrap_or(initial)
  }
}

pub(super) fn aggregate(results: &[DataResult]) -> Verdict {
  results.iter().enumerate().fold(Verdict::default(), |acc, (i, r)| acc.observe(i, r))
}

/// Fold route `headers` hooks root-to-leaf. Each hook sees its own loader's
/// headers and everything accumulated above it; names it returns replace the
/// ancestors' values. A failing hook is logged and skipped.
pub(super) fn fold_headers(
  matches: &[RouteMatch],
  results: &[DataResult],
  registry: &ModuleRegistry,
) -> HeaderMap {
  let no_headers = HeaderMap::new();
  matches.iter().zip(results).fold(HeaderMap::new(), |mut acc, (m, result)| {
    let Some(hook) = registry.get(&m.route.id).and_then(|module| module.headers.as_ref()) else {
      return acc;
    };
    let args = HeadersArgs {
      loader_headers: result.headers().unwrap_or(&no_headers),
      parent_headers: &acc,
    };
    match hook(args) {
      Ok(route_headers) => {
        for name in route_headers.keys() {
          acc.remove(name);
          for value in route_headers.get_all(name) {
            acc.append(name.clone(), value.clone());
          }
        }
      }
      Err(err) => {
        tracing::error!(route_id = %m.route.id, error = %err, "error getting headers for route");
      }
    }
    acc
  })
}
