/* src/server/core/rust/src/handoff.rs */

// Turns loader values into the JSON snapshot the client rehydrates from.
//
// Unrepresentable leaves (undefined, functions, opaque values) become `null`
// inside arrays so positions survive, and are dropped entirely as object
// keys. Deferred values are replaced by a `{"$deferred": id}` marker and
// streamed later through `DeferredSet::into_stream`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::SecondsFormat;
use futures_util::StreamExt;
use futures_util::future::join_all;
use futures_util::stream::{self, FuturesUnordered};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::entry::{EntryManifest, EntryMatch, create_entry_matches};
use crate::errors::TrellisError;
use crate::escape::escape_json_for_script;
use crate::http::{BoxFuture, BoxStream};
use crate::route::RouteMatch;
use crate::value::{Deferred, ToHandoff, Value};

/// Nesting limit for the value walk. Deeper positions hold an error marker.
pub const MAX_DEPTH: usize = 128;

/// Upper bound on positions visited by one walk.
pub const MAX_NODES: usize = 100_000;

pub const DEFERRED_MARKER: &str = "$deferred";
pub const ERROR_MARKER: &str = "$error";

const DEPTH_EXCEEDED: &str = "max depth exceeded";
const SIZE_EXCEEDED: &str = "max size exceeded";
const CYCLE_DETECTED: &str = "cycle detected";

fn marker(key: &str, value: impl Into<Json>) -> Json {
  let mut map = Map::new();
  map.insert(key.to_string(), value.into());
  Json::Object(map)
}

/// Deferred values found while serializing, in discovery order.
#[derive(Debug, Default)]
pub struct DeferredSet {
  next_id: usize,
  pending: Vec<(String, Deferred)>,
}

impl DeferredSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.pending.len()
  }

  pub fn is_empty(&self) -> bool {
    self.pending.is_empty()
  }

  pub fn ids(&self) -> impl Iterator<Item = &str> {
    self.pending.iter().map(|(id, _)| id.as_str())
  }

  fn register(&mut self, deferred: Deferred) -> String {
    let id = self.next_id.to_string();
    self.next_id += 1;
    self.pending.push((id.clone(), deferred));
    id
  }

  /// Resolve every pending value, yielding chunks in completion order.
  /// Deferred values nested inside a resolved value get fresh ids and are
  /// streamed by the same stream.
  pub fn into_stream(self) -> BoxStream<DeferredChunk> {
    let inflight: FuturesUnordered<BoxFuture<(String, Result<Value, String>)>> =
      self.pending.into_iter().map(|(id, d)| settle_one(id, d)).collect();

    Box::pin(stream::unfold((inflight, self.next_id), |(mut inflight, next_id)| async move {
      let (id, result) = inflight.next().await?;
      let mut nested = DeferredSet { next_id, pending: Vec::new() };
      let result = result.map(|value| to_json(&value, &mut nested));
      for (nested_id, d) in nested.pending {
        inflight.push(settle_one(nested_id, d));
      }
      Some((DeferredChunk { id, result }, (inflight, nested.next_id)))
    }))
  }
}

fn settle_one(id: String, deferred: Deferred) -> BoxFuture<(String, Result<Value, String>)> {
  Box::pin(async move {
    let result = deferred.resolve().await;
    (id, result)
  })
}

/// One resolved deferred value.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredChunk {
  pub id: String,
  pub result: Result<Json, String>,
}

impl DeferredChunk {
  /// `{"id", "value"}` on success, `{"id", "error"}` on failure.
  pub fn to_json(&self) -> Json {
    let mut map = Map::new();
    map.insert("id".into(), Json::String(self.id.clone()));
    match &self.result {
      Ok(value) => map.insert("value".into(), value.clone()),
      Err(message) => map.insert("error".into(), Json::String(message.clone())),
    };
    Json::Object(map)
  }
}

/// Identity of a custom node, used to spot a node that serializes into
/// itself.
fn node_addr(custom: &Arc<dyn ToHandoff>) -> usize {
  Arc::as_ptr(custom).cast::<()>().addr()
}

/// One synchronous walk. `path` holds the custom nodes currently being
/// expanded; `visited` bounds the total work so graphs that allocate fresh
/// nodes on every expansion still terminate.
struct Walk<'a> {
  deferred: &'a mut DeferredSet,
  path: Vec<usize>,
  visited: usize,
  truncated: bool,
}

impl Walk<'_> {
  fn truncate(&mut self, reason: &'static str) -> Json {
    if !self.truncated {
      self.truncated = true;
      tracing::warn!(max_depth = MAX_DEPTH, max_nodes = MAX_NODES, reason, "truncating handoff value");
    }
    marker(ERROR_MARKER, reason)
  }

  fn value(&mut self, value: &Value, depth: usize) -> Option<Json> {
    if depth > MAX_DEPTH {
      return Some(self.truncate(DEPTH_EXCEEDED));
    }
    self.visited += 1;
    if self.visited > MAX_NODES {
      return Some(self.truncate(SIZE_EXCEEDED));
    }
    match value {
      Value::Undefined | Value::Function(_) | Value::Opaque(_) => None,
      Value::Null => Some(Json::Null),
      Value::Bool(b) => Some(Json::Bool(*b)),
      Value::Number(n) => Some(Json::Number(n.clone())),
      Value::String(s) => Some(Json::String(s.clone())),
      Value::Date(d) => Some(Json::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))),
      Value::Array(items) => Some(Json::Array(
        items.iter().map(|item| self.value(item, depth + 1).unwrap_or(Json::Null)).collect(),
      )),
      Value::Object(entries) => {
        let mut map = Map::new();
        for (key, item) in entries {
          if let Some(json) = self.value(item, depth + 1) {
            map.insert(key.clone(), json);
          }
        }
        Some(Json::Object(map))
      }
      Value::Custom(custom) => {
        let addr = node_addr(custom);
        if self.path.contains(&addr) {
          return Some(marker(ERROR_MARKER, CYCLE_DETECTED));
        }
        self.path.push(addr);
        let json = self.value(&custom.to_handoff(), depth + 1);
        self.path.pop();
        json
      }
      Value::Deferred(d) => Some(marker(DEFERRED_MARKER, self.deferred.register(d.clone()))),
    }
  }
}

/// Walk a top-level value. An unrepresentable top level becomes `null`.
pub fn to_json(value: &Value, deferred: &mut DeferredSet) -> Json {
  let mut walk = Walk { deferred, path: Vec::new(), visited: 0, truncated: false };
  walk.value(value, 0).unwrap_or(Json::Null)
}

/// Nodes expanded by one `settle`, shared between its concurrent branches.
#[derive(Clone, Default)]
struct Budget(Arc<AtomicUsize>);

impl Budget {
  fn spend(&self) -> bool {
    self.0.fetch_add(1, Ordering::Relaxed) < MAX_NODES
  }
}

fn settle(value: Value, depth: usize, path: Vec<usize>, budget: Budget) -> BoxFuture<Value> {
  Box::pin(async move {
    if depth > MAX_DEPTH {
      return Value::object([(ERROR_MARKER, DEPTH_EXCEEDED)]);
    }
    if !budget.spend() {
      return Value::object([(ERROR_MARKER, SIZE_EXCEEDED)]);
    }
    match value {
      Value::Array(items) => Value::Array(
        join_all(items.into_iter().map(|item| settle(item, depth + 1, path.clone(), budget.clone())))
          .await,
      ),
      Value::Object(entries) => {
        let (keys, items): (Vec<String>, Vec<Value>) = entries.into_iter().unzip();
        let items =
          join_all(items.into_iter().map(|item| settle(item, depth + 1, path.clone(), budget.clone())))
            .await;
        Value::Object(keys.into_iter().zip(items).collect())
      }
      Value::Custom(custom) => {
        let addr = node_addr(&custom);
        if path.contains(&addr) {
          return Value::object([(ERROR_MARKER, CYCLE_DETECTED)]);
        }
        let mut path = path;
        path.push(addr);
        // `custom` outlives the expansion so its address stays unique on the path
        let settled = settle(custom.to_handoff(), depth + 1, path, budget).await;
        drop(custom);
        settled
      }
      Value::Deferred(d) => match d.resolve().await {
        Ok(resolved) => settle(resolved, depth + 1, path, budget).await,
        Err(message) => Value::object([(ERROR_MARKER, message)]),
      },
      other => other,
    }
  })
}

/// Walk a value with every deferred awaited and inlined. Used where there is
/// no side channel to stream them through (data requests).
pub async fn resolve_inline(value: &Value) -> Json {
  let settled = settle(value.clone(), 0, Vec::new(), Budget::default()).await;
  to_json(&settled, &mut DeferredSet::new())
}

/// Client-consumable snapshot of one document request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHandoff {
  pub global_data: Json,
  pub manifest: EntryManifest,
  pub matches: Vec<EntryMatch>,
  pub route_data: BTreeMap<String, Json>,
}

/// A serialized handoff plus the deferred values it refers to.
#[derive(Debug)]
pub struct Handoff {
  pub server: ServerHandoff,
  pub deferred: DeferredSet,
}

/// Build the handoff. `route_data[i]` belongs to `matches[i]`; missing
/// entries serialize as `null`. Never blocks on deferred values.
pub fn serialize(
  matches: &[RouteMatch],
  global_data: &Value,
  route_data: &[Value],
  manifest: EntryManifest,
) -> Handoff {
  let mut deferred = DeferredSet::new();
  let global_data = to_json(global_data, &mut deferred);
  let route_data = matches
    .iter()
    .enumerate()
    .map(|(i, m)| {
      let json = route_data.get(i).map_or(Json::Null, |v| to_json(v, &mut deferred));
      (m.route.id.clone(), json)
    })
    .collect();

  Handoff {
    server: ServerHandoff {
      global_data,
      manifest,
      matches: create_entry_matches(matches),
      route_data,
    },
    deferred,
  }
}

/// The handoff as JSON text safe to place inside a `<script>` element.
pub fn handoff_string(handoff: &ServerHandoff) -> Result<String, TrellisError> {
  Ok(escape_json_for_script(&serde_json::to_string(handoff)?))
}

#[cfg(test)]
mod tests {
  use std::sync::Weak;
  use std::time::Duration;

  use chrono::{TimeZone, Utc};
  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;
  use crate::route::{RouteDefinition, RouteManifest, RouteTree};

  fn json_of(value: &Value) -> Json {
    to_json(value, &mut DeferredSet::new())
  }

  fn empty_manifest() -> EntryManifest {
    EntryManifest {
      version: "v1".into(),
      routes: BTreeMap::new(),
      entry_module_url: None,
      global_loader_url: None,
      global_styles_url: None,
    }
  }

  fn post_matches() -> Vec<RouteMatch> {
    let manifest = RouteManifest::from_routes([
      RouteDefinition::new("root").path("/"),
      RouteDefinition::new("routes/posts/$id").parent("root").path("posts/:id"),
    ])
    .unwrap();
    RouteTree::new(&manifest).unwrap().match_path("/posts/7").unwrap()
  }

  #[test]
  fn arrays_keep_positions_objects_drop_keys() {
    let array = Value::array([Value::Undefined, Value::function("onClick")]);
    assert_eq!(json_of(&array), json!([null, null]));

    let object = Value::object([("a", Value::Undefined), ("b", Value::function("onClick"))]);
    assert_eq!(json_of(&object), json!({}));
  }

  #[test]
  fn opaque_values_follow_the_same_asymmetry() {
    let value = Value::object([
      ("tags", Value::array([Value::from("x"), Value::Opaque("sym".into())])),
      ("token", Value::Opaque("sym".into())),
      ("n", Value::Null),
    ]);
    assert_eq!(json_of(&value), json!({"tags": ["x", null], "n": null}));
  }

  #[test]
  fn dates_become_iso_strings() {
    let date = Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap();
    assert_eq!(json_of(&Value::object([("at", date)])), json!({"at": "2021-01-02T03:04:05.000Z"}));
  }

  #[derive(Debug)]
  struct Money(i64);

  impl ToHandoff for Money {
    fn to_handoff(&self) -> Value {
      Value::from(format!("${}.{:02}", self.0 / 100, self.0 % 100))
    }
  }

  #[test]
  fn custom_serialization_hook_is_used() {
    assert_eq!(json_of(&Value::array([Value::custom(Money(1250))])), json!(["$12.50"]));
  }

  // A graph node whose serialized form contains itself.
  #[derive(Debug)]
  struct Ouroboros;

  impl ToHandoff for Ouroboros {
    fn to_handoff(&self) -> Value {
      Value::object([("next", Value::custom(Ouroboros))])
    }
  }

  #[test]
  fn cyclic_graph_stops_at_depth_guard() {
    let json = json_of(&Value::custom(Ouroboros));
    let mut cursor = &json;
    let mut levels = 0;
    while let Some(next) = cursor.get("next") {
      cursor = next;
      levels += 1;
    }
    assert_eq!(cursor, &json!({"$error": "max depth exceeded"}));
    assert!(levels > 10 && levels <= MAX_DEPTH, "{levels}");
  }

  // A doubly linked node whose neighbours are both itself.
  #[derive(Debug)]
  struct Link {
    this: Weak<Link>,
  }

  impl ToHandoff for Link {
    fn to_handoff(&self) -> Value {
      let Some(this) = self.this.upgrade() else { return Value::Null };
      let this: Arc<dyn ToHandoff> = this;
      Value::object([("prev", Value::Custom(this.clone())), ("next", Value::Custom(this))])
    }
  }

  fn self_linked() -> Value {
    Value::Custom(Arc::new_cyclic(|this| Link { this: this.clone() }))
  }

  #[test]
  fn two_way_self_reference_is_marked() {
    assert_eq!(
      json_of(&self_linked()),
      json!({"prev": {"$error": "cycle detected"}, "next": {"$error": "cycle detected"}})
    );
  }

  #[tokio::test]
  async fn two_way_self_reference_is_marked_inline() {
    assert_eq!(
      resolve_inline(&Value::array([self_linked()])).await,
      json!([{"prev": {"$error": "cycle detected"}, "next": {"$error": "cycle detected"}}])
    );
  }

  // Allocates two fresh nodes per expansion, so no address ever repeats.
  #[derive(Debug)]
  struct Fork;

  impl ToHandoff for Fork {
    fn to_handoff(&self) -> Value {
      Value::object([("prev", Value::custom(Fork)), ("next", Value::custom(Fork))])
    }
  }

  #[test]
  fn branching_graph_stops_at_size_guard() {
    let text = json_of(&Value::custom(Fork)).to_string();
    assert!(text.contains(SIZE_EXCEEDED));
  }

  #[tokio::test]
  async fn branching_graph_stops_at_size_guard_inline() {
    let text = resolve_inline(&Value::custom(Fork)).await.to_string();
    assert!(text.contains(SIZE_EXCEEDED));
  }

  #[test]
  fn deep_arrays_are_truncated_not_overflowed() {
    let mut value = Value::from(1);
    for _ in 0..(MAX_DEPTH + 10) {
      value = Value::array([value]);
    }
    let text = json_of(&value).to_string();
    assert!(text.contains(DEPTH_EXCEEDED));
  }

  #[test]
  fn deferred_values_become_markers_without_blocking() {
    let never = Deferred::new(std::future::pending());
    let mut set = DeferredSet::new();
    let json = to_json(&Value::object([("slow", Value::from(never)), ("fast", Value::from(1))]), &mut set);
    assert_eq!(json, json!({"slow": {"$deferred": "0"}, "fast": 1}));
    assert_eq!(set.ids().collect::<Vec<_>>(), ["0"]);
  }

  #[tokio::test]
  async fn deferred_stream_resolves_nested_and_failed_values() {
    let slow = Deferred::new(async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(Value::from("slow"))
    });
    let outer = Deferred::resolved(Value::object([("inner", Deferred::resolved(Value::from(1)))]));
    let failing = Deferred::new(async { Err(anyhow::anyhow!("reviews service down")) });

    let data = Value::object([("a", slow), ("b", outer), ("c", failing)]);
    let matches = post_matches();
    let handoff = serialize(&matches, &Value::Null, &[Value::Null, data], empty_manifest());
    assert_eq!(
      handoff.server.route_data["routes/posts/$id"],
      json!({"a": {"$deferred": "0"}, "b": {"$deferred": "1"}, "c": {"$deferred": "2"}})
    );

    let chunks: Vec<DeferredChunk> = handoff.deferred.into_stream().collect().await;
    assert_eq!(chunks.len(), 4);
    assert_eq!(chunks.last().map(|c| c.id.as_str()), Some("0"));

    let by_id: BTreeMap<&str, &Result<Json, String>> =
      chunks.iter().map(|c| (c.id.as_str(), &c.result)).collect();
    assert_eq!(by_id["0"], &Ok(json!("slow")));
    assert_eq!(by_id["1"], &Ok(json!({"inner": {"$deferred": "3"}})));
    assert_eq!(by_id["2"], &Err("reviews service down".to_string()));
    assert_eq!(by_id["3"], &Ok(json!(1)));
  }

  #[test]
  fn chunk_json_shape() {
    let ok = DeferredChunk { id: "4".into(), result: Ok(json!([1])) };
    let err = DeferredChunk { id: "5".into(), result: Err("nope".into()) };
    assert_eq!(ok.to_json(), json!({"id": "4", "value": [1]}));
    assert_eq!(err.to_json(), json!({"id": "5", "error": "nope"}));
  }

  #[tokio::test]
  async fn resolve_inline_awaits_deferreds() {
    let value = Value::object([
      ("user", Value::from(Deferred::resolved(Value::object([("name", "ada")])))),
      ("broken", Value::from(Deferred::new(async { Err(anyhow::anyhow!("timeout")) }))),
      ("skip", Value::function("f")),
    ]);
    assert_eq!(
      resolve_inline(&value).await,
      json!({"user": {"name": "ada"}, "broken": {"$error": "timeout"}})
    );
  }

  #[test]
  fn handoff_round_trips() {
    let date = Utc.with_ymd_and_hms(2020, 5, 6, 7, 8, 9).unwrap();
    let matches = post_matches();
    let route_data = [
      Value::object([("user", Value::from("ada")), ("gone", Value::Undefined)]),
      Value::object([("id", Value::from(7)), ("published", Value::from(date))]),
    ];
    let handoff = serialize(&matches, &Value::object([("theme", "dark")]), &route_data, empty_manifest());
    assert!(handoff.deferred.is_empty());

    let text = serde_json::to_string(&handoff.server).unwrap();
    let parsed: ServerHandoff = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, handoff.server);

    let ids: Vec<&str> = parsed.matches.iter().map(|m| m.route_id.as_str()).collect();
    assert_eq!(ids, ["root", "routes/posts/$id"]);
    assert_eq!(parsed.matches[1].params["id"], "7");
    assert_eq!(parsed.global_data, json!({"theme": "dark"}));
    assert_eq!(parsed.route_data["root"], json!({"user": "ada"}));
    assert_eq!(
      parsed.route_data["routes/posts/$id"],
      json!({"id": 7, "published": "2020-05-06T07:08:09.000Z"})
    );
  }

  #[test]
  fn missing_route_data_is_null() {
    let handoff = serialize(&post_matches(), &Value::Undefined, &[], empty_manifest());
    assert_eq!(handoff.server.global_data, Json::Null);
    assert_eq!(handoff.server.route_data["root"], Json::Null);
  }

  #[test]
  fn handoff_string_is_script_safe() {
    let handoff = serialize(
      &post_matches(),
      &Value::from("</script><script>alert(1)</script>"),
      &[],
      empty_manifest(),
    );
    let text = handoff_string(&handoff.server).unwrap();
    assert!(!text.contains("</script>"));
    let parsed: ServerHandoff = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed.global_data, json!("</script><script>alert(1)</script>"));
  }
}
