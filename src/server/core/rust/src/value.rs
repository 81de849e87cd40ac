/* src/server/core/rust/src/value.rs */

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::Shared;
use serde::Serialize;

use crate::http::BoxFuture;

/// Values with their own handoff representation. The returned value is
/// walked again, so an implementation may hand back a graph that contains
/// itself. A node met again on its own path becomes an error marker, and
/// the walk's depth and size guards stop graphs that allocate fresh nodes.
pub trait ToHandoff: Send + Sync + fmt::Debug {
  fn to_handoff(&self) -> Value;
}

/// Loader data as produced by user code, before it is made JSON-safe.
#[derive(Debug, Clone, Default)]
pub enum Value {
  #[default]
  Undefined,
  Null,
  Bool(bool),
  Number(serde_json::Number),
  String(String),
  Date(DateTime<Utc>),
  Array(Vec<Value>),
  /// Insertion-ordered entries.
  Object(Vec<(String, Value)>),
  /// A callable; never representable in the handoff.
  Function(String),
  /// A unique, symbol-like leaf; never representable in the handoff.
  Opaque(String),
  Custom(Arc<dyn ToHandoff>),
  Deferred(Deferred),
}

impl Value {
  pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
  where
    K: Into<String>,
    V: Into<Value>,
  {
    Self::Object(entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }

  pub fn array<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
    Self::Array(items.into_iter().map(Into::into).collect())
  }

  pub fn function(name: impl Into<String>) -> Self {
    Self::Function(name.into())
  }

  pub fn custom(value: impl ToHandoff + 'static) -> Self {
    Self::Custom(Arc::new(value))
  }

  /// Convert any serializable value through its JSON form.
  pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
    serde_json::to_value(value).map(Self::from)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    match self {
      Self::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
      _ => None,
    }
  }
}

impl From<serde_json::Value> for Value {
  fn from(value: serde_json::Value) -> Self {
    match value {
      serde_json::Value::Null => Self::Null,
      serde_json::Value::Bool(b) => Self::Bool(b),
      serde_json::Value::Number(n) => Self::Number(n),
      serde_json::Value::String(s) => Self::String(s),
      serde_json::Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
      serde_json::Value::Object(map) => {
        Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
      }
    }
  }
}

macro_rules! impl_from_integer {
  ($($ty:ty),*) => {
    $(
      impl From<$ty> for Value {
        fn from(n: $ty) -> Self {
          Self::Number(serde_json::Number::from(n))
        }
      }
    )*
  };
}

impl_from_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl From<f64> for Value {
  fn from(n: f64) -> Self {
    serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Self::Bool(b)
  }
}

impl From<&str> for Value {
  fn from(s: &str) -> Self {
    Self::String(s.to_string())
  }
}

impl From<String> for Value {
  fn from(s: String) -> Self {
    Self::String(s)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(d: DateTime<Utc>) -> Self {
    Self::Date(d)
  }
}

impl From<Deferred> for Value {
  fn from(d: Deferred) -> Self {
    Self::Deferred(d)
  }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(items: Vec<T>) -> Self {
    Self::array(items)
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(opt: Option<T>) -> Self {
    opt.map_or(Self::Null, Into::into)
  }
}

/// A loader value resolved after the initial response. Cloning shares the
/// underlying future; it runs at most once.
#[derive(Clone)]
pub struct Deferred(Shared<BoxFuture<Result<Value, String>>>);

impl Deferred {
  pub fn new<F>(future: F) -> Self
  where
    F: Future<Output = anyhow::Result<Value>> + Send + 'static,
  {
    let future: BoxFuture<Result<Value, String>> =
      Box::pin(async move { future.await.map_err(|e| format!("{e:#}")) });
    Self(future.shared())
  }

  pub fn resolved(value: Value) -> Self {
    Self::new(async move { Ok(value) })
  }

  pub async fn resolve(&self) -> Result<Value, String> {
    self.0.clone().await
  }
}

impl fmt::Debug for Deferred {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Deferred(..)")
  }
}
