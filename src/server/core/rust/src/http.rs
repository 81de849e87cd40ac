/* src/server/core/rust/src/http.rs */

// Abstract request/response values. The core never touches a socket; adapter
// crates convert their framework types into these and back.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::Serialize;
use url::Url;

use crate::errors::TrellisError;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

const REDIRECT_STATUS_CODES: [u16; 5] = [301, 302, 303, 307, 308];

pub fn is_redirect_status(status: StatusCode) -> bool {
  REDIRECT_STATUS_CODES.contains(&status.as_u16())
}

/// An inbound request.
///
/// The body is owned: consuming it (`into_body`) moves the request, so a
/// request handed to more than one consumer must be cloned first. The
/// dispatcher always clones once per loader before fan-out.
#[derive(Debug, Clone)]
pub struct Request {
  method: Method,
  url: Url,
  headers: HeaderMap,
  body: Bytes,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url, headers: HeaderMap::new(), body: Bytes::new() }
  }

  pub fn get(url: &str) -> Result<Self, url::ParseError> {
    Ok(Self::new(Method::GET, Url::parse(url)?))
  }

  pub fn post(url: &str) -> Result<Self, url::ParseError> {
    Ok(Self::new(Method::POST, Url::parse(url)?))
  }

  #[must_use]
  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.append(name, value);
    self
  }

  #[must_use]
  pub fn with_headers(mut self, headers: HeaderMap) -> Self {
    self.headers = headers;
    self
  }

  #[must_use]
  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = body.into();
    self
  }

  /// Same method, headers and body, addressed to a different URL.
  pub fn retarget(&self, url: Url) -> Self {
    Self { method: self.method.clone(), url, headers: self.headers.clone(), body: self.body.clone() }
  }

  pub fn method(&self) -> &Method {
    &self.method
  }

  pub fn url(&self) -> &Url {
    &self.url
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn body(&self) -> &Bytes {
    &self.body
  }

  pub fn into_body(self) -> Bytes {
    self.body
  }

  /// Anything other than GET/HEAD is a mutation submitted to an action.
  pub fn is_action(&self) -> bool {
    self.method != Method::GET && self.method != Method::HEAD
  }

  pub fn query_param(&self, name: &str) -> Option<String> {
    self.url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
  }
}

pub enum Body {
  Empty,
  Full(Bytes),
  Stream(BoxStream<Result<Bytes, TrellisError>>),
}

impl fmt::Debug for Body {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Empty => f.write_str("Body::Empty"),
      Self::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
      Self::Stream(_) => f.write_str("Body::Stream(..)"),
    }
  }
}

impl From<Bytes> for Body {
  fn from(bytes: Bytes) -> Self {
    Self::Full(bytes)
  }
}

impl From<String> for Body {
  fn from(s: String) -> Self {
    Self::Full(Bytes::from(s))
  }
}

impl From<&'static str> for Body {
  fn from(s: &'static str) -> Self {
    Self::Full(Bytes::from_static(s.as_bytes()))
  }
}

#[derive(Debug)]
pub struct Response {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Body,
}

impl Response {
  pub fn new(status: StatusCode) -> Self {
    Self { status, headers: HeaderMap::new(), body: Body::Empty }
  }

  #[must_use]
  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.append(name, value);
    self
  }

  #[must_use]
  pub fn with_headers(mut self, headers: HeaderMap) -> Self {
    for (name, value) in &headers {
      self.headers.append(name.clone(), value.clone());
    }
    self
  }

  #[must_use]
  pub fn with_body(mut self, body: impl Into<Body>) -> Self {
    self.body = body.into();
    self
  }

  pub fn is_redirect(&self) -> bool {
    is_redirect_status(self.status)
  }

  pub fn location(&self) -> Option<&str> {
    self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
  }

  /// Drain the body into memory. Streaming bodies are collected in order.
  pub async fn into_bytes(self) -> Result<Bytes, TrellisError> {
    match self.body {
      Body::Empty => Ok(Bytes::new()),
      Body::Full(bytes) => Ok(bytes),
      Body::Stream(mut stream) => {
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
          buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
      }
    }
  }
}

/// Serialize `value` as a JSON response.
pub fn json<T: Serialize + ?Sized>(value: &T, status: StatusCode) -> Response {
  let body = serde_json::to_vec(value).unwrap_or_else(|_| b"null".to_vec());
  Response::new(status)
    .with_header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
    .with_body(Bytes::from(body))
}

/// `{"error": message}` with the given status.
pub fn json_error(message: impl Into<String>, status: StatusCode) -> Response {
  json(&serde_json::json!({ "error": message.into() }), status)
}

pub fn redirect(location: &str, status: StatusCode) -> Response {
  let mut response = Response::new(status);
  if let Ok(value) = HeaderValue::from_str(location) {
    response.headers.insert(LOCATION, value);
  }
  response
}
