/* src/server/adapter/axum/src/handler/convert.rs */

use axum::body::Bytes;
use axum::http::header::HOST;
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery};
use axum::response::Response;
use trellis_server::http::Body;
use trellis_server::Request;
use url::Url;

/// Absolute URL of an inbound request. Hyper only gives origin-form URIs,
/// so the authority comes from the `Host` header.
pub(super) fn request_url(parts: &Parts) -> Result<Url, url::ParseError> {
  let host = parts
    .headers
    .get(HOST)
    .and_then(|v| v.to_str().ok())
    .or_else(|| parts.uri.authority().map(Authority::as_str))
    .unwrap_or("localhost");
  let scheme = parts.uri.scheme_str().unwrap_or("http");
  let path = parts.uri.path_and_query().map_or("/", PathAndQuery::as_str);
  Url::parse(&format!("{scheme}://{host}{path}"))
}

pub(super) fn into_core_request(parts: &Parts, body: Bytes) -> Result<Request, url::ParseError> {
  let url = request_url(parts)?;
  Ok(Request::new(parts.method.clone(), url).with_headers(parts.headers.clone()).with_body(body))
}

pub(super) fn into_axum_response(response: trellis_server::Response) -> Response {
  let body = match response.body {
    Body::Empty => axum::body::Body::empty(),
    Body::Full(bytes) => axum::body::Body::from(bytes),
    Body::Stream(stream) => axum::body::Body::from_stream(stream),
  };
  let mut out = Response::new(body);
  *out.status_mut() = response.status;
  *out.headers_mut() = response.headers;
  out
}
