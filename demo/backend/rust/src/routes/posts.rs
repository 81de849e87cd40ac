/* demo/backend/rust/src/routes/posts.rs */

use std::time::Duration;

use http::header::CACHE_CONTROL;
use http::{HeaderMap, HeaderValue, StatusCode};
use trellis_server::{DataArgs, DataError, DataOutput, DataResponse, Deferred, HeadersArgs, Value};

use super::{form, respond, store, user};
use crate::store::Post;

pub(super) async fn list(args: DataArgs) -> Result<DataOutput, DataError> {
  let posts = store(&args)?.list().await;
  let count = posts.len();
  // stands in for a slow analytics query; streamed after the shell
  let stats = Deferred::new(async move {
    tokio::time::sleep(Duration::from_millis(150)).await;
    Ok::<_, anyhow::Error>(Value::object([("count", count)]))
  });
  let body = Value::object([
    ("posts", Value::array(posts.iter().map(Post::summary))),
    ("stats", Value::from(stats)),
  ]);
  respond(DataResponse::data(body).header(CACHE_CONTROL, HeaderValue::from_static("max-age=30")))
}

pub(super) async fn show(args: DataArgs) -> Result<DataOutput, DataError> {
  let slug = args.params.get("slug").cloned().unwrap_or_default();
  match store(&args)?.find(&slug).await {
    Some(post) => respond(
      DataResponse::data(post.detail()).header(CACHE_CONTROL, HeaderValue::from_static("max-age=60")),
    ),
    None => respond(DataResponse::with_status(Value::object([("slug", slug)]), StatusCode::NOT_FOUND)),
  }
}

pub(super) async fn create(args: DataArgs) -> Result<DataOutput, DataError> {
  let Some(author) = user(&args).map(|u| u.name.clone()) else {
    return Err(DataError::redirect("/login"));
  };
  let fields = form(&args);
  let title = fields.get("title").map(|t| t.trim()).unwrap_or_default();
  let body = fields.get("body").map(String::as_str).unwrap_or_default();
  if title.is_empty() {
    return respond(DataResponse::with_status(
      Value::object([("error", "title is required")]),
      StatusCode::BAD_REQUEST,
    ));
  }
  match store(&args)?.create(title, body, &author).await {
    Ok(slug) => respond(DataResponse::redirect_with(&format!("/posts/{slug}"), StatusCode::SEE_OTHER)),
    Err(err) => respond(DataResponse::with_status(
      Value::object([("error", err.to_string())]),
      StatusCode::CONFLICT,
    )),
  }
}

/// Forward the loader's `Cache-Control`; deeper routes override shallower ones.
pub(super) fn cache_headers(args: HeadersArgs<'_>) -> anyhow::Result<HeaderMap> {
  let mut headers = HeaderMap::new();
  if let Some(value) = args.loader_headers.get(CACHE_CONTROL) {
    headers.insert(CACHE_CONTROL, value.clone());
  }
  Ok(headers)
}
