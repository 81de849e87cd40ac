/* src/server/core/rust/src/document.rs */

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::future::ready;
use futures_util::stream;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};

use crate::errors::TrellisError;
use crate::escape::escape_json_for_script;
use crate::handoff::DeferredChunk;
use crate::http::{Body, BoxFuture, Request, Response};
use crate::module::{EntryContext, ServerEntry};

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Global the client reads the handoff from.
pub const HANDOFF_GLOBAL: &str = "__trellisHandoff";
/// Client callback receiving each resolved deferred chunk.
pub const RESOLVE_GLOBAL: &str = "__trellisResolve";

/// Minimal HTML shell: loads the client entry, inlines the handoff, and
/// streams deferred values as they resolve. Rendering route markup is left
/// to the client.
#[derive(Debug, Clone)]
pub struct DocumentShell {
  title: String,
  root_id: String,
}

impl Default for DocumentShell {
  fn default() -> Self {
    Self { title: "Trellis".to_string(), root_id: "root".to_string() }
  }
}

impl DocumentShell {
  pub fn new() -> Self {
    Self::default()
  }

  #[must_use]
  pub fn title(mut self, title: impl Into<String>) -> Self {
    self.title = title.into();
    self
  }

  #[must_use]
  pub fn root_id(mut self, root_id: impl Into<String>) -> Self {
    self.root_id = root_id.into();
    self
  }

  fn head(&self, context: &EntryContext) -> String {
    let manifest = &context.handoff.manifest;
    let mut html = String::from("<!DOCTYPE html><html><head><meta charset=\"utf-8\">");
    html.push_str(&format!("<title>{}</title>", escape_html(&self.title)));
    if let Some(href) = &manifest.global_styles_url {
      html.push_str(&format!("<link rel=\"stylesheet\" href=\"{}\">", escape_html(href)));
    }
    for route in manifest.routes.values() {
      for import in &route.imports {
        html.push_str(&format!("<link rel=\"modulepreload\" href=\"{}\">", escape_html(import)));
      }
    }
    html.push_str(&format!(
      "<script>window.{HANDOFF_GLOBAL} = {};</script>",
      context.handoff_string
    ));
    if let Some(src) = &manifest.entry_module_url {
      html.push_str(&format!("<script type=\"module\" src=\"{}\"></script>", escape_html(src)));
    }
    html.push_str(&format!("</head><body><div id=\"{}\"></div>", escape_html(&self.root_id)));
    html
  }
}

const TAIL: &str = "</body></html>";

/// Script tag delivering one resolved deferred value to the client.
pub fn chunk_script(chunk: &DeferredChunk) -> String {
  format!(
    "<script>window.{RESOLVE_GLOBAL}({});</script>",
    escape_json_for_script(&chunk.to_json().to_string())
  )
}

fn escape_html(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  for ch in text.chars() {
    match ch {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(ch),
    }
  }
  out
}

impl ServerEntry for DocumentShell {
  fn render(
    &self,
    _request: Request,
    status: StatusCode,
    mut headers: HeaderMap,
    context: EntryContext,
  ) -> BoxFuture<Result<Response, TrellisError>> {
    let head = self.head(&context);
    Box::pin(async move {
      headers.insert(CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
      let body = if context.deferred.is_empty() {
        Body::Full(Bytes::from(head + TAIL))
      } else {
        let chunks = context.deferred.into_stream().map(|chunk| Ok(Bytes::from(chunk_script(&chunk))));
        let stream = stream::once(ready(Ok(Bytes::from(head))))
          .chain(chunks)
          .chain(stream::once(ready(Ok(Bytes::from_static(TAIL.as_bytes())))));
        Body::Stream(Box::pin(stream))
      };
      Ok(Response::new(status).with_headers(headers).with_body(body))
    })
  }
}
