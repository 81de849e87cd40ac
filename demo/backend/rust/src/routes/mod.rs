/* demo/backend/rust/src/routes/mod.rs */

mod login;
mod posts;
mod root;

use std::collections::HashMap;

use trellis_server::{DataArgs, DataError, DataOutput, DataResponse, ModuleRegistry, RouteModule, Value};

use crate::store::Store;

pub use login::SESSION_COOKIE;

/// Signed-in user, derived from the session cookie.
#[derive(Debug, Clone)]
pub struct User {
  pub name: String,
}

/// One module per id in `build/route-manifest.json`.
pub fn registry() -> ModuleRegistry {
  ModuleRegistry::new()
    .route("root", RouteModule::new().loader(root::loader))
    .route("routes/index", RouteModule::new())
    .route("routes/login", RouteModule::new().action(login::action))
    .route("routes/posts", RouteModule::new().loader(posts::list).headers(posts::cache_headers))
    .route("routes/posts/index", RouteModule::new())
    .route("routes/posts/new", RouteModule::new().action(posts::create))
    .route("routes/posts/$slug", RouteModule::new().loader(posts::show).headers(posts::cache_headers))
}

fn data(value: impl Into<Value>) -> Result<DataOutput, DataError> {
  Ok(DataOutput::Data(value.into()))
}

fn respond(response: DataResponse) -> Result<DataOutput, DataError> {
  Ok(DataOutput::Response(response))
}

fn store(args: &DataArgs) -> anyhow::Result<&Store> {
  args.context.get::<Store>().ok_or_else(|| anyhow::anyhow!("load context carries no store"))
}

fn user(args: &DataArgs) -> Option<&User> {
  args.session.get::<User>()
}

/// Decode an `application/x-www-form-urlencoded` body.
fn form(args: &DataArgs) -> HashMap<String, String> {
  url::form_urlencoded::parse(args.request.body()).into_owned().collect()
}
