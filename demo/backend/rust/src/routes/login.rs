/* demo/backend/rust/src/routes/login.rs */

use http::header::SET_COOKIE;
use http::{HeaderValue, StatusCode};
use trellis_server::{DataArgs, DataError, DataOutput, DataResponse, Value};

use super::{form, respond};

pub const SESSION_COOKIE: &str = "trellis_user";

pub(super) async fn action(args: DataArgs) -> Result<DataOutput, DataError> {
  let fields = form(&args);
  let name = fields.get("name").map(|n| n.trim()).unwrap_or_default();
  if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
    let error = Value::object([("error", "name must be alphanumeric")]);
    return respond(DataResponse::with_status(error, StatusCode::BAD_REQUEST));
  }
  let cookie = HeaderValue::from_str(&format!("{SESSION_COOKIE}={name}; Path=/; HttpOnly"))
    .map_err(anyhow::Error::from)?;
  tracing::info!(user = name, "signed in");
  respond(DataResponse::redirect_with("/posts", StatusCode::SEE_OTHER).header(SET_COOKIE, cookie))
}
