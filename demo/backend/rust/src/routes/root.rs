/* demo/backend/rust/src/routes/root.rs */

use trellis_server::{DataArgs, DataError, DataOutput, Value};

use super::{data, user};

pub(super) async fn loader(args: DataArgs) -> Result<DataOutput, DataError> {
  let user = user(&args).map_or(Value::Null, |u| Value::from(u.name.clone()));
  data(Value::object([("user", user)]))
}
