/* src/server/core/rust/src/config/tests/mod.rs */

use super::*;
use crate::errors::TrellisError;
