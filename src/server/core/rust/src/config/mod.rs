/* src/server/core/rust/src/config/mod.rs */

mod loader;
mod types;

#[cfg(test)]
mod tests;

pub use loader::{CONFIG_FILENAME, find_config, load_config, parse_config};
pub use types::{DevSection, ServerMode, ServerSection, TrellisConfig};
