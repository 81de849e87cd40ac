/* src/server/core/rust/src/route/mod.rs */

// Flat manifest -> nested tree -> ranked branches -> matched chain.

pub mod manifest;
pub mod matcher;
pub mod tree;


pub use manifest::{RouteDefinition, RouteManifest};
pub use matcher::{Params, RouteMatch, RouteTree, SPLAT_PARAM, match_routes};
pub use tree::{RouteNode, build_tree};
