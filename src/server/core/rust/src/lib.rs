/* src/server/core/rust/src/lib.rs */

pub mod assets;
pub mod build_loader;
pub mod config;
pub mod data;
pub mod dev;
pub mod dispatch;
pub mod document;
pub mod entry;
pub mod errors;
pub mod escape;
pub mod handoff;
pub mod http;
pub mod module;
pub mod route;
pub mod value;

// Re-exports for ergonomic use
pub use assets::{AssetEntry, AssetManifest, AssetSource};
pub use build_loader::{load_route_manifest, write_route_manifest};
pub use config::{ServerMode, TrellisConfig, find_config, load_config};
pub use data::{
  DataArgs, DataError, DataOutput, DataResponse, DataResult, GLOBAL_LOADER_ID, LoadContext, Session,
};
pub use dev::{DevBuilder, ManifestWriter};
pub use dispatch::{HandlerOptions, REDIRECT_HEADER, RequestHandler};
pub use document::DocumentShell;
pub use entry::{EntryManifest, EntryMatch, EntryRoute};
pub use errors::TrellisError;
pub use escape::escape_json_for_script;
pub use handoff::{DeferredChunk, DeferredSet, ServerHandoff};
pub use http::{Body, BoxFuture, BoxStream, Request, Response};
pub use module::{EntryContext, HeadersArgs, ModuleRegistry, RouteModule, ServerEntry};
pub use route::{Params, RouteDefinition, RouteManifest, RouteMatch, RouteTree};
pub use value::{Deferred, ToHandoff, Value};
