// Core library for the Girder framework
// Metadata registry, dependency injection, module resolution, route
// compilation and the request pipeline

pub mod application;
pub mod container;
pub mod context;
pub mod controller;
pub mod descriptor;
pub mod dispatcher;
pub mod error;
pub mod extensions;
pub mod guard;
pub mod handler;
pub mod http;
pub mod interceptor;
pub mod logging;
pub mod metadata;
pub mod module;
pub mod pipe;
pub mod routing;
pub mod token;

// Re-export commonly used types
pub use application::*;
pub use container::*;
pub use context::*;
pub use controller::*;
pub use descriptor::*;
pub use dispatcher::*;
pub use error::*;
pub use extensions::*;
pub use guard::*;
pub use handler::*;
pub use self::http::*;
pub use interceptor::*;
pub use metadata::*;
pub use module::*;
pub use pipe::*;
pub use routing::{
    CompiledRoute, CompiledRouteTable, PathPattern, RouteCompiler, RouteInfo, RouteMatch,
    RouteSummary, normalize_path,
};
pub use token::*;

// Logging is exposed as a module; re-export the tracing macros
pub use logging::{debug, error, info, trace, warn};

// Re-export async_trait for implementing stage traits
pub use async_trait::async_trait;
