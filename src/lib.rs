// Girder - a dependency-injection container and request pipeline
//
// Modules declare providers and controllers; compiling an application
// resolves the module graph, checks export visibility and dependency
// cycles, and precomputes a dispatch table whose routes run guards,
// interceptors, pipes and handlers in a fixed order.

// Re-export core functionality
pub use girder_core::*;

// Re-export optional crates
#[cfg(feature = "config")]
pub use girder_config;

#[cfg(feature = "testing")]
pub use girder_testing;

#[cfg(feature = "validation")]
pub use girder_validation;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Application, ArgumentMetadata, Args, Container, ControllerBuilder, DispatchOptions, Error,
        Guard, HttpRequest, HttpResponse, Interceptor, Lifetime, MetadataRegistry, ModuleBuilder,
        Next, ParamBinding, Pipe, ProviderDescriptor, RequestContext, Result, RouteBuilder, Token,
        async_trait, compile_application,
    };
    pub use serde_json::{Value, json};
}
