// Controller and route registration

use crate::{
    Args, BoxError, ControllerDescriptor, Deps, Error, HandlerCall, HandlerFn, HttpMethod,
    HttpResponse, Lifetime, MetadataKind, MetadataRegistry, ParamBinding, ProviderDescriptor,
    RouteDescriptor, Token, handler,
};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// Builder for a controller: its construction recipe, class-level stages
/// and routes.
///
/// ```rust
/// use girder_core::{Args, ControllerBuilder, HttpResponse, MetadataRegistry, ParamBinding, RouteBuilder};
/// use std::sync::Arc;
///
/// struct UsersController;
///
/// let registry = MetadataRegistry::new();
/// let token = ControllerBuilder::new("UsersController", |_| Ok(UsersController))
///     .base_path("/users")
///     .route(
///         RouteBuilder::get("/:id", "show")
///             .param(ParamBinding::path("id"))
///             .to(|_: Arc<UsersController>, args: Args| async move {
///                 let id: String = args.get(0)?;
///                 Ok(HttpResponse::ok().with_body(id))
///             }),
///     )
///     .register(&registry);
/// assert_eq!(token.as_str(), "UsersController");
/// ```
pub struct ControllerBuilder {
    provider: ProviderDescriptor,
    base_path: String,
    guards: Vec<Token>,
    interceptors: Vec<Token>,
    routes: Vec<RouteBuilder>,
}

impl ControllerBuilder {
    pub fn new<C, F>(token: impl Into<Token>, factory: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(&Deps<'_>) -> Result<C, BoxError> + Send + Sync + 'static,
    {
        Self {
            provider: ProviderDescriptor::provide(token, factory),
            base_path: "/".to_string(),
            guards: Vec::new(),
            interceptors: Vec::new(),
            routes: Vec::new(),
        }
    }

    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.base_path = path.into();
        self
    }

    pub fn depends_on<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.provider = self.provider.depends_on(tokens);
        self
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.provider = self.provider.lifetime(lifetime);
        self
    }

    pub fn request_scoped(self) -> Self {
        self.lifetime(Lifetime::RequestScoped)
    }

    /// Guard applied to every route, before method-level guards
    pub fn guard(mut self, token: impl Into<Token>) -> Self {
        self.guards.push(token.into());
        self
    }

    /// Interceptor wrapping every route, outside method-level interceptors
    pub fn interceptor(mut self, token: impl Into<Token>) -> Self {
        self.interceptors.push(token.into());
        self
    }

    pub fn route(mut self, route: RouteBuilder) -> Self {
        self.routes.push(route);
        self
    }

    /// Write the controller into `registry` and return its token.
    pub fn register(self, registry: &MetadataRegistry) -> Token {
        let token = self.provider.token.clone();

        registry.register_class_metadata(
            token.clone(),
            MetadataKind::Controller,
            ControllerDescriptor {
                token: token.clone(),
                base_path: self.base_path,
            },
        );
        registry.register_class_metadata(token.clone(), MetadataKind::Provider, self.provider);
        // Empty lists are written too so a re-registration drops old stages
        registry.register_class_metadata(token.clone(), MetadataKind::Guards, self.guards);
        registry.register_class_metadata(
            token.clone(),
            MetadataKind::Interceptors,
            self.interceptors,
        );

        registry.clear_methods(&token);
        for route in self.routes {
            let descriptor = route.build();
            trace!(
                controller = %token,
                method = %descriptor.method,
                path = %descriptor.path,
                handler = %descriptor.handler_name,
                "Route registered"
            );
            let name = descriptor.handler_name.clone();
            registry.register_method_metadata(token.clone(), &name, MetadataKind::Route, descriptor);
        }
        token
    }
}

/// Builder for one route declared on a controller method.
pub struct RouteBuilder {
    method: HttpMethod,
    path: String,
    name: String,
    params: Vec<ParamBinding>,
    guards: Vec<Token>,
    interceptors: Vec<Token>,
    handler: Option<HandlerFn>,
}

impl RouteBuilder {
    /// `name` identifies the controller method; it must be unique per controller.
    pub fn new(method: HttpMethod, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            name: name.into(),
            params: Vec::new(),
            guards: Vec::new(),
            interceptors: Vec::new(),
            handler: None,
        }
    }

    pub fn get(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(HttpMethod::GET, path, name)
    }

    pub fn post(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(HttpMethod::POST, path, name)
    }

    pub fn put(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(HttpMethod::PUT, path, name)
    }

    pub fn patch(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(HttpMethod::PATCH, path, name)
    }

    pub fn delete(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(HttpMethod::DELETE, path, name)
    }

    /// Append the next positional argument
    pub fn param(mut self, binding: ParamBinding) -> Self {
        self.params.push(binding);
        self
    }

    pub fn guard(mut self, token: impl Into<Token>) -> Self {
        self.guards.push(token.into());
        self
    }

    pub fn interceptor(mut self, token: impl Into<Token>) -> Self {
        self.interceptors.push(token.into());
        self
    }

    pub fn handler(mut self, handler: HandlerFn) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Bind a typed handler; see [`handler`](crate::handler()).
    pub fn to<C, F, Fut>(self, f: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(Arc<C>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        self.handler(handler(f))
    }

    fn build(self) -> RouteDescriptor {
        let handler = self.handler.unwrap_or_else(|| missing_handler(&self.name));
        RouteDescriptor {
            method: self.method,
            path: self.path,
            handler_name: self.name,
            handler,
            params: self.params,
            guards: self.guards,
            interceptors: self.interceptors,
        }
    }
}

fn missing_handler(name: &str) -> HandlerFn {
    let name = name.to_string();
    Arc::new(move |_: HandlerCall| -> BoxFuture<'static, Result<HttpResponse, Error>> {
        let message = format!("route `{name}` has no handler");
        Box::pin(async move { Err(Error::Internal(message)) })
    })
}
