//! Immutable descriptor records produced at scan time.
//!
//! A metadata source (hand-written registration code, a build script, a
//! macro layer) turns declarations into these records and stores them in the
//! [`MetadataRegistry`](crate::MetadataRegistry). Nothing here carries
//! behaviour beyond construction helpers.

use crate::{BoxError, Guard, HandlerFn, HttpMethod, Instance, Interceptor, Pipe, Token};
use std::fmt;
use std::sync::Arc;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Lifetime {
    /// One instance per container
    #[default]
    Singleton,
    /// One instance per inbound request
    RequestScoped,
    /// A new instance for every resolution
    Transient,
}

impl Lifetime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifetime::Singleton => "singleton",
            Lifetime::RequestScoped => "request-scoped",
            Lifetime::Transient => "transient",
        }
    }
}

impl fmt::Display for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Factory producing an instance from its positionally resolved dependencies.
pub type FactoryFn = Arc<dyn Fn(&Deps<'_>) -> Result<Instance, BoxError> + Send + Sync>;

/// Hook run when a cached instance is released.
pub type TeardownFn = Arc<dyn Fn(&Instance) -> Result<(), BoxError> + Send + Sync>;

/// Resolved dependencies handed to a factory, in declaration order.
pub struct Deps<'a> {
    owner: &'a Token,
    tokens: &'a [Token],
    instances: &'a [Instance],
}

impl<'a> Deps<'a> {
    pub(crate) fn new(owner: &'a Token, tokens: &'a [Token], instances: &'a [Instance]) -> Self {
        Self {
            owner,
            tokens,
            instances,
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The raw instance at `index`.
    pub fn instance(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index)
    }

    /// The dependency at `index`, downcast to `T`.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, BoxError> {
        let instance = self.instances.get(index).ok_or_else(|| {
            format!(
                "`{}` declares {} dependencies, asked for #{}",
                self.owner,
                self.instances.len(),
                index
            )
        })?;
        instance.downcast::<T>().ok_or_else(|| {
            format!(
                "dependency #{} (`{}`) of `{}` is a {}, not a {}",
                index,
                self.tokens[index],
                self.owner,
                instance.type_name(),
                std::any::type_name::<T>()
            )
            .into()
        })
    }
}

/// Construction recipe for one provider token.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub token: Token,
    pub lifetime: Lifetime,
    pub dependencies: Vec<Token>,
    pub factory: FactoryFn,
    pub teardown: Option<TeardownFn>,
}

impl ProviderDescriptor {
    /// A singleton provider built by `factory`.
    pub fn new<F>(token: impl Into<Token>, factory: F) -> Self
    where
        F: Fn(&Deps<'_>) -> Result<Instance, BoxError> + Send + Sync + 'static,
    {
        Self {
            token: token.into(),
            lifetime: Lifetime::Singleton,
            dependencies: Vec::new(),
            factory: Arc::new(factory),
            teardown: None,
        }
    }

    /// A provider whose factory returns a plain value.
    ///
    /// ```
    /// use girder_core::ProviderDescriptor;
    ///
    /// struct Clock;
    /// let descriptor = ProviderDescriptor::provide("Clock", |_| Ok(Clock));
    /// assert!(descriptor.dependencies.is_empty());
    /// ```
    pub fn provide<T, F>(token: impl Into<Token>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Deps<'_>) -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::new(token, move |deps| factory(deps).map(Instance::new))
    }

    /// A provider for a pre-built value.
    pub fn value<T: Send + Sync + 'static>(token: impl Into<Token>, value: T) -> Self {
        let instance = Instance::new(value);
        Self::new(token, move |_| Ok(instance.clone()))
    }

    /// A guard provider, resolvable as `Arc<dyn Guard>`.
    pub fn guard<G, F>(token: impl Into<Token>, factory: F) -> Self
    where
        G: Guard + 'static,
        F: Fn(&Deps<'_>) -> Result<G, BoxError> + Send + Sync + 'static,
    {
        Self::new(token, move |deps| factory(deps).map(Instance::guard))
    }

    /// An interceptor provider, resolvable as `Arc<dyn Interceptor>`.
    pub fn interceptor<I, F>(token: impl Into<Token>, factory: F) -> Self
    where
        I: Interceptor + 'static,
        F: Fn(&Deps<'_>) -> Result<I, BoxError> + Send + Sync + 'static,
    {
        Self::new(token, move |deps| factory(deps).map(Instance::interceptor))
    }

    /// A pipe provider, resolvable as `Arc<dyn Pipe>`.
    pub fn pipe<P, F>(token: impl Into<Token>, factory: F) -> Self
    where
        P: Pipe + 'static,
        F: Fn(&Deps<'_>) -> Result<P, BoxError> + Send + Sync + 'static,
    {
        Self::new(token, move |deps| factory(deps).map(Instance::pipe))
    }

    pub fn lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn request_scoped(self) -> Self {
        self.lifetime(Lifetime::RequestScoped)
    }

    pub fn transient(self) -> Self {
        self.lifetime(Lifetime::Transient)
    }

    /// Declare dependencies; their instances reach the factory in this order.
    pub fn depends_on<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Token>,
    {
        self.dependencies.extend(tokens.into_iter().map(Into::into));
        self
    }

    /// Run `hook` when the cached instance is released.
    pub fn on_teardown<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Instance) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("token", &self.token)
            .field("lifetime", &self.lifetime)
            .field("dependencies", &self.dependencies)
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

/// Composition record for one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    pub id: Token,
    pub imports: Vec<Token>,
    pub controllers: Vec<Token>,
    pub providers: Vec<Token>,
    /// Subset of `providers`, tokens re-exported from imports, or imported module ids
    pub exports: Vec<Token>,
    /// Exports of a global module are visible to every module without an import
    pub global: bool,
}

impl ModuleDescriptor {
    pub fn new(id: impl Into<Token>) -> Self {
        Self {
            id: id.into(),
            imports: Vec::new(),
            controllers: Vec::new(),
            providers: Vec::new(),
            exports: Vec::new(),
            global: false,
        }
    }
}

/// Class-level controller record; the controller's construction recipe is
/// an ordinary [`ProviderDescriptor`] under the same token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerDescriptor {
    pub token: Token,
    pub base_path: String,
}

/// Where a handler argument is extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSource {
    Path,
    Query,
    Body,
    Header,
    RawRequest,
    RawResponse,
}

impl ParamSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamSource::Path => "path",
            ParamSource::Query => "query",
            ParamSource::Body => "body",
            ParamSource::Header => "header",
            ParamSource::RawRequest => "raw-request",
            ParamSource::RawResponse => "raw-response",
        }
    }

    /// Raw bindings hand over the request/response objects and cannot be piped.
    pub fn is_raw(&self) -> bool {
        matches!(self, ParamSource::RawRequest | ParamSource::RawResponse)
    }
}

/// One positional handler argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    pub source: ParamSource,
    pub key: Option<String>,
    /// Pipes applied to this argument, in order
    pub pipes: Vec<Token>,
}

impl ParamBinding {
    pub fn new(source: ParamSource, key: Option<&str>) -> Self {
        Self {
            source,
            key: key.map(str::to_string),
            pipes: Vec::new(),
        }
    }

    pub fn path(key: &str) -> Self {
        Self::new(ParamSource::Path, Some(key))
    }

    pub fn query(key: &str) -> Self {
        Self::new(ParamSource::Query, Some(key))
    }

    /// The whole query string as an object.
    pub fn query_all() -> Self {
        Self::new(ParamSource::Query, None)
    }

    pub fn body() -> Self {
        Self::new(ParamSource::Body, None)
    }

    pub fn body_field(key: &str) -> Self {
        Self::new(ParamSource::Body, Some(key))
    }

    pub fn header(key: &str) -> Self {
        Self::new(ParamSource::Header, Some(&key.to_ascii_lowercase()))
    }

    pub fn raw_request() -> Self {
        Self::new(ParamSource::RawRequest, None)
    }

    pub fn raw_response() -> Self {
        Self::new(ParamSource::RawResponse, None)
    }

    pub fn pipe(mut self, token: impl Into<Token>) -> Self {
        self.pipes.push(token.into());
        self
    }

    /// Name used in validation messages.
    pub fn display_name(&self) -> &str {
        match &self.key {
            Some(key) => key,
            None => self.source.as_str(),
        }
    }
}

/// One route declared on a controller method.
#[derive(Clone)]
pub struct RouteDescriptor {
    pub method: HttpMethod,
    /// Pattern relative to the controller base path, `:name` marks a parameter
    pub path: String,
    pub handler_name: String,
    pub handler: HandlerFn,
    pub params: Vec<ParamBinding>,
    /// Method-level guards, run after the controller's class-level guards
    pub guards: Vec<Token>,
    /// Method-level interceptors, nested inside the class-level ones
    pub interceptors: Vec<Token>,
}

impl fmt::Debug for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteDescriptor")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler_name", &self.handler_name)
            .field("params", &self.params)
            .field("guards", &self.guards)
            .field("interceptors", &self.interceptors)
            .finish()
    }
}
