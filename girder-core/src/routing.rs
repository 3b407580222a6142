// Route compilation and the precomputed dispatch table

use crate::module::{ControllerEntry, GlobalRegistry};
use crate::{
    Container, Error, FromInstance, Guard, HandlerFn, HttpMethod, HttpRequest, Instance,
    Interceptor, Lifetime, ParamBinding, ParamSource, Pipe, RequestScope, Result,
    RouteDescriptor, Token,
};
use compact_str::CompactString;
use futures_util::future::BoxFuture;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Normalize a path: leading slash, no duplicate slashes, no trailing slash
/// (except for the root).
///
/// ```
/// use girder_core::normalize_path;
///
/// assert_eq!(normalize_path("users//42/"), "/users/42");
/// assert_eq!(normalize_path(""), "/");
/// ```
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    let already_normal = path.starts_with('/')
        && !path.contains("//")
        && (path.len() == 1 || !path.ends_with('/'));
    if already_normal {
        return Cow::Borrowed(path);
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    Cow::Owned(normalized)
}

/// Segments of a normalized path; the root has none.
fn split_segments(path: &str) -> SmallVec<[&str; 8]> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() {
        SmallVec::new()
    } else {
        trimmed.split('/').collect()
    }
}

/// Parse a query string into a map; repeated keys keep the last value.
pub(crate) fn parse_query(query: &str) -> HashMap<String, String> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

fn decode_param(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(CompactString),
    Param(CompactString),
}

/// Parameter extraction strategy, chosen once per pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Matcher {
    Static,
    One(usize),
    Two(usize, usize),
    Many(SmallVec<[usize; 4]>),
}

/// A compiled path pattern such as `/users/:id/posts/:post`.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    literals: SmallVec<[(usize, CompactString); 4]>,
    param_names: Vec<String>,
    matcher: Matcher,
    /// Pattern with parameter names erased, e.g. `/users/:`
    shape: String,
}

impl PathPattern {
    /// Compile a pattern. `:name` segments are parameters.
    pub fn parse(pattern: &str) -> Result<Self> {
        let raw = normalize_path(pattern).into_owned();
        let mut segments = Vec::new();
        let mut literals = SmallVec::new();
        let mut param_names: Vec<String> = Vec::new();
        let mut positions: SmallVec<[usize; 4]> = SmallVec::new();

        for (index, segment) in split_segments(&raw).into_iter().enumerate() {
            match segment.strip_prefix(':') {
                Some(name) => {
                    if name.is_empty() {
                        return Err(invalid(&raw, "empty parameter name"));
                    }
                    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(invalid(&raw, format!("invalid parameter name `{name}`")));
                    }
                    if param_names.iter().any(|n| n == name) {
                        return Err(invalid(&raw, format!("duplicate parameter `{name}`")));
                    }
                    param_names.push(name.to_string());
                    positions.push(index);
                    segments.push(Segment::Param(CompactString::new(name)));
                }
                None => {
                    literals.push((index, CompactString::new(segment)));
                    segments.push(Segment::Literal(CompactString::new(segment)));
                }
            }
        }

        let matcher = match positions.as_slice() {
            [] => Matcher::Static,
            [a] => Matcher::One(*a),
            [a, b] => Matcher::Two(*a, *b),
            _ => Matcher::Many(positions),
        };

        let mut shape = String::with_capacity(raw.len());
        for segment in &segments {
            shape.push('/');
            match segment {
                Segment::Literal(lit) => shape.push_str(lit),
                Segment::Param(_) => shape.push(':'),
            }
        }
        if shape.is_empty() {
            shape.push('/');
        }

        Ok(Self {
            raw,
            segments,
            literals,
            param_names,
            matcher,
            shape,
        })
    }

    fn root() -> Self {
        Self {
            raw: "/".to_string(),
            segments: Vec::new(),
            literals: SmallVec::new(),
            param_names: Vec::new(),
            matcher: Matcher::Static,
            shape: "/".to_string(),
        }
    }

    /// The normalized pattern text.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn is_static(&self) -> bool {
        self.matcher == Matcher::Static
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Match a request path, returning decoded parameter values.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let path = normalize_path(path);
        self.captures(&split_segments(&path))
    }

    fn captures(&self, segments: &[&str]) -> Option<HashMap<String, String>> {
        if segments.len() != self.segments.len() {
            return None;
        }
        if self
            .literals
            .iter()
            .any(|(index, literal)| segments[*index] != literal.as_str())
        {
            return None;
        }

        let mut params = HashMap::with_capacity(self.param_names.len());
        match &self.matcher {
            Matcher::Static => {}
            Matcher::One(a) => {
                params.insert(self.param_names[0].clone(), decode_param(segments[*a]));
            }
            Matcher::Two(a, b) => {
                params.insert(self.param_names[0].clone(), decode_param(segments[*a]));
                params.insert(self.param_names[1].clone(), decode_param(segments[*b]));
            }
            Matcher::Many(positions) => {
                for (name, index) in self.param_names.iter().zip(positions) {
                    params.insert(name.clone(), decode_param(segments[*index]));
                }
            }
        }
        Some(params)
    }

    /// Literal segments sort before parameters at the leftmost difference.
    fn specificity_cmp(&self, other: &PathPattern) -> Ordering {
        for (a, b) in self.segments.iter().zip(&other.segments) {
            match (a, b) {
                (Segment::Literal(_), Segment::Param(_)) => return Ordering::Less,
                (Segment::Param(_), Segment::Literal(_)) => return Ordering::Greater,
                _ => {}
            }
        }
        Ordering::Equal
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> Error {
    Error::InvalidRoute {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

/// A pipeline stage bound at compile time.
///
/// Singleton stages are resolved once, during compilation. Request-scoped
/// and transient ones are resolved per request through the request scope.
pub enum Binding<T: ?Sized> {
    Ready(Arc<T>),
    Deferred(Token),
}

impl<T: FromInstance + ?Sized> Binding<T> {
    fn compile(container: &Container, token: &Token) -> Result<Self> {
        match container.lifetime_of(token) {
            None => Err(Error::UnknownProvider {
                token: token.clone(),
                required_by: None,
            }),
            Some(Lifetime::Singleton) => Ok(Binding::Ready(
                container.resolve_stage::<T>(token, None)?,
            )),
            Some(_) => Ok(Binding::Deferred(token.clone())),
        }
    }

    /// The stage instance for the current request.
    pub fn get(&self, scope: &RequestScope) -> Result<Arc<T>> {
        match self {
            Binding::Ready(stage) => Ok(stage.clone()),
            Binding::Deferred(token) => scope.resolve_stage::<T>(token),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Binding<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Ready(_) => f.write_str("Ready"),
            Binding::Deferred(token) => write!(f, "Deferred({token})"),
        }
    }
}

#[derive(Debug, Clone)]
enum ControllerBinding {
    Ready(Instance),
    Deferred(Token),
}

/// One handler argument with its pipes.
#[derive(Debug)]
pub(crate) struct CompiledParam {
    pub(crate) binding: ParamBinding,
    pub(crate) pipes: Vec<Binding<dyn Pipe>>,
}

/// Public description of a matched route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: HttpMethod,
    /// Full normalized pattern
    pub pattern: String,
    /// `Controller::method`
    pub handler: String,
    pub controller: Token,
}

/// A fully resolved route, ready to execute.
pub struct CompiledRoute {
    info: RouteInfo,
    pattern: PathPattern,
    token: Token,
    controller: ControllerBinding,
    handler: HandlerFn,
    params: Vec<CompiledParam>,
    guards: Vec<Binding<dyn Guard>>,
    interceptors: Vec<Binding<dyn Interceptor>>,
    fast_path: bool,
    order: usize,
}

impl CompiledRoute {
    pub fn info(&self) -> &RouteInfo {
        &self.info
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    /// No guards, interceptors or pipes: the dispatcher calls the handler
    /// straight after matching.
    pub fn is_fast_path(&self) -> bool {
        self.fast_path
    }

    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.len()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub(crate) fn guards(&self) -> &[Binding<dyn Guard>] {
        &self.guards
    }

    pub(crate) fn interceptors(&self) -> &[Binding<dyn Interceptor>] {
        &self.interceptors
    }

    pub(crate) fn params(&self) -> &[CompiledParam] {
        &self.params
    }

    pub(crate) fn handler(&self) -> &HandlerFn {
        &self.handler
    }

    pub(crate) fn token(&self) -> &Token {
        &self.token
    }

    /// The controller instance for the current request.
    pub(crate) fn controller(&self, scope: &RequestScope) -> Result<Instance> {
        match &self.controller {
            ControllerBinding::Ready(instance) => Ok(instance.clone()),
            ControllerBinding::Deferred(token) => scope.resolve(token),
        }
    }

    /// Placeholder route for contexts built outside the dispatcher.
    pub(crate) fn standalone(request: &HttpRequest) -> Self {
        let pattern = PathPattern::parse(&request.path).unwrap_or_else(|_| PathPattern::root());
        let token = Token::from("standalone");
        let handler: HandlerFn = Arc::new(
            |_: crate::HandlerCall| -> BoxFuture<'static, Result<crate::HttpResponse>> {
                Box::pin(async { Ok(crate::HttpResponse::ok()) })
            },
        );
        Self {
            info: RouteInfo {
                method: HttpMethod::from_str(&request.method).unwrap_or(HttpMethod::GET),
                pattern: pattern.as_str().to_string(),
                handler: "standalone".to_string(),
                controller: token.clone(),
            },
            pattern,
            token,
            controller: ControllerBinding::Ready(Instance::new(())),
            handler,
            params: Vec::new(),
            guards: Vec::new(),
            interceptors: Vec::new(),
            fast_path: true,
            order: 0,
        }
    }
}

impl fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("info", &self.info)
            .field("controller", &self.controller)
            .field("params", &self.params)
            .field("guards", &self.guards)
            .field("interceptors", &self.interceptors)
            .field("fast_path", &self.fast_path)
            .finish()
    }
}

/// Result of a successful table lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<CompiledRoute>,
    /// Decoded path parameter values
    pub params: HashMap<String, String>,
}

/// Introspection record for one compiled route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSummary {
    pub method: HttpMethod,
    pub pattern: String,
    pub handler: String,
    pub fast_path: bool,
}

#[derive(Default)]
struct MethodTable {
    /// Parameterless patterns by normalized path
    exact: HashMap<String, Arc<CompiledRoute>>,
    /// Parameterized patterns by segment count, most specific first
    dynamic: HashMap<usize, Vec<Arc<CompiledRoute>>>,
}

/// Immutable dispatch table.
///
/// Lookup tries an exact-path map first, then only the parameterized
/// patterns with the request's segment count. Within that bucket the
/// pattern with a literal at the leftmost differing segment wins; equally
/// specific patterns keep registration order.
#[derive(Default)]
pub struct CompiledRouteTable {
    methods: HashMap<HttpMethod, MethodTable>,
    routes: Vec<Arc<CompiledRoute>>,
}

impl CompiledRouteTable {
    /// Find the route for a verb and path. The path must not carry a query.
    pub fn lookup(&self, method: HttpMethod, path: &str) -> Option<RouteMatch> {
        let table = self.methods.get(&method)?;
        let path = normalize_path(path);

        if let Some(route) = table.exact.get(path.as_ref()) {
            return Some(RouteMatch {
                route: route.clone(),
                params: HashMap::new(),
            });
        }

        let segments = split_segments(&path);
        table
            .dynamic
            .get(&segments.len())?
            .iter()
            .find_map(|route| {
                route.pattern.captures(&segments).map(|params| RouteMatch {
                    route: route.clone(),
                    params,
                })
            })
    }

    /// Every route, in registration order.
    pub fn routes(&self) -> Vec<RouteSummary> {
        self.routes
            .iter()
            .map(|route| RouteSummary {
                method: route.info.method,
                pattern: route.info.pattern.clone(),
                handler: route.info.handler.clone(),
                fast_path: route.fast_path,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn insert(&mut self, route: CompiledRoute) {
        let route = Arc::new(route);
        let table = self.methods.entry(route.info.method).or_default();
        if route.pattern.is_static() {
            table
                .exact
                .insert(route.pattern.as_str().to_string(), route.clone());
        } else {
            table
                .dynamic
                .entry(route.pattern.segment_count())
                .or_default()
                .push(route.clone());
        }
        self.routes.push(route);
    }

    fn sort_buckets(&mut self) {
        for table in self.methods.values_mut() {
            for bucket in table.dynamic.values_mut() {
                bucket.sort_by(|a, b| {
                    a.pattern
                        .specificity_cmp(&b.pattern)
                        .then(a.order.cmp(&b.order))
                });
            }
        }
    }
}

impl fmt::Debug for CompiledRouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledRouteTable")
            .field("routes", &self.routes())
            .finish()
    }
}

/// Turns the merged module registry into a [`CompiledRouteTable`].
///
/// Singleton controllers and stages are resolved here, so construction
/// failures surface at startup rather than on the first request.
pub struct RouteCompiler<'a> {
    container: &'a Container,
}

impl<'a> RouteCompiler<'a> {
    pub fn new(container: &'a Container) -> Self {
        Self { container }
    }

    pub fn compile(&self, registry: &GlobalRegistry) -> Result<CompiledRouteTable> {
        let mut table = CompiledRouteTable::default();
        let mut owners: HashMap<(HttpMethod, String), String> = HashMap::new();

        for controller in &registry.controllers {
            // Bound even without routes so a failing singleton fails the build
            let instance = self.bind_controller(controller)?;
            for descriptor in &controller.routes {
                let route = self.compile_route(controller, &instance, descriptor, table.len())?;

                let key = (route.info.method, route.pattern.shape.clone());
                if let Some(existing) = owners.get(&key) {
                    return Err(Error::RouteConflict {
                        method: route.info.method,
                        pattern: route.info.pattern.clone(),
                        existing: existing.clone(),
                        duplicate: route.info.handler.clone(),
                    });
                }
                owners.insert(key, route.info.handler.clone());

                debug!(
                    method = %route.info.method,
                    pattern = %route.info.pattern,
                    handler = %route.info.handler,
                    fast_path = route.fast_path,
                    "Route compiled"
                );
                table.insert(route);
            }
        }

        table.sort_buckets();
        Ok(table)
    }

    fn bind_controller(&self, controller: &ControllerEntry) -> Result<ControllerBinding> {
        match self.container.lifetime_of(&controller.token) {
            None => Err(Error::UnknownProvider {
                token: controller.token.clone(),
                required_by: None,
            }),
            Some(Lifetime::Singleton) => Ok(ControllerBinding::Ready(
                self.container.resolve(&controller.token)?,
            )),
            Some(_) => Ok(ControllerBinding::Deferred(controller.token.clone())),
        }
    }

    fn compile_route(
        &self,
        controller: &ControllerEntry,
        instance: &ControllerBinding,
        descriptor: &RouteDescriptor,
        order: usize,
    ) -> Result<CompiledRoute> {
        let pattern = PathPattern::parse(&format!("{}/{}", controller.base_path, descriptor.path))?;
        let handler_name = format!("{}::{}", controller.token, descriptor.handler_name);

        let mut params = Vec::with_capacity(descriptor.params.len());
        for binding in &descriptor.params {
            validate_binding(&pattern, binding)?;
            let pipes = binding
                .pipes
                .iter()
                .map(|token| Binding::<dyn Pipe>::compile(self.container, token))
                .collect::<Result<Vec<_>>>()?;
            params.push(CompiledParam {
                binding: binding.clone(),
                pipes,
            });
        }

        // Controller-level stages run before (outside) method-level ones
        let guards = controller
            .guards
            .iter()
            .chain(&descriptor.guards)
            .map(|token| Binding::<dyn Guard>::compile(self.container, token))
            .collect::<Result<Vec<_>>>()?;
        let interceptors = controller
            .interceptors
            .iter()
            .chain(&descriptor.interceptors)
            .map(|token| Binding::<dyn Interceptor>::compile(self.container, token))
            .collect::<Result<Vec<_>>>()?;

        let fast_path =
            guards.is_empty() && interceptors.is_empty() && params.iter().all(|p| p.pipes.is_empty());

        trace!(route = %handler_name, pattern = %pattern, "Compiling route");

        Ok(CompiledRoute {
            info: RouteInfo {
                method: descriptor.method,
                pattern: pattern.as_str().to_string(),
                handler: handler_name,
                controller: controller.token.clone(),
            },
            pattern,
            token: controller.token.clone(),
            controller: instance.clone(),
            handler: descriptor.handler.clone(),
            params,
            guards,
            interceptors,
            fast_path,
            order,
        })
    }
}

fn validate_binding(pattern: &PathPattern, binding: &ParamBinding) -> Result<()> {
    if binding.source.is_raw() && !binding.pipes.is_empty() {
        return Err(invalid(
            pattern.as_str(),
            format!("{} binding cannot have pipes", binding.source.as_str()),
        ));
    }
    if binding.source == ParamSource::Path {
        if let Some(key) = &binding.key {
            if !pattern.param_names.iter().any(|name| name == key) {
                return Err(invalid(
                    pattern.as_str(),
                    format!("handler binds path parameter `{key}`, which the pattern does not declare"),
                ));
            }
        }
    }
    Ok(())
}
