// Per-request execution context shared by guards, interceptors and pipes

use crate::routing::{CompiledRoute, RouteInfo};
use crate::{Container, Extensions, HttpRequest, Instance, RequestScope, ResponseDraft, Result, Token};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a pipeline stage may inspect about the request in flight.
///
/// Owns the request scope: request-scoped instances live exactly as long as
/// the context, and are released when it is dropped.
pub struct RequestContext {
    id: Uuid,
    request: Arc<HttpRequest>,
    route: Arc<CompiledRoute>,
    extensions: RwLock<Extensions>,
    response: ResponseDraft,
    scope: RequestScope,
}

impl RequestContext {
    pub(crate) fn new(
        id: Uuid,
        request: Arc<HttpRequest>,
        route: Arc<CompiledRoute>,
        scope: RequestScope,
    ) -> Self {
        Self {
            id,
            request,
            route,
            extensions: RwLock::new(Extensions::new()),
            response: ResponseDraft::new(),
            scope,
        }
    }

    /// A context outside the dispatch pipeline, for exercising one stage on
    /// its own. The route info echoes the request's verb and path.
    pub fn standalone(request: HttpRequest, container: &Container) -> Self {
        let route = CompiledRoute::standalone(&request);
        Self::new(
            Uuid::new_v4(),
            Arc::new(request),
            Arc::new(route),
            container.create_scope(),
        )
    }

    /// Correlation id, also recorded on the request's tracing span.
    pub fn request_id(&self) -> Uuid {
        self.id
    }

    /// The request with path and query parameters filled in.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub(crate) fn request_arc(&self) -> Arc<HttpRequest> {
        self.request.clone()
    }

    /// Verb, pattern and handler name of the matched route.
    pub fn route(&self) -> &RouteInfo {
        self.route.info()
    }

    pub(crate) fn compiled(&self) -> &CompiledRoute {
        &self.route
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.request.header(name)
    }

    pub fn param(&self, name: &str) -> Option<&String> {
        self.request.param(name)
    }

    pub fn query(&self, name: &str) -> Option<&String> {
        self.request.query(name)
    }

    /// Attach typed state for later stages and the handler.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.extensions.write().insert(value);
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.extensions.read().get_arc::<T>()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.extensions.read().contains::<T>()
    }

    /// Status and headers to merge into the final response.
    pub fn response(&self) -> &ResponseDraft {
        &self.response
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }

    /// Resolve any provider, request-scoped ones through this request's scope.
    pub fn resolve(&self, token: &Token) -> Result<Instance> {
        self.scope.resolve(token)
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("route", self.route())
            .field("scope", &self.scope)
            .finish()
    }
}
