// Application bootstrap, dispatch entry point and hot reload

use crate::{
    CompiledRouteTable, Container, DispatchOptions, HttpRequest, HttpResponse, MetadataRegistry,
    ModuleResolver, RequestDispatcher, Result, RouteCompiler, Token,
};
use arc_swap::ArcSwap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// A compiled application.
///
/// Holds the live [`RequestDispatcher`] behind an atomic pointer. Requests
/// load a snapshot and keep it for their whole lifetime, so a concurrent
/// [`reload`](Self::reload) never changes the table under an in-flight
/// request; new requests see the new table as soon as it is published.
pub struct Application {
    current: ArcSwap<RequestDispatcher>,
    reload_lock: tokio::sync::Mutex<()>,
    options: DispatchOptions,
}

impl Application {
    /// Build the application rooted at `root`.
    ///
    /// Every build-time error (unknown providers, cycles, export
    /// violations, route conflicts, failing singleton constructors) is
    /// returned here; nothing is served from a partial build.
    pub fn compile(registry: &MetadataRegistry, root: &Token, options: DispatchOptions) -> Result<Self> {
        let dispatcher = build(registry, root, options)?;
        Ok(Self {
            current: ArcSwap::from_pointee(dispatcher),
            reload_lock: tokio::sync::Mutex::new(()),
            options,
        })
    }

    /// Dispatch one request against the current table.
    pub async fn dispatch(&self, request: HttpRequest) -> HttpResponse {
        let dispatcher = self.current.load_full();
        dispatcher.dispatch(request).await
    }

    /// Dispatch, abandoning the request if `abort` completes first.
    pub async fn dispatch_cancellable<F>(&self, request: HttpRequest, abort: F) -> Option<HttpResponse>
    where
        F: Future<Output = ()>,
    {
        let dispatcher = self.current.load_full();
        dispatcher.dispatch_cancellable(request, abort).await
    }

    /// Rebuild from the registry's current contents and publish the result.
    ///
    /// Reloads are serialized. On failure the previous table stays live and
    /// the error is returned. The previous container is torn down once the
    /// last request still using it completes.
    pub async fn reload(&self, registry: &MetadataRegistry, root: &Token) -> Result<Arc<CompiledRouteTable>> {
        let _guard = self.reload_lock.lock().await;
        let started = Instant::now();

        match build(registry, root, self.options) {
            Ok(dispatcher) => {
                let table = dispatcher.table().clone();
                self.current.store(Arc::new(dispatcher));
                info!(
                    routes = table.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Application reloaded"
                );
                Ok(table)
            }
            Err(e) => {
                error!(error = %e, "Reload failed, keeping previous routes");
                Err(e)
            }
        }
    }

    /// Snapshot of the current dispatch table.
    pub fn table(&self) -> Arc<CompiledRouteTable> {
        self.current.load().table().clone()
    }

    /// Snapshot of the current container.
    pub fn container(&self) -> Container {
        self.current.load().container().clone()
    }

    /// Snapshot of the current dispatcher.
    pub fn dispatcher(&self) -> Arc<RequestDispatcher> {
        self.current.load_full()
    }

    pub fn options(&self) -> DispatchOptions {
        self.options
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("table", &self.table())
            .field("options", &self.options)
            .finish()
    }
}

/// Compile the application rooted at `root` with default options.
pub fn compile_application(registry: &MetadataRegistry, root: &Token) -> Result<Application> {
    Application::compile(registry, root, DispatchOptions::default())
}

fn build(registry: &MetadataRegistry, root: &Token, options: DispatchOptions) -> Result<RequestDispatcher> {
    let started = Instant::now();

    let global = ModuleResolver::new(registry).build(root)?;
    let container = Container::new(global.providers.iter().cloned())?;
    let table = RouteCompiler::new(&container).compile(&global)?;

    info!(
        root = %root,
        providers = container.tokens().len(),
        controllers = global.controllers.len(),
        routes = table.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Application compiled"
    );
    Ok(RequestDispatcher::new(Arc::new(table), container, options))
}
