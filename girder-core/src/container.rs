// Dependency injection container

use crate::token::format_path;
use crate::{Deps, Error, FromInstance, Instance, Lifetime, ProviderDescriptor, Result, Token};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, trace, warn};

/// Tokens currently being constructed by one resolution call.
type ResolutionPath = SmallVec<[Token; 8]>;

/// The dependency injection container
///
/// Built once from an immutable set of [`ProviderDescriptor`]s. Construction
/// validates the whole graph up front: unknown dependencies, cycles and
/// singletons capturing request-scoped providers are reported before any
/// instance exists.
///
/// Cloning a `Container` clones a handle; all clones share one singleton
/// cache. Singleton teardown hooks run when the last handle is dropped.
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
}

struct ContainerInner {
    descriptors: HashMap<Token, ProviderDescriptor>,
    /// Registration order, used for deterministic validation and listing
    order: Vec<Token>,
    /// One cell per singleton token, allocated up front so steady-state
    /// reads never take a lock
    singletons: HashMap<Token, OnceCell<Instance>>,
    /// Singletons in construction order, for teardown
    constructed: Mutex<Vec<(Token, Instance)>>,
    next_scope_id: AtomicU64,
}

impl Container {
    /// Build a container from provider descriptors.
    ///
    /// A token registered twice keeps its last descriptor.
    pub fn new<I>(descriptors: I) -> Result<Self>
    where
        I: IntoIterator<Item = ProviderDescriptor>,
    {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for descriptor in descriptors {
            trace!(provider = %descriptor.token, lifetime = %descriptor.lifetime, "Registering provider");
            if map.insert(descriptor.token.clone(), descriptor.clone()).is_none() {
                order.push(descriptor.token);
            }
        }

        validate_graph(&map, &order)?;

        let singletons = map
            .values()
            .filter(|d| d.lifetime == Lifetime::Singleton)
            .map(|d| (d.token.clone(), OnceCell::new()))
            .collect();

        debug!(provider_count = order.len(), "DI container built");

        Ok(Self {
            inner: Arc::new(ContainerInner {
                descriptors: map,
                order,
                singletons,
                constructed: Mutex::new(Vec::new()),
                next_scope_id: AtomicU64::new(1),
            }),
        })
    }

    /// An empty container.
    pub fn empty() -> Self {
        // An empty graph cannot fail validation
        Self::new(std::iter::empty()).unwrap_or_else(|_| unreachable!())
    }

    /// Resolve a token outside of any request.
    pub fn resolve(&self, token: &Token) -> Result<Instance> {
        self.resolve_in(token, None)
    }

    /// Resolve a token, using `scope` for request-scoped providers.
    pub fn resolve_in(&self, token: &Token, scope: Option<&RequestScope>) -> Result<Instance> {
        if let Some(scope) = scope {
            debug_assert!(
                Arc::ptr_eq(&scope.container, &self.inner),
                "request scope belongs to another container"
            );
        }
        let mut path = ResolutionPath::new();
        self.resolve_with(token, scope, &mut path)
    }

    /// Resolve and downcast to a concrete type.
    pub fn get<T: Send + Sync + 'static>(&self, token: &Token) -> Result<Arc<T>> {
        let instance = self.resolve(token)?;
        instance.downcast::<T>().ok_or_else(|| Error::TypeMismatch {
            token: token.clone(),
            expected: std::any::type_name::<T>(),
        })
    }

    /// Resolve a guard, interceptor or pipe as its trait object.
    pub fn resolve_stage<S: FromInstance + ?Sized>(
        &self,
        token: &Token,
        scope: Option<&RequestScope>,
    ) -> Result<Arc<S>> {
        let instance = self.resolve_in(token, scope)?;
        S::from_instance(&instance).ok_or_else(|| Error::TypeMismatch {
            token: token.clone(),
            expected: S::KIND,
        })
    }

    /// Open a request scope owned by a single in-flight request.
    pub fn create_scope(&self) -> RequestScope {
        let id = self.inner.next_scope_id.fetch_add(1, Ordering::Relaxed);
        trace!(scope_id = id, "Request scope opened");
        RequestScope {
            id,
            container: self.inner.clone(),
            cache: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Check if a provider is registered
    pub fn contains(&self, token: &Token) -> bool {
        self.inner.descriptors.contains_key(token)
    }

    pub fn lifetime_of(&self, token: &Token) -> Option<Lifetime> {
        self.inner.descriptors.get(token).map(|d| d.lifetime)
    }

    pub fn descriptor(&self, token: &Token) -> Option<&ProviderDescriptor> {
        self.inner.descriptors.get(token)
    }

    /// Registered tokens in registration order.
    pub fn tokens(&self) -> &[Token] {
        &self.inner.order
    }

    /// Number of singletons constructed so far.
    pub fn singleton_count(&self) -> usize {
        self.inner.constructed.lock().len()
    }

    fn resolve_with(
        &self,
        token: &Token,
        scope: Option<&RequestScope>,
        path: &mut ResolutionPath,
    ) -> Result<Instance> {
        let descriptor =
            self.inner
                .descriptors
                .get(token)
                .ok_or_else(|| Error::UnknownProvider {
                    token: token.clone(),
                    required_by: path.last().cloned(),
                })?;

        match descriptor.lifetime {
            Lifetime::Singleton => self.resolve_singleton(descriptor, path),
            Lifetime::RequestScoped => {
                let scope = scope.ok_or_else(|| Error::MissingRequestScope {
                    token: token.clone(),
                })?;
                if let Some(instance) = scope.cached(token) {
                    return Ok(instance);
                }
                enter(path, token)?;
                let constructed = self.construct(descriptor, Some(scope), path);
                path.pop();
                Ok(scope.store(token, constructed?))
            }
            Lifetime::Transient => {
                enter(path, token)?;
                let constructed = self.construct(descriptor, scope, path);
                path.pop();
                constructed
            }
        }
    }

    fn resolve_singleton(
        &self,
        descriptor: &ProviderDescriptor,
        path: &mut ResolutionPath,
    ) -> Result<Instance> {
        let token = &descriptor.token;
        let Some(cell) = self.inner.singletons.get(token) else {
            return Err(Error::UnknownProvider {
                token: token.clone(),
                required_by: path.last().cloned(),
            });
        };

        if let Some(instance) = cell.get() {
            return Ok(instance.clone());
        }

        // The path check must precede the cell: re-entering a cell that this
        // call is already initializing would block forever.
        enter(path, token)?;
        let result = cell
            .get_or_try_init(|| {
                // Singletons never see the caller's request scope; validation
                // guarantees they do not need one.
                let instance = self.construct(descriptor, None, path)?;
                debug!(provider = %token, "Singleton constructed");
                self.inner
                    .constructed
                    .lock()
                    .push((token.clone(), instance.clone()));
                Ok::<_, Error>(instance)
            })
            .cloned();
        path.pop();
        result
    }

    fn construct(
        &self,
        descriptor: &ProviderDescriptor,
        scope: Option<&RequestScope>,
        path: &mut ResolutionPath,
    ) -> Result<Instance> {
        let mut instances = Vec::with_capacity(descriptor.dependencies.len());
        for dependency in &descriptor.dependencies {
            instances.push(self.resolve_with(dependency, scope, path)?);
        }

        trace!(provider = %descriptor.token, "Invoking provider factory");
        let deps = Deps::new(&descriptor.token, &descriptor.dependencies, &instances);
        (descriptor.factory)(&deps).map_err(|source| Error::Constructor {
            token: descriptor.token.clone(),
            source,
        })
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("providers", &self.inner.order)
            .field("singletons_constructed", &self.singleton_count())
            .finish()
    }
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        let constructed = std::mem::take(self.constructed.get_mut());
        for (token, instance) in constructed.into_iter().rev() {
            if let Some(hook) = self.descriptors.get(&token).and_then(|d| d.teardown.as_ref()) {
                if let Err(source) = hook(&instance) {
                    let error = Error::Teardown { token, source };
                    warn!(error = %error, "Singleton teardown failed");
                }
            }
        }
    }
}

fn enter(path: &mut ResolutionPath, token: &Token) -> Result<()> {
    if let Some(start) = path.iter().position(|t| t == token) {
        let mut cycle: Vec<Token> = path[start..].to_vec();
        cycle.push(token.clone());
        return Err(Error::CircularDependency { path: cycle });
    }
    path.push(token.clone());
    Ok(())
}

/// Per-request instance cache.
///
/// Owned by exactly one in-flight request. Entries are released, and their
/// teardown hooks run in reverse creation order, by [`RequestScope::close`]
/// or, on any path that skips it, when the scope is dropped.
pub struct RequestScope {
    id: u64,
    container: Arc<ContainerInner>,
    cache: Mutex<Vec<(Token, Instance)>>,
    closed: AtomicBool,
}

impl RequestScope {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resolve a token through this scope.
    pub fn resolve(&self, token: &Token) -> Result<Instance> {
        self.container().resolve_in(token, Some(self))
    }

    /// Resolve a guard, interceptor or pipe through this scope.
    pub fn resolve_stage<S: FromInstance + ?Sized>(&self, token: &Token) -> Result<Arc<S>> {
        self.container().resolve_stage::<S>(token, Some(self))
    }

    /// Number of request-scoped instances currently cached.
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release every cached instance.
    ///
    /// Returns the teardown failures, which are also logged. Closing twice is
    /// a no-op.
    pub fn close(&self) -> Vec<Error> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        let entries = std::mem::take(&mut *self.cache.lock());
        let mut failures = Vec::new();
        for (token, instance) in entries.into_iter().rev() {
            let hook = self
                .container
                .descriptors
                .get(&token)
                .and_then(|d| d.teardown.clone());
            if let Some(hook) = hook {
                if let Err(source) = hook(&instance) {
                    let error = Error::Teardown { token, source };
                    warn!(scope_id = self.id, error = %error, "Request-scoped teardown failed");
                    failures.push(error);
                }
            }
        }
        trace!(scope_id = self.id, "Request scope closed");
        failures
    }

    fn container(&self) -> Container {
        Container {
            inner: self.container.clone(),
        }
    }

    fn cached(&self, token: &Token) -> Option<Instance> {
        self.cache
            .lock()
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, instance)| instance.clone())
    }

    /// Cache `instance`, keeping an existing entry if one raced in first.
    fn store(&self, token: &Token, instance: Instance) -> Instance {
        let mut cache = self.cache.lock();
        if let Some((_, existing)) = cache.iter().find(|(t, _)| t == token) {
            return existing.clone();
        }
        cache.push((token.clone(), instance.clone()));
        instance
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("id", &self.id)
            .field("cached", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Reject unknown dependencies, cycles and captive request-scoped providers.
fn validate_graph(descriptors: &HashMap<Token, ProviderDescriptor>, order: &[Token]) -> Result<()> {
    for token in order {
        for dependency in &descriptors[token].dependencies {
            if !descriptors.contains_key(dependency) {
                return Err(Error::UnknownProvider {
                    token: dependency.clone(),
                    required_by: Some(token.clone()),
                });
            }
        }
    }

    let mut done = HashSet::new();
    let mut path = Vec::new();
    for token in order {
        detect_cycle(descriptors, token, &mut path, &mut done)?;
    }

    let mut needs_scope = HashMap::new();
    for token in order {
        let descriptor = &descriptors[token];
        if descriptor.lifetime != Lifetime::Singleton {
            continue;
        }
        for dependency in &descriptor.dependencies {
            if requires_request_scope(descriptors, dependency, &mut needs_scope) {
                return Err(Error::ScopeViolation {
                    token: token.clone(),
                    lifetime: descriptor.lifetime,
                    dependency: dependency.clone(),
                });
            }
        }
    }

    Ok(())
}

fn detect_cycle(
    descriptors: &HashMap<Token, ProviderDescriptor>,
    token: &Token,
    path: &mut Vec<Token>,
    done: &mut HashSet<Token>,
) -> Result<()> {
    if done.contains(token) {
        return Ok(());
    }
    if let Some(start) = path.iter().position(|t| t == token) {
        let mut cycle = path[start..].to_vec();
        cycle.push(token.clone());
        debug!(cycle = %format_path(&cycle), "Dependency cycle detected");
        return Err(Error::CircularDependency { path: cycle });
    }

    path.push(token.clone());
    for dependency in &descriptors[token].dependencies {
        detect_cycle(descriptors, dependency, path, done)?;
    }
    path.pop();
    done.insert(token.clone());
    Ok(())
}

/// Whether constructing `token` needs a request scope somewhere in its
/// subgraph. Only called on acyclic graphs.
fn requires_request_scope(
    descriptors: &HashMap<Token, ProviderDescriptor>,
    token: &Token,
    memo: &mut HashMap<Token, bool>,
) -> bool {
    if let Some(known) = memo.get(token) {
        return *known;
    }
    let descriptor = &descriptors[token];
    let result = match descriptor.lifetime {
        Lifetime::RequestScoped => true,
        // A singleton's own subgraph is checked on its own
        Lifetime::Singleton => false,
        Lifetime::Transient => descriptor
            .dependencies
            .iter()
            .any(|d| requires_request_scope(descriptors, d, memo)),
    };
    memo.insert(token.clone(), result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Counter(usize);

    #[test]
    fn test_singleton_identity() {
        let container =
            Container::new([ProviderDescriptor::provide("S", |_| Ok(Counter(1)))]).unwrap();
        let a = container.resolve(&"S".into()).unwrap();
        let b = container.resolve(&"S".into()).unwrap();
        assert!(a.ptr_eq(&b));
        assert_eq!(container.singleton_count(), 1);
    }

    #[test]
    fn test_transient_is_fresh() {
        let container = Container::new([
            ProviderDescriptor::provide("T", |_| Ok(Counter(0))).transient(),
        ])
        .unwrap();
        let a = container.resolve(&"T".into()).unwrap();
        let b = container.resolve(&"T".into()).unwrap();
        assert!(!a.ptr_eq(&b));
        assert_eq!(container.singleton_count(), 0);
    }

    #[test]
    fn test_dependencies_are_positional() {
        let container = Container::new([
            ProviderDescriptor::value("A", 1usize),
            ProviderDescriptor::value("B", 2usize),
            ProviderDescriptor::provide("Sum", |deps| {
                Ok(Counter(*deps.get::<usize>(0)? * 10 + *deps.get::<usize>(1)?))
            })
            .depends_on(["A", "B"]),
        ])
        .unwrap();
        assert_eq!(container.get::<Counter>(&"Sum".into()).unwrap().0, 12);
    }

    #[test]
    fn test_unknown_provider() {
        let container = Container::empty();
        let err = container.resolve(&"Missing".into()).unwrap_err();
        assert!(matches!(err, Error::UnknownProvider { required_by: None, .. }));
    }

    #[test]
    fn test_unknown_dependency_fails_build() {
        let err = Container::new([
            ProviderDescriptor::provide("A", |_| Ok(())).depends_on(["Ghost"]),
        ])
        .unwrap_err();
        match err {
            Error::UnknownProvider { token, required_by } => {
                assert_eq!(token.as_str(), "Ghost");
                assert_eq!(required_by.unwrap().as_str(), "A");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_cycle_detected_at_build() {
        let err = Container::new([
            ProviderDescriptor::provide("A", |_| Ok(())).depends_on(["B"]),
            ProviderDescriptor::provide("B", |_| Ok(())).depends_on(["A"]),
        ])
        .unwrap_err();
        assert_eq!(err.to_string(), "Circular dependency: A -> B -> A");
    }

    #[test]
    fn test_self_cycle_on_transient() {
        let err = Container::new([
            ProviderDescriptor::provide("T", |_| Ok(())).transient().depends_on(["T"]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::CircularDependency { ref path } if path.len() == 2));
    }

    #[test]
    fn test_scope_violation() {
        let err = Container::new([
            ProviderDescriptor::provide("Req", |_| Ok(())).request_scoped(),
            ProviderDescriptor::provide("Mid", |_| Ok(())).transient().depends_on(["Req"]),
            ProviderDescriptor::provide("Single", |_| Ok(())).depends_on(["Mid"]),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::ScopeViolation { ref token, .. } if token.as_str() == "Single"));
    }

    #[test]
    fn test_constructor_error_names_token() {
        let container = Container::new([ProviderDescriptor::new("Broken", |_| {
            Err("connection refused".into())
        })])
        .unwrap();
        let err = container.resolve(&"Broken".into()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Failed to construct `Broken`: connection refused"
        );
    }

    #[test]
    fn test_failed_singleton_can_retry() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        let container = Container::new([ProviderDescriptor::new("Flaky", move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Err("first attempt".into())
            } else {
                Ok(Instance::new(()))
            }
        })])
        .unwrap();

        assert!(container.resolve(&"Flaky".into()).is_err());
        assert!(container.resolve(&"Flaky".into()).is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_request_scope_requires_scope() {
        let container = Container::new([
            ProviderDescriptor::provide("Req", |_| Ok(())).request_scoped(),
        ])
        .unwrap();
        let err = container.resolve(&"Req".into()).unwrap_err();
        assert!(matches!(err, Error::MissingRequestScope { .. }));
    }

    #[test]
    fn test_request_scope_caches_per_scope() {
        let container = Container::new([
            ProviderDescriptor::provide("Req", |_| Ok(Counter(0))).request_scoped(),
        ])
        .unwrap();
        let token = Token::from("Req");

        let first = container.create_scope();
        let second = container.create_scope();
        let a = first.resolve(&token).unwrap();
        let b = first.resolve(&token).unwrap();
        let c = second.resolve(&token).unwrap();

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_scope_teardown_reverse_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (l1, l2) = (log.clone(), log.clone());
        let container = Container::new([
            ProviderDescriptor::provide("Inner", |_| Ok(()))
                .request_scoped()
                .on_teardown(move |_| {
                    l1.lock().push("Inner");
                    Ok(())
                }),
            ProviderDescriptor::provide("Outer", |_| Ok(()))
                .request_scoped()
                .depends_on(["Inner"])
                .on_teardown(move |_| {
                    l2.lock().push("Outer");
                    Err("flush failed".into())
                }),
        ])
        .unwrap();

        let scope = container.create_scope();
        scope.resolve(&"Outer".into()).unwrap();
        assert_eq!(scope.len(), 2);

        let failures = scope.close();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], Error::Teardown { .. }));
        assert_eq!(*log.lock(), vec!["Outer", "Inner"]);
        assert!(scope.is_closed());
        assert!(scope.close().is_empty());
    }

    #[test]
    fn test_scope_released_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let container = Container::new([ProviderDescriptor::provide("Req", |_| Ok(()))
            .request_scoped()
            .on_teardown(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })])
        .unwrap();

        {
            let scope = container.create_scope();
            scope.resolve(&"Req".into()).unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_singleton_teardown_on_last_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let container = Container::new([ProviderDescriptor::provide("S", |_| Ok(()))
            .on_teardown(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })])
        .unwrap();
        container.resolve(&"S".into()).unwrap();

        let clone = container.clone();
        drop(container);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_resolution_constructs_once() {
        let constructed = Arc::new(AtomicUsize::new(0));
        let counter = constructed.clone();
        let container = Container::new([ProviderDescriptor::new("Slow", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(Instance::new(()))
        })])
        .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = container.clone();
                std::thread::spawn(move || container.resolve(&"Slow".into()).unwrap())
            })
            .collect();
        let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|w| w[0].ptr_eq(&w[1])));
    }
}
