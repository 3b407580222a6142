//! Declarative metadata store.
//!
//! The registry replaces annotation syntax with explicit registration calls.
//! Records are keyed by `(token, kind)` at class level and by
//! `(token, method, kind)` at method level.
//!
//! Writes are last-write-wins: registering a key twice replaces the earlier
//! record. A reload therefore observes whatever was registered most
//! recently, so a metadata source can re-register a changed module and call
//! [`Application::reload`](crate::Application::reload) without clearing
//! the registry first. Registering a controller again first clears its
//! method records, so routes it no longer declares disappear.

use crate::Token;
use compact_str::CompactString;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Type-erased metadata record.
pub type MetadataValue = Arc<dyn Any + Send + Sync>;

/// Category of a metadata record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    /// [`ModuleDescriptor`](crate::ModuleDescriptor)
    Module,
    /// [`ProviderDescriptor`](crate::ProviderDescriptor)
    Provider,
    /// [`ControllerDescriptor`](crate::ControllerDescriptor)
    Controller,
    /// [`RouteDescriptor`](crate::RouteDescriptor), method level
    Route,
    /// Ordered guard tokens (`Vec<Token>`), class level
    Guards,
    /// Ordered interceptor tokens (`Vec<Token>`), class level
    Interceptors,
    /// Anything else a metadata source wants to attach
    Custom(&'static str),
}

type MethodKey = (Token, CompactString, MetadataKind);

/// Store for class and method metadata.
#[derive(Default)]
pub struct MetadataRegistry {
    classes: RwLock<HashMap<(Token, MetadataKind), MetadataValue>>,
    methods: RwLock<HashMap<MethodKey, MetadataValue>>,
    /// Method names per class in first-registration order
    method_order: RwLock<HashMap<Token, Vec<CompactString>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `data` to a class-level key, replacing any earlier record.
    pub fn register_class_metadata<T: Send + Sync + 'static>(
        &self,
        token: impl Into<Token>,
        kind: MetadataKind,
        data: T,
    ) {
        let token = token.into();
        let previous = self
            .classes
            .write()
            .insert((token.clone(), kind), Arc::new(data));
        if previous.is_some() {
            debug!(token = %token, kind = ?kind, "Class metadata overwritten");
        } else {
            trace!(token = %token, kind = ?kind, "Class metadata registered");
        }
    }

    /// Attach `data` to a method-level key, replacing any earlier record.
    pub fn register_method_metadata<T: Send + Sync + 'static>(
        &self,
        token: impl Into<Token>,
        method: &str,
        kind: MetadataKind,
        data: T,
    ) {
        let token = token.into();
        let method = CompactString::new(method);

        {
            let mut order = self.method_order.write();
            let names = order.entry(token.clone()).or_default();
            if !names.contains(&method) {
                names.push(method.clone());
            }
        }

        let previous = self
            .methods
            .write()
            .insert((token.clone(), method.clone(), kind), Arc::new(data));
        if previous.is_some() {
            debug!(token = %token, method = %method, kind = ?kind, "Method metadata overwritten");
        } else {
            trace!(token = %token, method = %method, kind = ?kind, "Method metadata registered");
        }
    }

    /// Look up a class-level record as `T`.
    ///
    /// Returns `None` when the key is absent or holds a different type.
    pub fn query<T: Send + Sync + 'static>(&self, token: &Token, kind: MetadataKind) -> Option<Arc<T>> {
        self.classes
            .read()
            .get(&(token.clone(), kind))
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Look up a method-level record as `T`.
    pub fn query_method<T: Send + Sync + 'static>(
        &self,
        token: &Token,
        method: &str,
        kind: MetadataKind,
    ) -> Option<Arc<T>> {
        self.methods
            .read()
            .get(&(token.clone(), CompactString::new(method), kind))
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Raw class-level record.
    pub fn query_raw(&self, token: &Token, kind: MetadataKind) -> Option<MetadataValue> {
        self.classes.read().get(&(token.clone(), kind)).cloned()
    }

    pub fn contains(&self, token: &Token, kind: MetadataKind) -> bool {
        self.classes.read().contains_key(&(token.clone(), kind))
    }

    /// Method names with metadata on `token`, in first-registration order.
    pub fn method_names(&self, token: &Token) -> Vec<CompactString> {
        self.method_order
            .read()
            .get(token)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget the method-level records of `token`, keeping its class records.
    pub fn clear_methods(&self, token: &Token) {
        self.methods.write().retain(|(t, _, _), _| t != token);
        if self.method_order.write().remove(token).is_some() {
            debug!(token = %token, "Method metadata cleared");
        }
    }

    /// Forget every record attached to `token`.
    pub fn remove(&self, token: &Token) {
        self.classes.write().retain(|(t, _), _| t != token);
        self.methods.write().retain(|(t, _, _), _| t != token);
        self.method_order.write().remove(token);
        debug!(token = %token, "Metadata removed");
    }
}
