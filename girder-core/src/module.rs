//! Module composition and export visibility.
//!
//! Modules group providers and controllers and compose through imports.
//! A module sees its own providers, the exports of the modules it imports,
//! and the exports of global modules. Everything else is private to the
//! module that provides it.
//!
//! ```rust
//! use girder_core::{MetadataRegistry, ModuleBuilder, ModuleResolver, ProviderDescriptor};
//!
//! struct Database;
//! struct UserService;
//!
//! let registry = MetadataRegistry::new();
//! ModuleBuilder::new("DatabaseModule")
//!     .provider(ProviderDescriptor::provide("Database", |_| Ok(Database)))
//!     .export("Database")
//!     .register(&registry);
//! let root = ModuleBuilder::new("AppModule")
//!     .import("DatabaseModule")
//!     .provider(ProviderDescriptor::provide("UserService", |_| Ok(UserService)).depends_on(["Database"]))
//!     .register(&registry);
//!
//! let global = ModuleResolver::new(&registry).build(&root.id).unwrap();
//! assert_eq!(global.providers.len(), 2);
//! ```
//!
//! Import cycles between modules are allowed; each module is visited once.

use crate::controller::ControllerBuilder;
use crate::{
    ControllerDescriptor, Error, MetadataKind, MetadataRegistry, ModuleDescriptor,
    ProviderDescriptor, Result, RouteDescriptor, Token,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Fluent builder that writes a module and its members into a
/// [`MetadataRegistry`].
pub struct ModuleBuilder {
    descriptor: ModuleDescriptor,
    providers: Vec<ProviderDescriptor>,
    controllers: Vec<ControllerBuilder>,
    export_all: bool,
}

impl ModuleBuilder {
    pub fn new(id: impl Into<Token>) -> Self {
        Self {
            descriptor: ModuleDescriptor::new(id),
            providers: Vec::new(),
            controllers: Vec::new(),
            export_all: false,
        }
    }

    pub fn provider(mut self, provider: ProviderDescriptor) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn providers(mut self, providers: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn controller(mut self, controller: ControllerBuilder) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Import another module by id
    pub fn import(mut self, module: impl Into<Token>) -> Self {
        self.descriptor.imports.push(module.into());
        self
    }

    /// Export a provider, a token re-exported from an import, or a whole
    /// imported module.
    pub fn export(mut self, token: impl Into<Token>) -> Self {
        self.descriptor.exports.push(token.into());
        self
    }

    /// Export every provider this module registers
    pub fn export_all(mut self) -> Self {
        self.export_all = true;
        self
    }

    /// Make this module's exports visible everywhere without an import
    pub fn global(mut self) -> Self {
        self.descriptor.global = true;
        self
    }

    /// Write the module, its providers and its controllers into `registry`.
    pub fn register(self, registry: &MetadataRegistry) -> ModuleDescriptor {
        let mut descriptor = self.descriptor;

        for provider in self.providers {
            let token = provider.token.clone();
            if self.export_all && !descriptor.exports.contains(&token) {
                descriptor.exports.push(token.clone());
            }
            if !descriptor.providers.contains(&token) {
                descriptor.providers.push(token.clone());
            }
            registry.register_class_metadata(token, MetadataKind::Provider, provider);
        }

        for controller in self.controllers {
            let token = controller.register(registry);
            if !descriptor.controllers.contains(&token) {
                descriptor.controllers.push(token);
            }
        }

        debug!(
            module = %descriptor.id,
            providers = descriptor.providers.len(),
            controllers = descriptor.controllers.len(),
            "Module registered"
        );
        registry.register_class_metadata(
            descriptor.id.clone(),
            MetadataKind::Module,
            descriptor.clone(),
        );
        descriptor
    }
}

/// A controller after module resolution, with its routes attached.
#[derive(Debug, Clone)]
pub struct ControllerEntry {
    /// Module that declared the controller
    pub module: Token,
    pub token: Token,
    pub base_path: String,
    /// Controller-level guards, in order
    pub guards: Vec<Token>,
    /// Controller-level interceptors, in order
    pub interceptors: Vec<Token>,
    pub routes: Vec<RouteDescriptor>,
}

/// Flattened, visibility-checked view of a module graph.
#[derive(Debug, Clone, Default)]
pub struct GlobalRegistry {
    /// Every provider, controllers included, in module post-order
    pub providers: Vec<ProviderDescriptor>,
    pub controllers: Vec<ControllerEntry>,
}

/// Walks the import graph from a root module and merges it into a
/// [`GlobalRegistry`].
pub struct ModuleResolver<'a> {
    registry: &'a MetadataRegistry,
}

impl<'a> ModuleResolver<'a> {
    pub fn new(registry: &'a MetadataRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, root: &Token) -> Result<GlobalRegistry> {
        let mut modules = Vec::new();
        let mut seen = HashSet::new();
        self.collect(root, None, &mut seen, &mut modules)?;

        let exports = compute_exports(&modules)?;

        // Which module provides each token, first in post-order
        let mut producers: HashMap<&Token, &Token> = HashMap::new();
        for module in &modules {
            for token in module.providers.iter().chain(&module.controllers) {
                producers.entry(token).or_insert(&module.id);
            }
        }

        let globals: Vec<&Token> = modules.iter().filter(|m| m.global).map(|m| &m.id).collect();

        let mut global = GlobalRegistry::default();
        let mut registered: HashSet<Token> = HashSet::new();

        for module in &modules {
            let visible = visible_tokens(module, &exports, &globals);
            let check = |token: &Token, owner: &Token| -> Result<()> {
                if visible.contains(token) {
                    return Ok(());
                }
                match producers.get(token) {
                    Some(producer) => Err(Error::ModuleExportViolation {
                        consumer: module.id.clone(),
                        producer: (*producer).clone(),
                        token: token.clone(),
                    }),
                    None => Err(Error::UnknownProvider {
                        token: token.clone(),
                        required_by: Some(owner.clone()),
                    }),
                }
            };

            for token in &module.providers {
                let provider = self.provider(token, &module.id)?;
                for dependency in &provider.dependencies {
                    check(dependency, token)?;
                }
                if registered.insert(token.clone()) {
                    global.providers.push(provider);
                }
            }

            for token in &module.controllers {
                let provider = self.provider(token, &module.id)?;
                let entry = self.controller_entry(module, token)?;

                for dependency in &provider.dependencies {
                    check(dependency, token)?;
                }
                for stage in entry.guards.iter().chain(&entry.interceptors) {
                    check(stage, token)?;
                }
                for route in &entry.routes {
                    let stages = route
                        .guards
                        .iter()
                        .chain(&route.interceptors)
                        .chain(route.params.iter().flat_map(|p| &p.pipes));
                    for stage in stages {
                        check(stage, token)?;
                    }
                }

                if registered.insert(token.clone()) {
                    global.providers.push(provider);
                    global.controllers.push(entry);
                }
            }

            trace!(module = %module.id, visible = visible.len(), "Module visibility checked");
        }

        debug!(
            root = %root,
            modules = modules.len(),
            providers = global.providers.len(),
            controllers = global.controllers.len(),
            "Module graph resolved"
        );
        Ok(global)
    }

    /// Depth-first, imports before importers.
    fn collect(
        &self,
        id: &Token,
        imported_by: Option<&Token>,
        seen: &mut HashSet<Token>,
        out: &mut Vec<Arc<ModuleDescriptor>>,
    ) -> Result<()> {
        if !seen.insert(id.clone()) {
            return Ok(());
        }
        let module = self
            .registry
            .query::<ModuleDescriptor>(id, MetadataKind::Module)
            .ok_or_else(|| Error::UnknownModule {
                module: id.clone(),
                imported_by: imported_by.cloned(),
            })?;

        for import in &module.imports {
            self.collect(import, Some(id), seen, out)?;
        }
        out.push(module);
        Ok(())
    }

    fn provider(&self, token: &Token, module: &Token) -> Result<ProviderDescriptor> {
        self.registry
            .query::<ProviderDescriptor>(token, MetadataKind::Provider)
            .map(|p| (*p).clone())
            .ok_or_else(|| Error::UnknownProvider {
                token: token.clone(),
                required_by: Some(module.clone()),
            })
    }

    fn controller_entry(&self, module: &ModuleDescriptor, token: &Token) -> Result<ControllerEntry> {
        let descriptor = self
            .registry
            .query::<ControllerDescriptor>(token, MetadataKind::Controller)
            .ok_or_else(|| Error::UnknownProvider {
                token: token.clone(),
                required_by: Some(module.id.clone()),
            })?;

        let stage_list = |kind| {
            self.registry
                .query::<Vec<Token>>(token, kind)
                .map(|tokens| (*tokens).clone())
                .unwrap_or_default()
        };

        let routes = self
            .registry
            .method_names(token)
            .iter()
            .filter_map(|name| {
                self.registry
                    .query_method::<RouteDescriptor>(token, name, MetadataKind::Route)
            })
            .map(|route| (*route).clone())
            .collect();

        Ok(ControllerEntry {
            module: module.id.clone(),
            token: token.clone(),
            base_path: descriptor.base_path.clone(),
            guards: stage_list(MetadataKind::Guards),
            interceptors: stage_list(MetadataKind::Interceptors),
            routes,
        })
    }
}

/// Exported token set per module.
///
/// Evaluated to a fixed point so re-exports through import cycles settle,
/// then every declared export is checked.
fn compute_exports(modules: &[Arc<ModuleDescriptor>]) -> Result<HashMap<Token, HashSet<Token>>> {
    let mut exports: HashMap<Token, HashSet<Token>> = modules
        .iter()
        .map(|m| (m.id.clone(), HashSet::new()))
        .collect();

    loop {
        let mut changed = false;
        for module in modules {
            let mut set = HashSet::new();
            for token in &module.exports {
                if module.providers.contains(token) {
                    set.insert(token.clone());
                } else if module.imports.contains(token) {
                    set.extend(exports[token].iter().cloned());
                } else if module
                    .imports
                    .iter()
                    .any(|import| exports[import].contains(token))
                {
                    set.insert(token.clone());
                }
            }
            if set.len() != exports[&module.id].len() {
                exports.insert(module.id.clone(), set);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    for module in modules {
        for token in &module.exports {
            let satisfied = module.providers.contains(token)
                || module.imports.contains(token)
                || module
                    .imports
                    .iter()
                    .any(|import| exports[import].contains(token));
            if !satisfied {
                return Err(Error::InvalidExport {
                    module: module.id.clone(),
                    token: token.clone(),
                });
            }
        }
    }

    Ok(exports)
}

fn visible_tokens(
    module: &ModuleDescriptor,
    exports: &HashMap<Token, HashSet<Token>>,
    globals: &[&Token],
) -> HashSet<Token> {
    let mut visible: HashSet<Token> = module.providers.iter().cloned().collect();
    for import in &module.imports {
        visible.extend(exports[import].iter().cloned());
    }
    for global in globals {
        visible.extend(exports[*global].iter().cloned());
    }
    visible
}
