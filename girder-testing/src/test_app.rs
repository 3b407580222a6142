// Test application builder

use crate::{TestClient, TestRequest, TestResponse};
use girder_core::{
    Application, Container, DispatchOptions, Error, MetadataKind, MetadataRegistry, ModuleBuilder,
    ProviderDescriptor, Result, Token,
};
use serde::Serialize;
use std::sync::Arc;

/// A compiled application wired for in-process requests.
pub struct TestApp {
    app: Arc<Application>,
    registry: MetadataRegistry,
    root: Token,
}

impl TestApp {
    /// Compile `root`, which must already be registered in `registry`.
    pub fn new(registry: MetadataRegistry, root: impl Into<Token>) -> Result<Self> {
        Self::with_options(registry, root, DispatchOptions { expose_error_details: true })
    }

    pub fn with_options(
        registry: MetadataRegistry,
        root: impl Into<Token>,
        options: DispatchOptions,
    ) -> Result<Self> {
        let root = root.into();
        let app = Application::compile(&registry, &root, options)?;
        Ok(Self {
            app: Arc::new(app),
            registry,
            root,
        })
    }

    /// Client sharing this application
    pub fn client(&self) -> TestClient {
        TestClient::new(self.app.clone())
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.client().get(path).await
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<TestResponse> {
        self.client().post_json(path, body).await
    }

    pub async fn request(&self, request: TestRequest) -> TestResponse {
        self.client().send(request).await
    }

    pub fn application(&self) -> &Arc<Application> {
        &self.app
    }

    /// Container of the live table
    pub fn container(&self) -> Container {
        self.app.container()
    }

    /// Resolve a provider from the live container
    pub fn resolve<T: Send + Sync + 'static>(&self, token: impl Into<Token>) -> Result<Arc<T>> {
        self.app.container().get::<T>(&token.into())
    }

    /// Registry the application was compiled from
    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    /// Replace a provider and recompile in place.
    pub async fn override_and_reload(&self, provider: ProviderDescriptor) -> Result<()> {
        override_provider(&self.registry, provider)?;
        self.app.reload(&self.registry, &self.root).await.map(|_| ())
    }
}

/// Builds a [`TestApp`] from modules, with provider overrides.
///
/// ```
/// use girder_core::{ModuleBuilder, ProviderDescriptor};
/// use girder_testing::TestAppBuilder;
///
/// struct Mailer(&'static str);
///
/// let app = TestAppBuilder::new(
///     ModuleBuilder::new("AppModule")
///         .provider(ProviderDescriptor::provide("Mailer", |_| Ok(Mailer("smtp")))),
/// )
/// .override_provider(ProviderDescriptor::value("Mailer", Mailer("fake")))
/// .build()
/// .unwrap();
///
/// assert_eq!(app.resolve::<Mailer>("Mailer").unwrap().0, "fake");
/// ```
pub struct TestAppBuilder {
    root: ModuleBuilder,
    modules: Vec<ModuleBuilder>,
    overrides: Vec<ProviderDescriptor>,
    options: DispatchOptions,
}

impl TestAppBuilder {
    pub fn new(root: ModuleBuilder) -> Self {
        Self {
            root,
            modules: Vec::new(),
            overrides: Vec::new(),
            options: DispatchOptions { expose_error_details: true },
        }
    }

    /// Register a module the root imports
    pub fn module(mut self, module: ModuleBuilder) -> Self {
        self.modules.push(module);
        self
    }

    /// Replace the provider with the same token, keeping the module that
    /// declares it and its export visibility.
    pub fn override_provider(mut self, provider: ProviderDescriptor) -> Self {
        self.overrides.push(provider);
        self
    }

    pub fn options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<TestApp> {
        let registry = MetadataRegistry::new();
        for module in self.modules {
            module.register(&registry);
        }
        let root = self.root.register(&registry);
        for provider in self.overrides {
            override_provider(&registry, provider)?;
        }
        TestApp::with_options(registry, root.id, self.options)
    }
}

fn override_provider(registry: &MetadataRegistry, provider: ProviderDescriptor) -> Result<()> {
    if !registry.contains(&provider.token, MetadataKind::Provider) {
        return Err(Error::UnknownProvider {
            token: provider.token.clone(),
            required_by: None,
        });
    }
    registry.register_class_metadata(provider.token.clone(), MetadataKind::Provider, provider);
    Ok(())
}
