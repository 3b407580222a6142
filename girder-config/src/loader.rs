// Layered configuration loading

use crate::{AppConfig, EnvLoader, Result};
use std::path::PathBuf;
use tracing::{debug, info};

/// Layers configuration sources; later sources win.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<(PathBuf, bool)>,
    dotenv: Option<PathBuf>,
    env: Option<EnvLoader>,
}

impl ConfigLoader {
    /// Reads the process environment with the `GIRDER_` prefix.
    pub fn new() -> Self {
        Self {
            file: None,
            dotenv: None,
            env: Some(EnvLoader::default()),
        }
    }

    /// Required TOML file
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some((path.into(), true));
        self
    }

    /// TOML file, skipped when absent
    pub fn file_if_exists(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some((path.into(), false));
        self
    }

    pub fn dotenv(mut self, path: impl Into<PathBuf>) -> Self {
        self.dotenv = Some(path.into());
        self
    }

    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.env = Some(EnvLoader::new(prefix));
        self
    }

    /// Ignore the process environment
    pub fn without_env(mut self) -> Self {
        self.env = None;
        self
    }

    pub fn load(&self) -> Result<AppConfig> {
        let mut config = match &self.file {
            Some((path, true)) => AppConfig::from_file(path)?,
            Some((path, false)) if path.exists() => AppConfig::from_file(path)?,
            _ => AppConfig::default(),
        };

        let prefix_loader = self.env.clone().unwrap_or_default();
        if let Some(path) = &self.dotenv {
            config.apply_vars(&prefix_loader.load_dotenv(path)?)?;
        }
        if let Some(env) = &self.env {
            config.apply_vars(&env.load())?;
        }

        info!(
            environment = %config.environment,
            log_level = %config.log.level,
            expose_error_details = config.expose_error_details(),
            "Configuration loaded"
        );
        debug!(config = ?config, "Effective configuration");
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
