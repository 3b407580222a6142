// Application settings

use crate::{ConfigError, ConfigLoader, Result};
use girder_core::DispatchOptions;
use girder_core::logging::{LogConfig, LogFormat, LogLevel, LogOutput};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(format!("unknown environment `{other}`")),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `[log]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: String,
    /// Log file path; stdout when unset
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
            file: None,
        }
    }
}

/// Settings for one Girder application.
///
/// ```
/// use girder_config::{AppConfig, Environment};
///
/// let config = AppConfig::from_toml_str(r#"
///     environment = "production"
///
///     [log]
///     level = "warn"
///     format = "json"
/// "#).unwrap();
///
/// assert_eq!(config.environment, Environment::Production);
/// assert!(!config.dispatch_options().expose_error_details);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    /// Include error chains in error responses; defaults to on in development
    pub expose_error_details: Option<bool>,
    pub log: LogSettings,
}

impl AppConfig {
    /// Defaults, then `girder.toml` if present, then `.env`, then the
    /// process environment.
    pub fn load() -> Result<Self> {
        ConfigLoader::new()
            .file_if_exists("girder.toml")
            .dotenv(".env")
            .load()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Apply unprefixed, lowercase overrides such as `log_level`.
    ///
    /// Unknown keys are ignored.
    pub fn apply_vars(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        for (key, value) in vars {
            match key.as_str() {
                "env" | "environment" => {
                    self.environment = value
                        .parse()
                        .map_err(|reason: String| ConfigError::invalid(key, value, reason))?;
                }
                "expose_errors" | "expose_error_details" => {
                    self.expose_error_details = Some(parse_bool(key, value)?);
                }
                "log_level" => self.log.level = value.clone(),
                "log_format" => self.log.format = value.clone(),
                "log_file" => {
                    self.log.file = (!value.is_empty()).then(|| PathBuf::from(value));
                }
                _ => {}
            }
        }
        self.validate()
    }

    /// Check values that are stored as text.
    pub fn validate(&self) -> Result<()> {
        LogLevel::from_str(&self.log.level)
            .map_err(|reason| ConfigError::invalid("log.level", &self.log.level, reason))?;
        LogFormat::from_str(&self.log.format)
            .map_err(|reason| ConfigError::invalid("log.format", &self.log.format, reason))?;
        Ok(())
    }

    pub fn expose_error_details(&self) -> bool {
        self.expose_error_details
            .unwrap_or(self.environment == Environment::Development)
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            expose_error_details: self.expose_error_details(),
        }
    }

    pub fn log_config(&self) -> Result<LogConfig> {
        self.validate()?;
        let level = LogLevel::from_str(&self.log.level)
            .map_err(|reason| ConfigError::invalid("log.level", &self.log.level, reason))?;
        let format = LogFormat::from_str(&self.log.format)
            .map_err(|reason| ConfigError::invalid("log.format", &self.log.format, reason))?;
        let output = match &self.log.file {
            Some(path) => LogOutput::File(path.display().to_string()),
            None => LogOutput::Stdout,
        };

        Ok(LogConfig::new()
            .level(level)
            .format(format)
            .output(output)
            .with_colors(self.environment == Environment::Development && self.log.file.is_none()))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected a boolean")),
    }
}
