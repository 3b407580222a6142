// Environment variable and .env loading

use crate::{ConfigError, Result};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use tracing::debug;

/// Collects prefixed variables as lowercase keys with the prefix removed:
/// `GIRDER_LOG_LEVEL` becomes `log_level`.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into().to_ascii_uppercase();
        if !prefix.ends_with('_') {
            prefix.push('_');
        }
        Self { prefix }
    }

    /// Variables from the process environment
    pub fn load(&self) -> HashMap<String, String> {
        self.filter(env::vars())
    }

    /// Variables from a `.env` file, without touching the process
    /// environment. A missing file yields nothing.
    pub fn load_dotenv(&self, path: impl AsRef<Path>) -> Result<HashMap<String, String>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(HashMap::new());
        }

        let mut pairs = Vec::new();
        let entries = dotenvy::from_path_iter(path)
            .map_err(|e| ConfigError::Load(format!("{}: {e}", path.display())))?;
        for entry in entries {
            pairs.push(entry.map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?);
        }
        debug!(path = %path.display(), entries = pairs.len(), "Loaded .env file");
        Ok(self.filter(pairs))
    }

    /// Keep the pairs carrying this loader's prefix.
    pub fn filter<I>(&self, vars: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| {
                key.to_ascii_uppercase()
                    .strip_prefix(&self.prefix)
                    .map(|rest| (rest.to_ascii_lowercase(), value))
            })
            .collect()
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new("GIRDER")
    }
}
