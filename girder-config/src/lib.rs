//! Configuration loading for Girder applications.
//!
//! Settings are layered: built-in defaults, then a TOML file, then a
//! `.env` file, then `GIRDER_*` variables from the process environment.
//! The result feeds [`girder_core::DispatchOptions`] and
//! [`girder_core::logging::LogConfig`].
//!
//! ```no_run
//! use girder_config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .file("config/girder.toml")
//!     .dotenv(".env")
//!     .load()?;
//!
//! let _guard = config.log_config()?.init();
//! let options = config.dispatch_options();
//! # let _ = options;
//! # Ok::<(), girder_config::ConfigError>(())
//! ```
//!
//! | Variable | Key |
//! |----------|-----|
//! | `GIRDER_ENV` | `environment` (`development`, `production`, `test`) |
//! | `GIRDER_EXPOSE_ERRORS` | `expose_error_details` |
//! | `GIRDER_LOG_LEVEL` | `log.level` |
//! | `GIRDER_LOG_FORMAT` | `log.format` (`plain`, `json`) |
//! | `GIRDER_LOG_FILE` | `log.file` |

mod env;
mod error;
mod loader;
mod settings;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::ConfigLoader;
pub use settings::{AppConfig, Environment, LogSettings};
