#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
//! Unified configuration for the Warden gate daemon.
//!
//! # Usage
//!
//! ```rust,no_run
//! use warden_config::Config;
//!
//! let resolved = Config::load(None).unwrap();
//! let config = resolved.config;
//! println!("approval timeout: {}s", config.gate.approval_timeout_secs);
//! ```
//!
//! # Configuration Precedence
//!
//! From highest to lowest priority:
//!
//! 1. **Environment variables** (`WARDEN_LOG_LEVEL`, `WARDEN_DEFAULT_DECISION`, `WARDEN_SOCKET`)
//! 2. **Explicit file** (`--config <path>`)
//! 3. **User** (`~/.warden/config.toml` or `$WARDEN_HOME/config.toml`)
//! 4. **Embedded defaults** (`defaults.toml` compiled into binary)
//!
//! # Design
//!
//! This crate has **no dependencies on other internal warden crates**. Domain
//! types (decisions, heuristic modes, rule scopes) are mirrored as strings or
//! small enums and converted at the daemon boundary.

/// Configuration error types.
pub mod error;
/// Configuration file discovery and loading.
pub mod loader;
/// Layered configuration merging.
pub mod merge;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ResolvedConfig;
pub use types::*;

impl Config {
    /// Load configuration with the full precedence chain.
    ///
    /// `explicit_file` is an optional extra layer (e.g. `--config`).
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load(explicit_file: Option<&std::path::Path>) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit_file, None)
    }

    /// Load configuration with an explicit Warden home directory override.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any config file is malformed or the final
    /// configuration fails validation.
    pub fn load_with_home(
        explicit_file: Option<&std::path::Path>,
        warden_home: &std::path::Path,
    ) -> ConfigResult<ResolvedConfig> {
        loader::load(explicit_file, Some(warden_home))
    }
}
