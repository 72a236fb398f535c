//! Runtime configuration.
//!
//! The only tunable is how deeply same-thread resumptions may nest before
//! they are queued on the thread's trampoline. Configuration is resolved
//! once per process: either installed explicitly with [`install`] before the
//! first frame runs, or read lazily from the environment.
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `COFRAME_MAX_INLINE_DEPTH` | `max_inline_depth` | `1` |

use crate::error::ConfigError;
use crate::tracing_compat::warn;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Environment variable overriding [`RuntimeConfig::max_inline_depth`].
pub const ENV_MAX_INLINE_DEPTH: &str = "COFRAME_MAX_INLINE_DEPTH";

const DEFAULT_MAX_INLINE_DEPTH: usize = 1;

static INSTALLED: OnceLock<RuntimeConfig> = OnceLock::new();

/// Process-wide runtime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of frame runs that may be nested on one thread's native stack.
    ///
    /// A resumption requested while this many runs are already active on the
    /// thread is appended to the trampoline queue and executed by the
    /// outermost run instead. `1` means only the outermost run executes
    /// inline, which keeps native stack usage constant for arbitrarily long
    /// await chains.
    pub max_inline_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_inline_depth: DEFAULT_MAX_INLINE_DEPTH,
        }
    }
}

impl RuntimeConfig {
    /// Returns a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Reads the configuration from the environment, falling back to defaults
    /// for unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(ENV_MAX_INLINE_DEPTH) {
            config.max_inline_depth =
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        var: ENV_MAX_INLINE_DEPTH,
                        value: raw.clone(),
                    })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Parses a TOML document.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_inline_depth == 0 {
            return Err(ConfigError::InvalidInlineDepth(self.max_inline_depth));
        }
        Ok(())
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Sets the inline resume depth.
    #[must_use]
    pub fn max_inline_depth(mut self, depth: usize) -> Self {
        self.config.max_inline_depth = depth;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Installs the process-wide configuration.
///
/// Must be called before the first frame runs; later calls, or a call after
/// the configuration was resolved lazily, fail with
/// [`ConfigError::AlreadyInstalled`].
pub fn install(config: RuntimeConfig) -> Result<(), ConfigError> {
    config.validate()?;
    INSTALLED
        .set(config)
        .map_err(|_| ConfigError::AlreadyInstalled)
}

/// Returns the active configuration, resolving it from the environment on
/// first use.
pub fn current() -> &'static RuntimeConfig {
    INSTALLED.get_or_init(|| {
        RuntimeConfig::from_env().unwrap_or_else(|_err| {
            warn!(error = %_err, "ignoring invalid runtime configuration from environment");
            RuntimeConfig::default()
        })
    })
}
