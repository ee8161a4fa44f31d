//! Configuration for Proofbook.
//!
//! Read from `~/.proofbook/config.toml` (or the file named by
//! `PROOFBOOK_CONFIG`). Every section and field is optional.
//!
//! ```toml
//! [runner]
//! phase_accounting = "strict"
//! domain_rules = true
//!
//! [logging]
//! filter = "proofbook=info"
//! ```

pub mod logging;

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use toml::de;

use proofbook_core::{InvariantSet, PhaseAccounting};

pub use logging::init_tracing;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "PROOFBOOK_CONFIG";

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProofbookConfig {
    pub runner: RunnerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// How the runner accounts for phases missing from stage outputs.
    pub phase_accounting: PhaseAccounting,
    /// Run the domain rules (kernel state consistency and friends) on every stage.
    #[serde(default = "default_true")]
    pub domain_rules: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            phase_accounting: PhaseAccounting::Strict,
            domain_rules: default_true(),
        }
    }
}

impl RunnerConfig {
    /// The invariant set this configuration asks for.
    #[must_use]
    pub fn invariants(&self) -> InvariantSet {
        InvariantSet::from_rules(self.phase_accounting, self.domain_rules)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl ProofbookConfig {
    /// Load from the default location. `Ok(None)` when there is no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        Self::load_from(&path).map(Some)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to read config: {source}");
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Self::parse(&content).map_err(|source| {
            tracing::warn!(path = %path.display(), "Failed to parse config: {source}");
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })
    }

    pub fn parse(content: &str) -> Result<Self, de::Error> {
        toml::from_str(content)
    }
}

/// `$PROOFBOOK_CONFIG` if set and non-empty, else `~/.proofbook/config.toml`.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_ENV_VAR).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".proofbook").join("config.toml"))
}
