//! Layered stack configuration
//!
//! Four layers merge in order of increasing precedence:
//! 1. Built-in defaults
//! 2. Host config (~/.config/ecr-ci/config.toml)
//! 3. Repo config (.ecr-ci/stack.toml)
//! 4. CLI flags (`--app-name`, `--context`, `--account`, `--region`)

mod context;
mod defaults;
mod effective;
mod merge;
mod stack;

pub use context::{cli_overrides, parse_context, CliOverrides};
pub use defaults::BuiltinDefaults;
pub use effective::{ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig};
pub use merge::{deep_merge, merge_layers};
pub use stack::{BuildConfig, RunConfig, SourceConfig, StackConfig};

use std::path::PathBuf;

/// Repo config location relative to the working directory.
pub const REPO_CONFIG_PATH: &str = ".ecr-ci/stack.toml";

/// Host config location under `$HOME`.
pub fn default_host_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/ecr-ci/config.toml"))
}
