//! Configuration loading from files.
//!
//! The YAML file is read first; `BLOGPOSTER_*` environment variables override
//! it, with `__` separating nested keys (`BLOGPOSTER_GIT__TOKEN` sets
//! `git.token`). Relative paths in the file resolve against the file's
//! directory.

use std::path::{Path, PathBuf};

use super::{Config, ConfigError};

/// Prefix of environment variables that override config values.
pub const ENV_PREFIX: &str = "BLOGPOSTER";

/// `$HOME/blogposter/config.yaml`
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var_os("HOME").ok_or(ConfigError::NoHome)?;
    Ok(PathBuf::from(home).join("blogposter").join("config.yaml"))
}

impl Config {
    /// Load the config from the command line argument, defaulting to
    /// [`default_config_path`].
    pub fn load_from_arg(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config_file = match config_file {
            Some(path) if path.is_relative() => std::env::current_dir()
                .map_err(ConfigError::CwdFailure)?
                .join(path),
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };

        Self::load_from_file(&config_file)
    }

    /// Load the config from a file path
    pub(crate) fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        tracing::info!(path = %path.display(), "reading config");
        let path_str = path
            .as_os_str()
            .to_str()
            .ok_or_else(|| ConfigError::EncodePath(path.to_path_buf()))?;

        let mut config = config::Config::builder()
            .add_source(config::File::new(path_str, config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Config>()?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }
}
