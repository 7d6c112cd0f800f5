//! Configuration type definitions.
//!
//! These types are pure data - no I/O.
//!
//! ```yaml
//! author: Ada Lovelace
//! path: ./site
//! remote_url: https://github.com/example/site.git
//! git:
//!   username: ada
//!   token: ghp_xxx
//!   author_name: Ada Lovelace
//!   author_email: ada@example.com
//! server:
//!   port: 8080
//! preview:
//!   base_url: http://localhost:1313
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::repo::GitOptions;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Author name put on new posts
    pub author: String,

    /// Local clone of the site repository
    pub path: PathBuf,

    /// Where to clone the site repository from when `path` does not exist
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,

    /// Credentials and commit identity
    pub git: GitOptions,

    /// Commit without pushing
    pub test: bool,

    /// The pandoc executable
    pub pandoc: String,

    /// Fetched (GET) after every successful push, e.g. to trigger a host's deploy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_hook: Option<String>,

    pub server: ServerConfig,

    pub preview: PreviewConfig,
}

/// The HTTP front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Directory served under `/new/` (the upload form)
    pub static_dir: PathBuf,
    /// Largest accepted upload, in bytes
    pub upload_limit: usize,
}

/// The site preview server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Start the preview server with the HTTP front end
    pub enabled: bool,
    /// The hugo executable
    pub program: String,
    /// Base URL the preview renders links against
    pub base_url: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            author: String::new(),
            path: PathBuf::from("site"),
            remote_url: None,
            git: GitOptions::default(),
            test: false,
            pandoc: "pandoc".to_string(),
            deploy_hook: None,
            server: ServerConfig::default(),
            preview: PreviewConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: PathBuf::from("static"),
            upload_limit: 32 << 20,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "hugo".to_string(),
            base_url: "http://localhost:1313".to_string(),
            port: 1313,
        }
    }
}

impl Config {
    /// Check values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<(), super::ConfigError> {
        use super::ConfigError::Validation;

        if self.git.author_name.trim().is_empty() {
            return Err(Validation("'git.author_name' must not be empty".into()));
        }
        if self.git.author_email.trim().is_empty() {
            return Err(Validation("'git.author_email' must not be empty".into()));
        }
        if self.git.username.is_some() != self.git.token.is_some() {
            return Err(Validation(
                "'git.username' and 'git.token' must be set together".into(),
            ));
        }
        if self.preview.enabled && self.preview.port == self.server.port {
            return Err(Validation(format!(
                "preview and server cannot both use port {}",
                self.server.port
            )));
        }
        Ok(())
    }

    /// Make relative paths relative to `base` (the config file's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        for path in [&mut self.path, &mut self.server.static_dir] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "author: Ada\nserver:\n  port: 9000\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.author, "Ada");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.preview.port, 1313);
        assert_eq!(config.pandoc, "pandoc");
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.git.username = Some("ada".into());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.port = 1313;
        assert!(config.validate().is_err());
        config.preview.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = Config::default();
        config.server.static_dir = PathBuf::from("/srv/static");
        config.resolve_paths(Path::new("/home/ada/blogposter"));
        assert_eq!(config.path, PathBuf::from("/home/ada/blogposter/site"));
        assert_eq!(config.server.static_dir, PathBuf::from("/srv/static"));
    }
}
