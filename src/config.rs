//! Configuration loading and types for blogposter.
//!
//! - Type definitions for the config file (`types`)
//! - Loading from a YAML file layered with `BLOGPOSTER_*` environment
//!   variables (`load`)

mod load;
mod types;

pub use types::{Config, PreviewConfig};

// =============================================================================
// Errors
// =============================================================================

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to encode config file path as a unicode string: {0}")]
    EncodePath(std::path::PathBuf),

    #[error("failed to deserialize config: {0}")]
    Deserialize(#[from] config::ConfigError),

    #[error("failed to get current working directory: {0}")]
    CwdFailure(std::io::Error),

    #[error("cannot locate the home directory for the default config path")]
    NoHome,

    #[error("invalid config: {0}")]
    Validation(String),
}
