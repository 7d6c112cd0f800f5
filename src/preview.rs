//! The site preview server.
//!
//! `hugo server` renders the working tree, staged post included, so the
//! operator can look at a post before publishing it.

use std::path::Path;
use std::process::ExitStatus;

use tokio::process::{Child, Command};

use crate::config::PreviewConfig;

#[derive(thiserror::Error, Debug)]
pub enum PreviewError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },
}

/// A running preview server. The process is killed when this is dropped.
pub struct Preview {
    program: String,
    child: Child,
}

impl Preview {
    /// Start the preview server in `site_dir`.
    pub fn start(config: &PreviewConfig, site_dir: &Path) -> Result<Self, PreviewError> {
        let mut cmd = command(config);
        cmd.current_dir(site_dir).kill_on_drop(true);
        tracing::info!(?cmd, "starting preview server");

        let child = cmd.spawn().map_err(|source| PreviewError::Spawn {
            program: config.program.clone(),
            source,
        })?;
        Ok(Self {
            program: config.program.clone(),
            child,
        })
    }

    /// Wait for the preview server to exit.
    pub async fn wait(&mut self) -> Result<ExitStatus, PreviewError> {
        self.child.wait().await.map_err(|source| PreviewError::Wait {
            program: self.program.clone(),
            source,
        })
    }
}

fn command(config: &PreviewConfig) -> Command {
    let port = config.port.to_string();
    let mut cmd = Command::new(&config.program);
    cmd.args([
        "server",
        "--watch=true",
        "--bind",
        "0.0.0.0",
        "--baseURL",
        config.base_url.as_str(),
        "--port",
        port.as_str(),
    ]);
    cmd
}
