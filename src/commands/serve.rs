use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use crate::{
    ServeArgs,
    config::Config,
    convert::Pandoc,
    engine::Engine,
    preview::Preview,
    repo::GitRepository,
    server::{self, AppState},
};

pub async fn run(args: &ServeArgs) -> Result<(), anyhow::Error> {
    let mut config = Config::load_from_arg(args.config_file.as_deref())?;
    apply_overrides(&mut config, args);
    config.validate()?;

    let repo = open_site(&config).await?;
    let site_dir = repo.workdir().to_path_buf();

    let engine = Engine::new(repo, Pandoc::new(&config.pandoc)).with_test_mode(config.test);
    if config.test {
        tracing::warn!("test mode: published posts are committed but not pushed");
    }

    let mut preview = if config.preview.enabled {
        Some(Preview::start(&config.preview, &site_dir)?)
    } else {
        None
    };
    let preview_origin = format!("http://127.0.0.1:{}", config.preview.port);

    let state = AppState::new(
        Arc::new(engine),
        config.author.clone(),
        preview_origin,
        config.deploy_hook.clone(),
    )?;
    let app = server::router(state, &config.server.static_dir, config.server.upload_limit);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let display_host = if config.server.bind == "0.0.0.0" {
        "localhost"
    } else {
        &config.server.bind
    };
    let url = format!("http://{}:{}", display_host, config.server.port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    println!("\nServing blogposter at {url}");
    println!("Upload form at {url}/new/");
    println!("Press Ctrl+C to stop\n");

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    match preview.as_mut() {
        Some(preview) => {
            tokio::select! {
                result = server => result?,
                status = preview.wait() => {
                    anyhow::bail!("preview server stopped unexpectedly ({})", status?);
                }
            }
        }
        None => server.await?,
    }

    tracing::info!("shut down");
    Ok(())
}

fn apply_overrides(config: &mut Config, args: &ServeArgs) {
    if args.test {
        config.test = true;
    }
    if let Some(bind) = &args.bind {
        config.server.bind = bind.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(base_url) = &args.base_url {
        config.preview.base_url = base_url.clone();
    }
    if args.no_preview {
        config.preview.enabled = false;
    }
}

/// Open the site clone, cloning it from `remote_url` first if it is missing.
async fn open_site(config: &Config) -> Result<GitRepository, anyhow::Error> {
    let path = config.path.clone();
    let options = config.git.clone();
    let remote_url = config.remote_url.clone();

    let (repo, clean) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let repo = if path.exists() {
            GitRepository::open(&path, options)?
        } else if let Some(url) = remote_url {
            GitRepository::clone_into(&url, &path, options)?
        } else {
            anyhow::bail!(
                "Site repository does not exist: {path} (set 'remote_url' to clone it)",
                path = path.display()
            );
        };
        let clean = repo.is_clean()?;
        Ok((repo, clean))
    })
    .await??;

    if !clean {
        tracing::warn!(
            path = %repo.workdir().display(),
            "site repository has uncommitted changes; the next upload discards them"
        );
    }

    Ok(repo)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> ServeArgs {
        ServeArgs {
            config_file: None,
            bind: None,
            port: None,
            base_url: None,
            test: false,
            no_preview: false,
        }
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        let args = ServeArgs {
            port: Some(9000),
            base_url: Some("https://blog.example.com".into()),
            test: true,
            ..args()
        };
        apply_overrides(&mut config, &args);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "0.0.0.0");
        assert_eq!(config.preview.base_url, "https://blog.example.com");
        assert!(config.test);
        assert!(config.preview.enabled);
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = Config {
            test: true,
            ..Config::default()
        };
        apply_overrides(&mut config, &args());
        assert!(config.test);
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn test_missing_site_without_remote() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            path: dir.path().join("site"),
            ..Config::default()
        };
        let Err(err) = open_site(&config).await else {
            panic!("opened a site that does not exist");
        };
        assert!(err.to_string().contains("remote_url"));
        assert!(!config.path.exists());
    }
}
