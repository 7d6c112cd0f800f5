//! One-off conversion of a document to normalized markdown, without
//! touching the site repository.

use std::io::Write;

use crate::{
    ConvertArgs,
    config::Config,
    convert::{Converter, Pandoc},
    normalize,
};

pub async fn run(args: &ConvertArgs) -> Result<(), anyhow::Error> {
    let program = match &args.pandoc {
        Some(program) => program.clone(),
        None => Config::load_from_arg(args.config_file.as_deref())
            .map(|config| config.pandoc)
            .unwrap_or_else(|e| {
                tracing::debug!(error = %e, "no usable config, using default pandoc");
                Config::default().pandoc
            }),
    };

    let document = tokio::fs::read(&args.input).await?;
    let converter = Pandoc::new(program);
    let markdown = tokio::task::spawn_blocking(move || converter.convert(&document)).await??;
    let markdown = normalize::normalize(&markdown);

    match &args.output {
        Some(output) => {
            tokio::fs::write(output, &markdown).await?;
            println!("Wrote {}", output.display());
        }
        None => std::io::stdout().lock().write_all(&markdown)?,
    }

    Ok(())
}
