use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod config;
mod convert;
mod engine;
mod normalize;
mod post;
mod preview;
mod repo;
mod server;

#[derive(Parser)]
#[command(version, about = "Publish Word documents to a Hugo blog")]
struct Args {
    /// The command to execute
    #[command(subcommand)]
    command: BlogposterCommand,
}

#[derive(Parser)]
struct InitArgs {
    /// The directory to write config.yaml into
    path: PathBuf,

    /// Whether to create the directory if it doesn't exist
    #[arg(short, long, default_value = "false")]
    create: bool,

    /// Author name put on new posts
    #[arg(short, long)]
    author: Option<String>,

    /// URL to clone the site repository from
    #[arg(short, long)]
    remote_url: Option<String>,
}

#[derive(Parser)]
struct ServeArgs {
    /// The path to the configuration file [default: ~/blogposter/config.yaml]
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// The address to bind to
    #[arg(short, long)]
    bind: Option<String>,

    /// The port to bind to
    #[arg(short, long)]
    port: Option<u16>,

    /// Base URL the preview server renders links against
    #[arg(long)]
    base_url: Option<String>,

    /// Commit published posts without pushing them
    #[arg(short, long, default_value = "false")]
    test: bool,

    /// Don't start the preview server
    #[arg(long, default_value = "false")]
    no_preview: bool,
}

#[derive(Parser)]
struct ConvertArgs {
    /// The document to convert
    input: PathBuf,

    /// Where to write the markdown [default: stdout]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// The pandoc executable, overriding the config file
    #[arg(long)]
    pandoc: Option<String>,

    /// The path to the configuration file [default: ~/blogposter/config.yaml]
    #[arg(short, long)]
    config_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum BlogposterCommand {
    /// Write a default config file
    Init(InitArgs),

    /// Serve the upload form, staging API and site preview
    Serve(ServeArgs),

    /// Convert a document to normalized markdown and print it
    Convert(ConvertArgs),
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blogposter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        BlogposterCommand::Init(args) => {
            commands::init::run(&args).await?;
        }
        BlogposterCommand::Serve(args) => {
            commands::serve::run(&args).await?;
        }
        BlogposterCommand::Convert(args) => {
            commands::convert::run(&args).await?;
        }
    }

    Ok(())
}
