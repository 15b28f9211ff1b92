use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod commands;

#[derive(Parser)]
#[command(
    name = "caplink",
    version,
    about = "caplink capability runtime: links components to outgoing HTTP and blob storage"
)]
struct Cli {
    /// Runtime config file (default: ./caplink.toml, then ~/.caplink/caplink.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a manifest and print the links it resolves to
    Check {
        manifest: PathBuf,

        /// Print the resolved links as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a blobstore operation as a component
    Blob {
        manifest: PathBuf,

        /// Calling component id
        #[arg(long)]
        component: String,

        #[command(subcommand)]
        op: commands::BlobOp,
    },

    /// Send an HTTP request as a component and stream the response body to stdout
    Http {
        manifest: PathBuf,

        /// Calling component id
        #[arg(long)]
        component: String,

        #[arg(long, default_value = "GET")]
        method: String,

        /// Request header, `name: value` (repeatable)
        #[arg(long = "header", short = 'H')]
        headers: Vec<String>,

        /// Request body
        #[arg(long)]
        data: Option<String>,

        /// Origin-form path (`/status`) or absolute URI on the linked address
        uri: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output on stdout stays clean.
    let logger = fmt()
        .with_env_filter(EnvFilter::from_env("CAPLINK_LOG"))
        .with_writer(std::io::stderr);
    if cli.log_json {
        logger.json().init();
    } else {
        logger.init();
    }

    let config = caplink_runtime::RuntimeConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Command::Check { manifest, json } => commands::check(config, &manifest, json).await,
        Command::Blob {
            manifest,
            component,
            op,
        } => commands::blob(config, &manifest, &component, op).await,
        Command::Http {
            manifest,
            component,
            method,
            headers,
            data,
            uri,
        } => {
            let request = commands::HttpArgs {
                method,
                headers,
                data,
                uri,
            };
            commands::http(config, &manifest, &component, request).await
        }
    }
}
