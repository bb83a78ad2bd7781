use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use sqlrelay::constants;

mod commands;

#[derive(Parser)]
#[command(name = "sqlrelay")]
#[command(about = "HTTP proxy for parameterized SQL over one PostgreSQL connection")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy server
    Serve {
        /// Path to a TOML config file
        #[arg(short, long, env = "SQLRELAY_CONFIG")]
        config: Option<PathBuf>,
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Execute a statement through a running proxy
    Query {
        /// SQL text, with $1, $2, ... placeholders
        text: String,
        /// Bind value (JSON, or a plain string); repeat in order
        #[arg(short = 'p', long = "param")]
        params: Vec<String>,
        /// Proxy base URL
        #[arg(long, env = "SQLRELAY_URL", default_value = constants::DEFAULT_PROXY_URL)]
        url: String,
        /// Fail on the first error instead of retrying
        #[arg(long)]
        no_retry: bool,
    },
    /// Check that a running proxy can reach its database
    Check {
        /// Proxy base URL
        #[arg(long, env = "SQLRELAY_URL", default_value = constants::DEFAULT_PROXY_URL)]
        url: String,
        /// Fail on the first error instead of retrying
        #[arg(long)]
        no_retry: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, port } => {
            commands::serve::execute(config.as_deref(), port).await?;
        },
        Commands::Query {
            text,
            params,
            url,
            no_retry,
        } => {
            commands::query::execute(&url, &text, &params, !no_retry).await?;
        },
        Commands::Check { url, no_retry } => {
            commands::check::execute(&url, !no_retry).await?;
        },
    }

    Ok(())
}
