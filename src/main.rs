//! dubbo-invoke - Invoke Dubbo services from the command line
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use dubbo_invoke_client::{ClientConfig, ClientContext};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dubbo-invoke")]
#[command(about = "Invoke Dubbo services directly, through a registry or over HTTP")]
#[command(version)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, env = "DUBBO_INVOKE_CONFIG")]
    config: Option<PathBuf>,

    /// Direct service address (host[:port] or dubbo://host:port)
    #[arg(short, long)]
    address: Option<String>,

    /// Registry address (zookeeper://, nacos://, consul://, redis://, multicast://)
    #[arg(short, long)]
    registry: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// Invoke a service method
    Invoke {
        /// Service interface name
        service: String,

        /// Method name
        method: String,

        /// Parameters as a JSON array (or @file.json to read from file)
        params: Option<String>,

        /// Comma-separated parameter types
        #[arg(short, long, default_value = "")]
        types: String,

        /// Service version
        #[arg(short = 'V', long)]
        version: Option<String>,

        /// Service group
        #[arg(short, long)]
        group: Option<String>,
    },

    /// Test connectivity to a service's provider or registry
    Test {
        /// Service interface name
        service: String,
    },

    /// Classify an address and print its normalized form
    Classify {
        /// Address to classify
        address: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Classification needs no configuration
    if let Some(Commands::Classify { address }) = &cli.command {
        match commands::classify(address) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let config = match ClientConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };
    let ctx = ClientContext::new(config);
    if cli.address.is_some() || cli.registry.is_some() {
        if let Err(e) = ctx.update_addresses(cli.address.as_deref(), cli.registry.as_deref()) {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    }
    tracing::debug!(config = ?ctx.config(), "configuration loaded");

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(ctx).await?;
        }
        Some(Commands::Classify { .. }) => unreachable!(), // Already handled above
        Some(cmd) => match commands::execute(&ctx, cmd).await {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
