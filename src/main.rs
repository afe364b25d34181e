// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use danebridge::{CaMaterial, Config, Result, Server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "danebridge")]
#[command(about = "DANE-to-X.509 bridge for .bit domains")]
#[command(version)]
#[command(after_help = "\
EXAMPLES:
    danebridge init                # Generate root CA and listener credentials
    danebridge serve               # Run the HTTP and HTTPS bridge listeners

Certificate lookups are answered on http://<listen_ip>/lookup and
http://<listen_ip>/aia once the server is running.")]
struct Cli {
    /// Config file (default: <config-dir>/danebridge.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory relative certificate/key paths are resolved against
    #[arg(long, global = true, default_value = ".")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the root CA, TLD CA, and HTTPS listener credentials
    Init {
        /// Regenerate root material even if it exists
        #[arg(long)]
        force: bool,
    },

    /// Run the bridge listeners
    Serve,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.config_dir.join("danebridge.toml"));
    let config = Config::load(Some(&config_path), &cli.config_dir)?;

    match cli.command {
        Commands::Init { force } => cmd_init(&config, force),
        Commands::Serve => cmd_serve(&config).await,
    }
}

fn cmd_init(config: &Config, force: bool) -> Result<()> {
    println!("Generating Namecoin root CA and listener credentials...");

    CaMaterial::bootstrap(config, force)?;

    println!("Root CA cert:   {}", config.root_cert.display());
    println!("Root CA key:    {}", config.root_key.display());
    println!("Listener chain: {}", config.listen_chain.display());
    println!("Listener key:   {}", config.listen_key.display());
    println!();
    println!("Add the root CA certificate to your trust store, then run 'danebridge serve'.");

    Ok(())
}

async fn cmd_serve(config: &Config) -> Result<()> {
    let server = Arc::new(Server::new(config)?);

    println!(
        "Serving on http://{}:80 and https://{}:443",
        config.listen_ip, config.listen_ip
    );

    server.run(config).await
}
