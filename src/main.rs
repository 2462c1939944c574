use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chain_harness::config::HarnessConfig;
use chain_harness::identity::IdentityProvider;
use chain_harness::supervisor::NodeSupervisor;
use chain_harness::SignedCallClient;

#[derive(Parser)]
#[command(author, version, about = "Local validator network for integration tests")]
struct Cli {
    /// Harness configuration file; defaults and environment overrides apply
    /// when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot a network and keep it running until Ctrl-C
    Start {
        /// Number of validators, leader included
        #[arg(short, long, default_value_t = 2)]
        amount: usize,
        /// Insert every node's identity key into its own keystore once ready
        #[arg(long, default_value_t = false)]
        setup_identities: bool,
    },
    /// Write the default harness configuration
    GenerateConfig {
        #[arg(short, long, default_value = "config/harness.toml")]
        path: PathBuf,
    },
    /// Print the development identities and their addresses
    Identities,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            amount,
            setup_identities,
        } => start_network(load_config(cli.config)?, amount, setup_identities).await?,
        Commands::GenerateConfig { path } => generate_config(path)?,
        Commands::Identities => list_identities()?,
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<HarnessConfig> {
    match path {
        Some(path) => HarnessConfig::load(&path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => HarnessConfig::from_env().context("failed to load configuration"),
    }
}

async fn start_network(
    config: HarnessConfig,
    amount: usize,
    setup_identities: bool,
) -> Result<()> {
    let identities = Arc::new(IdentityProvider::new());
    let client = SignedCallClient::from_config(&config, Arc::clone(&identities));
    let mut supervisor = NodeSupervisor::new(config, identities);

    let outcome = tokio::select! {
        res = async {
            let topology = supervisor.build_topology(amount).await?;
            info!(
                nodes = topology.node_count(),
                bootnode = %topology.bootnode,
                "network is up"
            );
            for endpoint in topology.endpoints() {
                info!(node = %endpoint.label, url = %endpoint.url, "rpc endpoint");
                if setup_identities {
                    client
                        .setup_identity(endpoint, &endpoint.label, false)
                        .await
                        .with_context(|| format!("failed to set up identity on {endpoint}"))?;
                }
            }
            signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            info!("shutdown signal received");
            Ok::<(), anyhow::Error>(())
        } => res,
        _ = signal::ctrl_c() => {
            info!("shutdown signal received while booting");
            Ok(())
        }
    };

    supervisor.teardown().await;
    outcome
}

fn generate_config(path: PathBuf) -> Result<()> {
    HarnessConfig::default().save(&path)?;
    info!(?path, "wrote default configuration");
    Ok(())
}

fn list_identities() -> Result<()> {
    let provider = IdentityProvider::new();
    for name in provider.names() {
        let identity = provider.resolve(name)?;
        println!(
            "{:<8} {} 0x{}",
            identity.name(),
            identity.address(),
            identity.public_key_hex()
        );
    }
    Ok(())
}
