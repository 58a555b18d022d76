//! traefik-register binary

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use traefik_register::common::parse_duration;
use traefik_register::store::EtcdStore;
use traefik_register::{Config, Registrar, ServiceIdentity, SlotStrategy, StaticInstance};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "traefik-register")]
#[command(about = "Publish service instances as Traefik routes in etcd")]
#[command(version)]
struct Cli {
    /// Config file (TOML); TRAEFIK_REGISTER_* env vars are applied on top
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// etcd endpoints (comma-separated)
    #[arg(long, value_delimiter = ',')]
    etcd: Vec<String>,

    /// Traefik KV root key
    #[arg(long)]
    root_key: Option<String>,

    /// Presence record prefix
    #[arg(long)]
    presence_prefix: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Scan,
    Counter,
    External,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an instance whose presence record already exists
    Register {
        /// Service name
        #[arg(long)]
        service: String,

        /// Instance id (as published by the framework)
        #[arg(long)]
        id: String,

        /// Endpoint URL; give grpc first, http second when passing both
        #[arg(long = "endpoint")]
        endpoints: Vec<String>,

        /// Slot allocation strategy (defaults to the configured one)
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Slot for the external strategy
        #[arg(long)]
        slot: Option<u32>,

        /// Upper bound for the counter strategy
        #[arg(long)]
        max_slot: Option<u32>,

        /// How long to wait for the registration lock, in whole seconds (e.g. "60s", "2m")
        #[arg(long, value_parser = duration_arg)]
        lock_timeout: Option<Duration>,
    },

    /// Remove the routes bound to an instance's presence lease
    Deregister {
        #[arg(long)]
        service: String,

        #[arg(long)]
        id: String,
    },

    /// List the routes published for a service
    Routes {
        #[arg(long)]
        service: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if !cli.etcd.is_empty() {
        config.etcd.endpoints = cli.etcd.clone();
    }
    if let Some(root_key) = cli.root_key.clone() {
        config.root_key = root_key;
    }
    if let Some(prefix) = cli.presence_prefix.clone() {
        config.presence_prefix = prefix;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Register {
            service,
            id,
            endpoints,
            strategy,
            slot,
            max_slot,
            lock_timeout,
        } => {
            config.strategy = match (strategy, config.strategy) {
                (None, current) => current,
                (Some(StrategyArg::Scan), _) => SlotStrategy::Scan,
                (Some(StrategyArg::Counter), SlotStrategy::Counter { max }) => SlotStrategy::Counter {
                    max: max_slot.unwrap_or(max),
                },
                (Some(StrategyArg::Counter), _) => SlotStrategy::Counter {
                    max: max_slot.unwrap_or(1023),
                },
                (Some(StrategyArg::External), _) => SlotStrategy::External {
                    slot: slot.ok_or_else(|| anyhow::anyhow!("--slot is required with --strategy external"))?,
                },
            };
            if let Some(timeout) = lock_timeout {
                config.set_lock_timeout(timeout)?;
            }

            let registrar = connect(&config).await?;
            let instance = StaticInstance::new(ServiceIdentity::new(service, id)?, endpoints);
            match registrar.register(&instance).await {
                Ok(registration) => {
                    println!("{}", serde_json::to_string_pretty(&registration)?);
                }
                Err(e) => {
                    if !e.committed_keys().is_empty() {
                        tracing::error!(keys = ?e.committed_keys(), "partially registered; run deregister or wait for lease expiry");
                    }
                    return Err(e.into());
                }
            }
        }

        Commands::Deregister { service, id } => {
            let registrar = connect(&config).await?;
            let removed = registrar
                .deregister_instance(&ServiceIdentity::new(service, id)?)
                .await?;
            println!("removed {} route(s)", removed);
        }

        Commands::Routes { service, json } => {
            let registrar = connect(&config).await?;
            let routes = registrar.routes(&service).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&routes)?);
            } else {
                for route in routes {
                    println!("{:<5} {:>5}  {}  {}", route.protocol, route.slot, route.value, route.key);
                }
            }
        }
    }

    Ok(())
}

async fn connect(config: &Config) -> anyhow::Result<Registrar> {
    let store = EtcdStore::connect(&config.etcd).await?;
    Ok(Registrar::new(Arc::new(store), config)?)
}
