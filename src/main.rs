//! Challenge orchestrator - operator CLI over the container backends

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use challenge_orchestrator::backend::{self, ContainerBackend};
use challenge_orchestrator::config::{BackendKind, OrchestratorConfig};
use challenge_orchestrator::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use challenge_orchestrator::{ContainerConfig, ContainerRecord};

/// Provision and tear down per-team challenge instances
#[derive(Parser, Debug)]
#[command(name = "challenge-orchestrator", version, about, long_about = None)]
struct Cli {
    /// Path to the orchestrator YAML configuration
    #[arg(long = "config", env = "ORCHESTRATOR_CONFIG", global = true)]
    config_file: Option<PathBuf>,

    /// Override the configured backend
    #[arg(long, env = "ORCHESTRATOR_BACKEND", global = true)]
    backend: Option<BackendKind>,

    /// Override the kubeconfig path
    #[arg(long, env = "ORCHESTRATOR_KUBECONFIG", global = true)]
    kubeconfig: Option<PathBuf>,

    /// Override the instance namespace
    #[arg(long, env = "ORCHESTRATOR_NAMESPACE", global = true)]
    namespace: Option<String>,

    /// Log line format
    #[arg(long, value_enum, default_value = "json", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an instance and print its record
    Create(CreateArgs),

    /// Destroy an instance by name
    Destroy {
        /// Instance name as returned by `create`
        id: String,
    },

    /// Print the current status of an instance
    Query {
        /// Instance name as returned by `create`
        id: String,
    },

    /// List every instance the backend holds
    List,

    /// Print the backend host capacity report
    HostInfo,
}

/// Create mode arguments
#[derive(Args, Debug)]
struct CreateArgs {
    /// Challenge image reference
    #[arg(long)]
    image: String,

    /// Port the challenge listens on inside the container
    #[arg(long)]
    port: u16,

    /// Opaque team identifier recorded on the instance
    #[arg(long)]
    team: String,

    /// Flag injected into the instance environment
    #[arg(long, env = "ORCHESTRATOR_FLAG")]
    flag: Option<String>,

    /// CPU limit in cores
    #[arg(long, default_value = "1")]
    cpu: u32,

    /// Memory limit in MiB
    #[arg(long, default_value = "64")]
    memory: u32,
}

impl From<CreateArgs> for ContainerConfig {
    fn from(args: CreateArgs) -> Self {
        let config = ContainerConfig::new(args.image, args.port, args.team)
            .with_limits(args.cpu, args.memory);
        match args.flag {
            Some(flag) => config.with_flag(flag),
            None => config,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the process-wide rustls crypto provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let config = load_config(&cli)?;
    let backend = backend::connect(&config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect {} backend: {}", config.backend, e))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    run(cli.command, backend.as_ref(), &cancel).await
}

/// Load the configuration file (if any) and apply command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<OrchestratorConfig> {
    let mut config = match &cli.config_file {
        Some(path) => OrchestratorConfig::from_file(path)?,
        None => OrchestratorConfig::default(),
    };

    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(kubeconfig) = &cli.kubeconfig {
        config.kubernetes.kubeconfig = kubeconfig.clone();
    }
    if let Some(namespace) = &cli.namespace {
        config.kubernetes.namespace = namespace.clone();
    }

    Ok(config)
}

async fn run(
    command: Commands,
    backend: &dyn ContainerBackend,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    match command {
        Commands::Create(args) => {
            let record = backend.create_container(&args.into(), cancel).await?;
            print_json(&record)
        }
        Commands::Destroy { id } => {
            let mut record = ContainerRecord::from_id(id);
            backend.destroy_container(&mut record, cancel).await?;
            print_json(&record)
        }
        Commands::Query { id } => {
            let mut record = ContainerRecord::from_id(id);
            backend.query_container(&mut record, cancel).await?;
            print_json(&record)
        }
        Commands::List => {
            let containers = backend.get_containers(cancel).await?;
            print_json(&containers)
        }
        Commands::HostInfo => {
            println!("{}", backend.get_host_info(cancel).await?);
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize output: {}", e))?;
    println!("{out}");
    Ok(())
}
