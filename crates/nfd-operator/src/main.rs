//! NFD Operator - deploys and tears down Node Feature Discovery per namespace

mod controller_runner;

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use kube::{Api, Client, CustomResourceExt};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nfd_common::crd::NodeFeatureDiscovery;
use nfd_common::FIELD_MANAGER;
use nfd_controller::ControllerConfig;

/// Filter used when RUST_LOG is not set
const DEFAULT_LOG_FILTER: &str = "info,kube=info,tower=warn,hyper=warn";

/// Log output format
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// NFD operator - manages Node Feature Discovery from NodeFeatureDiscovery resources
#[derive(Parser, Debug)]
#[command(name = "nfd-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "NFD_LOG_FORMAT")]
    log_format: LogFormat,

    /// Only watch this namespace (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Seconds between resyncs once every component is available
    #[arg(long, default_value_t = 60)]
    resync_secs: u64,

    /// Seconds between requeues while components are rolling out
    #[arg(long, default_value_t = 10)]
    progress_requeue_secs: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    Controller,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install the aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&NodeFeatureDiscovery::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_tracing(cli.log_format);

    match cli.command {
        Some(Commands::Controller) | None => {
            let config = ControllerConfig {
                resync_interval: Duration::from_secs(cli.resync_secs),
                progress_requeue: Duration::from_secs(cli.progress_requeue_secs),
                ..Default::default()
            };
            run(cli.watch_namespace, config).await
        }
    }
}

/// Install the NodeFeatureDiscovery CRD
///
/// The operator installs its own CRD on startup using server-side apply.
/// This ensures the CRD version always matches the operator version.
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    tracing::info!("Installing NodeFeatureDiscovery CRD...");
    crds.patch(
        "nodefeaturediscoveries.nfd.kubernetes.io",
        &params,
        &Patch::Apply(&NodeFeatureDiscovery::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install NodeFeatureDiscovery CRD: {}", e))?;

    Ok(())
}

async fn run(watch_namespace: Option<String>, config: ControllerConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crd_installed(&client).await?;

    tracing::info!(
        namespace = watch_namespace.as_deref().unwrap_or("<all>"),
        resync_secs = config.resync_interval.as_secs(),
        "Starting NodeFeatureDiscovery controller"
    );
    controller_runner::run_controller(client, watch_namespace, config).await;
    tracing::info!("Controller stopped");

    Ok(())
}
