use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use console_core::{names, Console, OAuthClient, Route, WorkKey};
use console_kubehub::{spawn_watchers, wait_synced, KubeStore};
use console_operator::{Controller, OperatorConfig, OperatorContext, Stores};
use console_queue::{spawn_dispatcher, ExponentialBackoff, WorkQueue};

#[derive(Parser, Debug)]
#[command(name = "console", version, about = "OpenShift console operator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator until interrupted
    Operator(OperatorArgs),
    /// Print the operator version
    Version,
}

#[derive(Args, Debug, Clone)]
struct OperatorArgs {
    /// Namespace holding the console record and its objects
    #[arg(long, env = "CONSOLE_NAMESPACE", default_value = names::TARGET_NAMESPACE)]
    namespace: String,
    /// Console image for the workload
    #[arg(long, env = "IMAGE", default_value = "quay.io/openshift/origin-console:latest")]
    image: String,
    /// Periodic full resync, seconds
    #[arg(long, env = "CONSOLE_RESYNC_SECS", default_value_t = 600)]
    resync_secs: u64,
    #[arg(long, env = "CONSOLE_BACKOFF_BASE_MS", default_value_t = 500)]
    backoff_base_ms: u64,
    #[arg(long, env = "CONSOLE_BACKOFF_MAX_SECS", default_value_t = 300)]
    backoff_max_secs: u64,
    /// Retries of a failing pass before waiting for the next event
    #[arg(long, env = "CONSOLE_MAX_RETRIES", default_value_t = 15)]
    max_retries: u32,
    /// Watch event channel capacity
    #[arg(long, env = "CONSOLE_QUEUE_CAP", default_value_t = 1024)]
    queue_cap: usize,
    /// Wait this long for watchers to list before the first pass (0 = don't wait)
    #[arg(long, env = "CONSOLE_WAIT_SYNCED_SECS", default_value_t = 30)]
    wait_synced_secs: u64,
}

impl From<OperatorArgs> for OperatorConfig {
    fn from(a: OperatorArgs) -> Self {
        OperatorConfig {
            namespace: a.namespace,
            image: a.image,
            resync: Duration::from_secs(a.resync_secs.max(1)),
            backoff: ExponentialBackoff {
                base: Duration::from_millis(a.backoff_base_ms),
                max: Duration::from_secs(a.backoff_max_secs),
            },
            max_retries: a.max_retries,
            queue_cap: a.queue_cap.max(1),
            wait_synced: (a.wait_synced_secs > 0).then(|| Duration::from_secs(a.wait_synced_secs)),
        }
    }
}

fn init_tracing() {
    let env = std::env::var("CONSOLE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CONSOLE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid CONSOLE_METRICS_ADDR; expected host:port");
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl-C only");
                let _ = signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
    }
}

async fn run_operator(cfg: OperatorConfig) -> Result<()> {
    let client = console_kubehub::client().await?;
    let ns = cfg.namespace.clone();
    info!(namespace = %ns, image = %cfg.image, "starting console operator");

    let stores = Stores {
        console: Arc::new(KubeStore::<Console>::namespaced(client.clone(), &ns).with_status_subresource()),
        service: Arc::new(KubeStore::<Service>::namespaced(client.clone(), &ns)),
        route: Arc::new(KubeStore::<Route>::namespaced(client.clone(), &ns)),
        config_map: Arc::new(KubeStore::<ConfigMap>::namespaced(client.clone(), &ns)),
        secret: Arc::new(KubeStore::<Secret>::namespaced(client.clone(), &ns)),
        oauth_client: Arc::new(KubeStore::<OAuthClient>::cluster(client.clone())),
        deployment: Arc::new(KubeStore::<Deployment>::namespaced(client.clone(), &ns)),
    };

    let (tx, rx) = mpsc::channel(cfg.queue_cap);
    let (watchers, synced): (Vec<_>, Vec<_>) = spawn_watchers(client, &ns, tx).into_iter().unzip();
    if let Some(limit) = cfg.wait_synced {
        if wait_synced(synced, limit).await.context("waiting for watchers")? {
            info!("watchers synced");
        } else {
            warn!(secs = limit.as_secs(), "watchers not synced in time; starting anyway");
        }
    }

    let queue = WorkQueue::new(cfg.backoff);
    let resync = cfg.resync;
    let controller =
        Controller::new(OperatorContext::new(cfg, stores), queue.clone()).context("building controller")?;
    let (stop_tx, stop_rx) = watch::channel(false);
    let dispatcher = spawn_dispatcher(queue, WorkKey, rx, resync, stop_rx);
    let worker = tokio::spawn(controller.run());

    shutdown_signal().await;
    info!("shutdown requested");
    let _ = stop_tx.send(true);
    if let Err(e) = dispatcher.await {
        error!(error = %e, "dispatcher task failed");
    }
    if let Err(e) = worker.await {
        error!(error = %e, "worker task failed");
    }
    for w in watchers {
        w.abort();
    }
    info!("console operator stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("ConsoleOperator v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Operator(args) => {
            init_metrics();
            run_operator(args.into()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operator_config() {
        let cli = Cli::try_parse_from(["console", "operator"]).unwrap();
        let Commands::Operator(args) = cli.command else { panic!("expected operator") };
        let cfg: OperatorConfig = args.into();
        let want = OperatorConfig::default();
        assert_eq!(cfg.resync, want.resync);
        assert_eq!(cfg.backoff, want.backoff);
        assert_eq!(cfg.max_retries, want.max_retries);
        assert_eq!(cfg.wait_synced, want.wait_synced);
    }

    #[test]
    fn zero_wait_disables_sync_wait() {
        let cli = Cli::try_parse_from(["console", "operator", "--wait-synced-secs", "0", "--max-retries", "3"]).unwrap();
        let Commands::Operator(args) = cli.command else { panic!("expected operator") };
        let cfg: OperatorConfig = args.into();
        assert_eq!(cfg.wait_synced, None);
        assert_eq!(cfg.max_retries, 3);
    }
}
