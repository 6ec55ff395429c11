//! Addon agent entrypoint
//!
//! Wires the reconciler, the sync engine and the drift watcher under one
//! root cancellation token and drains them on SIGINT/SIGTERM.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use addon_agent::controller::{run_controller, Context};
use addon_agent::sync::{SunpikeRemote, SyncEngine};
use addon_agent::watch::DriftWatcher;
use addon_common::crd::Addon;
use addon_common::{AgentConfig, Cluster, KubeCluster, CA_CERT_PATH};
use addon_runner::Runner;

/// The sync engine starts after the manager has had a moment to settle
const SYNC_INITIAL_DELAY: Duration = Duration::from_secs(30);

/// Initial installs settle before drift watching begins, so bootstrap
/// writes are not mistaken for drift
const WATCH_WARMUP: Duration = Duration::from_secs(90);

/// Cluster-side agent managing the lifecycle of optional cluster addons
#[derive(Parser, Debug)]
#[command(name = "addon-agent", version, about, long_about = None)]
struct Cli {
    /// Generate the Addon CRD manifest and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("failed to install crypto provider");

    let loglevel = std::env::var("LOGLEVEL").unwrap_or_default();
    addon_common::init_tracing(&loglevel)
        .map_err(|e| anyhow::anyhow!("invalid LOGLEVEL: {e}"))?;

    let cli = Cli::parse();
    if cli.crd {
        let crd = serde_yaml::to_string(&Addon::crd())
            .map_err(|e| anyhow::anyhow!("failed to serialize CRD: {e}"))?;
        println!("{crd}");
        return Ok(());
    }

    info!("running update ca certs");
    update_ca_certs().map_err(|e| anyhow::anyhow!("updating ca certs: {e}"))?;

    let cfg = AgentConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {e}"))?;
    let cluster: Arc<dyn Cluster> = Arc::new(
        KubeCluster::new(client.clone()).map_err(|e| anyhow::anyhow!("cluster access: {e}"))?,
    );
    let runner = Arc::new(Runner::new(cluster.clone(), cfg.template_dir.clone()));

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let ctx = Arc::new(Context { cluster: cluster.clone(), runner: runner.clone() });
    let controller = tokio::spawn(run_controller(client, ctx, cancel.clone()));

    let sync_task = if cfg.disable_sync {
        warn!("sunpike sync disabled");
        None
    } else {
        let cluster = cluster.clone();
        let runner = runner.clone();
        let cfg = cfg.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(SYNC_INITIAL_DELAY) => {}
            }
            let remote = Arc::new(SunpikeRemote::new(&cfg));
            let engine = SyncEngine::new(cluster, remote, runner);
            let result = engine
                .run(cfg.healthcheck_interval, cfg.max_sync_err_count, cancel.clone())
                .await;
            if result.is_err() {
                // Remote failure overflow is fatal; take the rest down too
                cancel.cancel();
            }
            result
        }))
    };

    let watch_task = if cfg.disable_watch {
        warn!("drift watch disabled");
        None
    } else {
        let cluster = cluster.clone();
        let cfg = cfg.clone();
        let cancel = cancel.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(WATCH_WARMUP) => {}
            }
            info!("starting watch controller");
            let mut watcher = match DriftWatcher::from_file(cluster, &cfg.resources_file) {
                Ok(w) => w,
                Err(e) => {
                    // A missing resources map leaves drift unguarded; fatal
                    cancel.cancel();
                    return Err(e);
                }
            };
            watcher.run(cfg.watch_sleep, cancel).await;
            Ok::<(), addon_common::Error>(())
        }))
    };

    info!("starting manager");
    controller.await??;

    // The controller exits on shutdown; drain the loops before leaving
    cancel.cancel();
    if let Some(task) = sync_task {
        if let Err(e) = task.await? {
            error!(error = %e, "sync engine failed");
            return Err(anyhow::anyhow!("sync engine failed: {e}"));
        }
    }
    if let Some(task) = watch_task {
        if let Err(e) = task.await? {
            error!(error = %e, "drift watcher failed");
            return Err(anyhow::anyhow!("drift watcher failed: {e}"));
        }
    }

    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = sigterm.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}

/// Refresh the system CA store when a distribution certificate is mounted
fn update_ca_certs() -> std::io::Result<()> {
    if !Path::new(CA_CERT_PATH).exists() {
        warn!(path = CA_CERT_PATH, "cert not found, ignoring ca certs");
        return Ok(());
    }
    let output = std::process::Command::new("update-ca-certificates").output()?;
    if !output.status.success() {
        let detail = String::from_utf8_lossy(&output.stderr).to_string()
            + &String::from_utf8_lossy(&output.stdout);
        error!(%detail, "error updating ca certs");
        return Err(std::io::Error::other(detail));
    }
    Ok(())
}
