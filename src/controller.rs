//! Addon reconciler
//!
//! Driven by `kube::runtime::Controller`, which linearizes events per
//! (namespace, name) — at most one install/uninstall is in flight per
//! Addon while independent addons progress in parallel.
//!
//! The observed-generation gate makes reconciliation idempotent: status
//! updates echo back as watch events with an unchanged generation and are
//! dropped here. The drift watcher re-opens the gate by decrementing
//! `observedGeneration`.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use addon_common::crd::{Addon, AddonPhase};
use addon_common::{Cluster, Error, ADDONS_NAMESPACE, ADDON_FINALIZER};
use addon_runner::Runner;

/// Shared state for the reconcile loop
pub struct Context {
    /// Cluster access
    pub cluster: Arc<dyn Cluster>,
    /// The addon runner
    pub runner: Arc<Runner>,
}

/// Operation the reconciler decided on for one event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Install,
    Uninstall,
}

/// Run the Addon controller until the token is cancelled
pub async fn run_controller(
    client: Client,
    ctx: Arc<Context>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addons: Api<Addon> = Api::namespaced(client, ADDONS_NAMESPACE);

    Controller::new(addons, WatcherConfig::default())
        .graceful_shutdown_on(cancel.cancelled_owned())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _action)) => info!(addon = %obj.name, "reconciled"),
                Err(e) => error!(error = %e, "reconcile error"),
            }
        })
        .await;

    Ok(())
}

async fn reconcile(obj: Arc<Addon>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj.name_any();

    // Act on the latest state, not the (possibly stale) watch event
    let Some(addon) = ctx.cluster.get_addon(&name).await? else {
        return Ok(Action::await_change());
    };

    match reconcile_addon(ctx.cluster.as_ref(), &ctx.runner, &addon).await {
        Ok(()) => Ok(Action::await_change()),
        Err(e) if e.requeues() => Err(e),
        Err(e) => {
            // Surfaced in status; retrying without a spec change is futile
            warn!(addon = %name, error = %e, "not requeueing");
            Ok(Action::await_change())
        }
    }
}

fn error_policy(_obj: Arc<Addon>, _error: &Error, _ctx: Arc<Context>) -> Action {
    Action::requeue(Duration::from_secs(60))
}

/// Core of the reconcile loop, factored for direct testing
pub async fn reconcile_addon(
    cluster: &dyn Cluster,
    runner: &Runner,
    addon: &Addon,
) -> Result<(), Error> {
    let name = addon.name().to_string();
    let generation = addon.generation();
    let mut status = addon.status_or_default();

    // Idempotence gate: status updates do not advance the generation
    if generation == status.observed_generation {
        info!(addon = %name, "ignoring reconcile due to previous status update");
        return Ok(());
    }

    let operation = if addon.metadata.deletion_timestamp.is_some() {
        Operation::Uninstall
    } else {
        Operation::Install
    };
    info!(addon = %name, ?operation, version = %addon.spec.version, "processing addon");

    let outcome = match operation {
        Operation::Install => runner.install(addon).await,
        Operation::Uninstall => runner.uninstall(addon).await,
    };

    match (operation, &outcome) {
        (Operation::Install, Ok(())) => {
            status.phase = Some(AddonPhase::Installed);
            status.message.clear();
        }
        (Operation::Install, Err(e)) => {
            status.phase = Some(AddonPhase::InstallError);
            status.message = e.to_string();
            status.healthy = false;
        }
        (Operation::Uninstall, Ok(())) => {
            status.phase = Some(AddonPhase::Uninstalled);
            status.message.clear();
            status.healthy = false;
        }
        (Operation::Uninstall, Err(e)) => {
            status.phase = Some(AddonPhase::UninstallError);
            status.message = e.to_string();
        }
    }

    status.observed_generation = generation;
    cluster.update_addon_status(&name, &status).await?;

    // The finalizer goes on even when installation fails: without it a
    // delete would remove the object before cleanup ran, orphaning the
    // partially applied manifests. It only comes off once uninstall
    // succeeds, so a failed uninstall keeps the resource around to retry.
    let skip_finalizer = operation == Operation::Uninstall && outcome.is_err();
    if !skip_finalizer {
        if let Some(mut updated) = cluster.get_addon(&name).await? {
            info!(addon = %name, "updating finalizer");
            updated.metadata.finalizers = Some(match operation {
                Operation::Install => vec![ADDON_FINALIZER.to_string()],
                Operation::Uninstall => vec![],
            });
            cluster.update_addon(&updated).await?;
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_common::cluster::FakeCluster;
    use addon_common::crd::{AddonSpec, AddonStatus, Override, Param};

    fn metrics_server_addon(generation: i64, observed: i64) -> Addon {
        let mut addon = Addon::new(
            "metrics-server",
            AddonSpec {
                cluster_id: "2f5a31e4-9a1c-4d7e-9f59-4b2a39a7a1e2".into(),
                version: "0.3.6".into(),
                kind: "metrics-server".into(),
                ..Default::default()
            },
        );
        addon.metadata.namespace = Some(ADDONS_NAMESPACE.into());
        addon.metadata.generation = Some(generation);
        addon.status = Some(AddonStatus { observed_generation: observed, ..Default::default() });
        addon
    }

    fn runner_with_templates(cluster: &Arc<FakeCluster>) -> (Runner, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("metrics-server/0.3.6");
        std::fs::create_dir_all(&tpl).unwrap();
        std::fs::write(
            tpl.join("metrics-server.yaml"),
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: metrics-server-v0.3.6\n  namespace: kube-system\n",
        )
        .unwrap();
        (Runner::new(cluster.clone() as Arc<dyn Cluster>, dir.path()), dir)
    }

    #[tokio::test]
    async fn closed_gate_writes_nothing() {
        let cluster = Arc::new(FakeCluster::new());
        let (runner, _dir) = runner_with_templates(&cluster);
        let addon = metrics_server_addon(3, 3);
        cluster.insert_addon(addon.clone());
        cluster.clear_ops();

        reconcile_addon(cluster.as_ref(), &runner, &addon).await.unwrap();

        assert!(cluster.ops().is_empty());
        assert_eq!(cluster.addon("metrics-server").unwrap().status_or_default().observed_generation, 3);
    }

    #[tokio::test]
    async fn successful_install_sets_phase_finalizer_and_gate() {
        let cluster = Arc::new(FakeCluster::new());
        let (runner, _dir) = runner_with_templates(&cluster);
        let addon = metrics_server_addon(2, 1);
        cluster.insert_addon(addon.clone());

        reconcile_addon(cluster.as_ref(), &runner, &addon).await.unwrap();

        let stored = cluster.addon("metrics-server").unwrap();
        let status = stored.status_or_default();
        assert_eq!(status.phase, Some(AddonPhase::Installed));
        assert_eq!(status.observed_generation, 2);
        assert!(status.message.is_empty());
        assert_eq!(stored.metadata.finalizers, Some(vec![ADDON_FINALIZER.to_string()]));
    }

    #[tokio::test]
    async fn failed_install_still_sets_finalizer() {
        let cluster = Arc::new(FakeCluster::new());
        let (runner, _dir) = runner_with_templates(&cluster);
        // coredns with no params fails validation before touching the cluster
        let mut addon = Addon::new(
            "coredns",
            AddonSpec {
                version: "1.7.0".into(),
                kind: "coredns".into(),
                ..Default::default()
            },
        );
        addon.metadata.namespace = Some(ADDONS_NAMESPACE.into());
        addon.metadata.generation = Some(1);
        cluster.insert_addon(addon.clone());

        let err = reconcile_addon(cluster.as_ref(), &runner, &addon).await.unwrap_err();
        assert!(!err.requeues());

        let stored = cluster.addon("coredns").unwrap();
        let status = stored.status_or_default();
        assert_eq!(status.phase, Some(AddonPhase::InstallError));
        assert!(status.message.contains("dnsDomain"));
        assert!(!status.healthy);
        assert_eq!(status.observed_generation, 1);
        assert_eq!(stored.metadata.finalizers, Some(vec![ADDON_FINALIZER.to_string()]));
    }

    #[tokio::test]
    async fn successful_uninstall_clears_finalizers_and_releases_object() {
        let cluster = Arc::new(FakeCluster::new());
        let (runner, _dir) = runner_with_templates(&cluster);
        let mut addon = metrics_server_addon(2, 2);
        addon.metadata.finalizers = Some(vec![ADDON_FINALIZER.to_string()]);
        addon.status = Some(AddonStatus {
            observed_generation: 2,
            phase: Some(AddonPhase::Installed),
            healthy: true,
            ..Default::default()
        });
        cluster.insert_addon(addon);

        // Deletion stamps the object; the generation moves past the gate
        cluster.delete_addon("metrics-server").await.unwrap();
        let mut deleting = cluster.addon("metrics-server").unwrap();
        deleting.metadata.generation = Some(3);
        cluster.insert_addon(deleting.clone());

        reconcile_addon(cluster.as_ref(), &runner, &deleting).await.unwrap();

        // Finalizer removal lets the API server collect the object
        assert!(cluster.addon("metrics-server").is_none());
    }

    #[tokio::test]
    async fn failed_uninstall_keeps_finalizer() {
        let cluster = Arc::new(FakeCluster::new());
        // Runner with an empty template root: uninstall fails on missing dir
        let dir = tempfile::tempdir().unwrap();
        let runner = Runner::new(cluster.clone() as Arc<dyn Cluster>, dir.path());

        let mut addon = metrics_server_addon(3, 2);
        addon.metadata.finalizers = Some(vec![ADDON_FINALIZER.to_string()]);
        cluster.insert_addon(addon.clone());
        cluster.delete_addon("metrics-server").await.unwrap();
        let deleting = cluster.addon("metrics-server").unwrap();

        let result = reconcile_addon(cluster.as_ref(), &runner, &deleting).await;
        assert!(result.is_err());

        let stored = cluster.addon("metrics-server").expect("object must survive");
        assert_eq!(stored.metadata.finalizers, Some(vec![ADDON_FINALIZER.to_string()]));
        assert_eq!(stored.status_or_default().phase, Some(AddonPhase::UninstallError));
    }

    #[tokio::test]
    async fn spec_param_order_reaches_runner() {
        // Smoke-check that override params survive the reconcile path
        let cluster = Arc::new(FakeCluster::new());
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("metrics-server/0.3.6");
        std::fs::create_dir_all(&tpl).unwrap();
        std::fs::write(
            tpl.join("metrics-server.yaml"),
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: ms-config\n  namespace: kube-system\ndata:\n  mode: {{ mode }}\n",
        )
        .unwrap();
        let runner = Runner::new(cluster.clone() as Arc<dyn Cluster>, dir.path());

        let mut addon = metrics_server_addon(1, 0);
        addon.spec.r#override = Override {
            params: vec![
                Param { name: "mode".into(), value: "first".into() },
                Param { name: "mode".into(), value: "second".into() },
            ],
        };
        cluster.insert_addon(addon.clone());

        reconcile_addon(cluster.as_ref(), &runner, &addon).await.unwrap();

        let cm = cluster.object("ConfigMap", Some("kube-system"), "ms-config").unwrap();
        assert_eq!(cm["data"]["mode"], "second");
    }
}
