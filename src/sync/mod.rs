//! Bidirectional sync between local Addons and remote ClusterAddons
//!
//! Every tick runs two phases: refresh the health flag of installed
//! addons, then mirror specs downstream (ClusterAddon → Addon) and status
//! upstream (Addon → ClusterAddon). Each tick is a snapshot; convergence
//! happens over multiple ticks. Per-item remote write failures are logged
//! and skipped — only list-level failures fail the tick and count toward
//! the consecutive-failure threshold.

mod remote;
mod token;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use addon_common::crd::{Addon, AddonPhase, ClusterAddon};
use addon_common::{Cluster, Error, Result};
use addon_runner::Runner;

pub use remote::SunpikeRemote;
pub use token::{AuthInfo, TokenClient};

/// Operations against the remote control plane's ClusterAddons
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteAddons: Send + Sync {
    /// List this cluster's ClusterAddons
    async fn list(&self) -> Result<Vec<ClusterAddon>>;

    /// Create a ClusterAddon upstream
    async fn create(&self, addon: &ClusterAddon) -> Result<()>;

    /// Write a ClusterAddon's status upstream
    async fn update_status(&self, addon: &ClusterAddon) -> Result<()>;
}

/// The sync engine
pub struct SyncEngine {
    cluster: Arc<dyn Cluster>,
    remote: Arc<dyn RemoteAddons>,
    runner: Arc<Runner>,
    /// Remote names ever observed; prevents re-creating a ClusterAddon
    /// upstream after upstream intentionally deleted it. Process-local:
    /// lost on restart, which is safe because upstream creation takes the
    /// update path on name collision.
    seen: Mutex<HashSet<String>>,
}

impl SyncEngine {
    /// Build a sync engine over the local cluster and a remote handle
    pub fn new(
        cluster: Arc<dyn Cluster>,
        remote: Arc<dyn RemoteAddons>,
        runner: Arc<Runner>,
    ) -> Self {
        Self { cluster, remote, runner, seen: Mutex::new(HashSet::new()) }
    }

    /// Run ticks until cancelled. Returns an error once
    /// `max_err_count` consecutive remote failures accumulate.
    pub async fn run(
        &self,
        period: Duration,
        max_err_count: u32,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut err_count: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match self.tick().await {
                Ok(()) => err_count = 0,
                Err(e) => {
                    error!(error = %e, "error in sync tick");
                    if e.counts_toward_sync_errors() {
                        err_count += 1;
                        error!(count = err_count, of = max_err_count, "remote sync error count");
                        if err_count > max_err_count {
                            return Err(Error::internal(
                                "error listing ClusterAddon objects from sunpike",
                            ));
                        }
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(period) => {}
            }
        }
    }

    /// One sync tick: health refresh, then the bidirectional mirror
    pub async fn tick(&self) -> Result<()> {
        self.refresh_health().await?;
        self.mirror().await
    }

    /// Probe every installed addon and persist health transitions
    async fn refresh_health(&self) -> Result<()> {
        let addons = self.cluster.list_addons().await?;
        for addon in addons {
            if addon.phase() != Some(AddonPhase::Installed) {
                continue;
            }
            let healthy = self.runner.health(&addon.spec.kind, &addon.spec.version).await?;
            let mut status = addon.status_or_default();
            if status.healthy == healthy {
                continue;
            }
            info!(addon = %addon.name(), healthy, "setting health for addon");
            status.healthy = healthy;
            if let Err(e) = self.cluster.update_addon_status(addon.name(), &status).await {
                error!(addon = %addon.name(), error = %e, "failed to update addon status");
            }
        }
        Ok(())
    }

    /// Phase 2: mirror remote specs down and local status up
    async fn mirror(&self) -> Result<()> {
        let remote_map: HashMap<String, ClusterAddon> = self
            .remote
            .list()
            .await?
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        let local_map: HashMap<String, Addon> = self
            .cluster
            .list_addons()
            .await?
            .into_iter()
            .map(|a| (a.name().to_string(), a))
            .collect();

        for (name, cls_addon) in &remote_map {
            self.process_remote(cls_addon, local_map.get(name)).await;
            self.seen.lock().unwrap().insert(name.clone());
        }

        for (name, local) in &local_map {
            self.process_local(local, remote_map.get(name)).await;
        }

        Ok(())
    }

    /// Push a status onto the remote object, logging failures
    async fn write_remote_status(
        &self,
        cls_addon: &ClusterAddon,
        phase: AddonPhase,
    ) {
        let mut updated = cls_addon.clone();
        let mut status = updated.status.clone().unwrap_or_default();
        status.phase = Some(phase);
        status.healthy = false;
        status.message.clear();
        updated.status = Some(status);
        info!(addon = %updated.name(), ?phase, "updating ClusterAddon status");
        if let Err(e) = self.remote.update_status(&updated).await {
            error!(addon = %updated.name(), error = %e, "failed to update ClusterAddon status");
        }
    }

    /// Downstream direction: one remote ClusterAddon against its local
    /// counterpart (create/update/delete the local Addon)
    async fn process_remote(&self, cls_addon: &ClusterAddon, local: Option<&Addon>) {
        let name = cls_addon.name().to_string();

        // Remote deletion drives local deletion; once the local object is
        // gone the remote phase settles at Uninstalled.
        if cls_addon.metadata.deletion_timestamp.is_some() {
            match local {
                Some(_) => {
                    self.write_remote_status(cls_addon, AddonPhase::Uninstalling).await;
                    info!(addon = %name, "deleting local Addon object");
                    if let Err(e) = self.cluster.delete_addon(&name).await {
                        error!(addon = %name, error = %e, "failed to delete local addon");
                    }
                }
                None => {
                    if cls_addon.phase() == Some(AddonPhase::Uninstalled) {
                        return;
                    }
                    self.write_remote_status(cls_addon, AddonPhase::Uninstalled).await;
                }
            }
            return;
        }

        let Some(local) = local else {
            self.write_remote_status(cls_addon, AddonPhase::Installing).await;
            info!(addon = %name, "creating Addon object");
            let converted = Addon::from_remote(cls_addon);
            if let Err(e) = self.cluster.create_addon(&converted).await {
                error!(addon = %name, error = %e, "failed to create addon");
            }
            return;
        };

        let desired = Addon::from_remote(cls_addon);
        if desired.spec == local.spec {
            debug!(addon = %name, "not updating addon object");
            return;
        }

        info!(addon = %name, "updating Addon object");
        let mut updated = local.clone();
        updated.copy_spec_from(&desired);
        if let Err(e) = self.cluster.update_addon(&updated).await {
            error!(addon = %name, error = %e, "failed to update addon");
        }
    }

    /// Upstream direction: one local Addon against its remote counterpart
    /// (status report, or first-time creation)
    async fn process_local(&self, local: &Addon, cls_addon: Option<&ClusterAddon>) {
        let name = local.name().to_string();
        let local_status = local.status_or_default();

        if let Some(cls_addon) = cls_addon {
            // A dying remote object owns its phase transitions
            // (Uninstalling/Uninstalled); don't report status onto it
            if cls_addon.metadata.deletion_timestamp.is_some() {
                return;
            }
            let remote_status = cls_addon.status.clone().unwrap_or_default();
            if local_status.phase == remote_status.phase
                && local_status.healthy == remote_status.healthy
                && local_status.message == remote_status.message
            {
                debug!(addon = %name, "not updating ClusterAddon status");
                return;
            }
            let mut updated = cls_addon.clone();
            let mut status = remote_status;
            status.phase = local_status.phase;
            status.healthy = local_status.healthy;
            status.message = local_status.message;
            updated.status = Some(status);
            info!(addon = %name, phase = ?updated.status.as_ref().and_then(|s| s.phase), "updating ClusterAddon status");
            if let Err(e) = self.remote.update_status(&updated).await {
                error!(addon = %name, error = %e, "failed to update ClusterAddon status");
            }
            return;
        }

        if self.seen.lock().unwrap().contains(&name) {
            info!(addon = %name, "already seen ClusterAddon object, not creating");
            return;
        }

        info!(addon = %name, "creating ClusterAddon object");
        let converted = ClusterAddon::from_local(local);
        if let Err(e) = self.remote.create(&converted).await {
            error!(addon = %name, error = %e, "failed to create ClusterAddon");
            return;
        }
        self.seen.lock().unwrap().insert(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_common::cluster::FakeCluster;
    use addon_common::crd::{AddonSpec, AddonStatus, ClusterAddonSpec};
    use addon_common::ADDONS_NAMESPACE;
    use mockall::predicate::always;

    fn engine_with(remote: MockRemoteAddons) -> (SyncEngine, Arc<FakeCluster>) {
        let cluster = Arc::new(FakeCluster::new());
        let runner = Arc::new(Runner::new(
            cluster.clone() as Arc<dyn Cluster>,
            std::env::temp_dir(),
        ));
        (SyncEngine::new(cluster.clone(), Arc::new(remote), runner), cluster)
    }

    fn remote_addon(name: &str, version: &str) -> ClusterAddon {
        let mut c = ClusterAddon::new(
            name,
            ClusterAddonSpec {
                cluster_id: "d2a8c1e0-42bb-49b5-a84c-31f4e62f9a10".into(),
                version: version.into(),
                kind: "metrics-server".into(),
                ..Default::default()
            },
        );
        c.metadata.namespace = Some(addon_common::REMOTE_NAMESPACE.into());
        c
    }

    #[tokio::test]
    async fn remote_addon_creates_local_addon() {
        let mut remote = MockRemoteAddons::new();
        remote.expect_list().returning(|| Ok(vec![remote_addon("ms", "0.3.6")]));
        // phase moves to Installing before the local create
        remote
            .expect_update_status()
            .with(always())
            .times(1)
            .returning(|c: &ClusterAddon| {
                assert_eq!(c.phase(), Some(AddonPhase::Installing));
                Ok(())
            });
        let (engine, cluster) = engine_with(remote);

        engine.mirror().await.unwrap();

        let local = cluster.addon("ms").expect("local addon created");
        assert_eq!(local.spec.version, "0.3.6");
        assert_eq!(local.metadata.namespace.as_deref(), Some(ADDONS_NAMESPACE));
    }

    #[tokio::test]
    async fn spec_change_upstream_updates_local() {
        let mut remote = MockRemoteAddons::new();
        remote.expect_list().returning(|| Ok(vec![remote_addon("ms", "0.4.0")]));
        // the status diff (Installed locally, unset upstream) also syncs
        remote.expect_update_status().returning(|_| Ok(()));
        let (engine, cluster) = engine_with(remote);

        let mut local = Addon::from_remote(&remote_addon("ms", "0.3.6"));
        local.status = Some(AddonStatus {
            observed_generation: 1,
            phase: Some(AddonPhase::Installed),
            ..Default::default()
        });
        cluster.insert_addon(local);

        engine.mirror().await.unwrap();

        let updated = cluster.addon("ms").unwrap();
        assert_eq!(updated.spec.version, "0.4.0");
        // spec mutation re-opens the reconcile gate
        assert_eq!(updated.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn local_only_addon_is_created_upstream_once() {
        let mut remote = MockRemoteAddons::new();
        remote.expect_list().returning(|| Ok(vec![]));
        remote
            .expect_create()
            .times(1)
            .returning(|c: &ClusterAddon| {
                assert_eq!(c.name(), "handmade");
                assert_eq!(c.metadata.namespace.as_deref(), Some(addon_common::REMOTE_NAMESPACE));
                Ok(())
            });
        let (engine, cluster) = engine_with(remote);

        let mut addon = Addon::new(
            "handmade",
            AddonSpec {
                cluster_id: "d2a8c1e0-42bb-49b5-a84c-31f4e62f9a10".into(),
                version: "1.0".into(),
                kind: "metrics-server".into(),
                ..Default::default()
            },
        );
        addon.metadata.namespace = Some(ADDONS_NAMESPACE.into());
        cluster.insert_addon(addon);

        // second tick must not create again: name is in the seen-set
        engine.mirror().await.unwrap();
        engine.mirror().await.unwrap();
    }

    #[tokio::test]
    async fn status_diff_propagates_upstream() {
        let mut remote = MockRemoteAddons::new();
        remote.expect_list().returning(|| Ok(vec![remote_addon("ms", "0.3.6")]));
        remote
            .expect_update_status()
            .times(1)
            .returning(|c: &ClusterAddon| {
                let status = c.status.clone().unwrap();
                assert_eq!(status.phase, Some(AddonPhase::Installed));
                assert!(status.healthy);
                Ok(())
            });
        let (engine, cluster) = engine_with(remote);

        let mut local = Addon::from_remote(&remote_addon("ms", "0.3.6"));
        local.status = Some(AddonStatus {
            observed_generation: 1,
            phase: Some(AddonPhase::Installed),
            healthy: true,
            ..Default::default()
        });
        cluster.insert_addon(local);

        engine.mirror().await.unwrap();
    }

    #[tokio::test]
    async fn list_failure_fails_the_tick() {
        let mut remote = MockRemoteAddons::new();
        remote
            .expect_list()
            .returning(|| Err(Error::list_cluster_addons("connection refused")));
        let (engine, _cluster) = engine_with(remote);

        let err = engine.mirror().await.unwrap_err();
        assert!(err.counts_toward_sync_errors());
    }
}
