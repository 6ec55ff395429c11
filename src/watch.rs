//! Drift watcher
//!
//! Watches the resource versions of sub-resources the runner deployed.
//! When a version advances past the last value this agent observed, the
//! resource was modified by someone else; the watcher re-triggers
//! reconciliation by decrementing the Addon's `observedGeneration`, which
//! re-opens the reconciler's idempotence gate while preserving
//! `observedGeneration <= generation`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use addon_common::crd::AddonPhase;
use addon_common::{Cluster, Error, Result};

const WAIT_ATTEMPTS: u32 = 20;
const WAIT_INTERVAL: Duration = Duration::from_secs(5);

/// On-disk map of watched resources:
/// `"<kind>,<ns>,<apiVersion>,<name>" -> addon type`
#[derive(Debug, Deserialize)]
struct ResourcesFile {
    resources: HashMap<String, String>,
}

/// One parsed watched-resource key
#[derive(Debug, PartialEq, Eq)]
struct ResourceKey<'a> {
    kind: &'a str,
    namespace: &'a str,
    api_version: &'a str,
    name: &'a str,
}

fn parse_resource_key(key: &str) -> Result<ResourceKey<'_>> {
    let parts: Vec<&str> = key.split(',').collect();
    if parts.len() != 4 {
        return Err(Error::internal(format!("incorrect resource format: {key}")));
    }
    Ok(ResourceKey { kind: parts[0], namespace: parts[1], api_version: parts[2], name: parts[3] })
}

/// The drift watcher
pub struct DriftWatcher {
    cluster: Arc<dyn Cluster>,
    /// resource key -> addon type, loaded once at startup
    resources: HashMap<String, String>,
    /// resource key -> last observed resourceVersion
    cache: HashMap<String, u64>,
    wait_attempts: u32,
    wait_interval: Duration,
}

impl DriftWatcher {
    /// Watcher over an explicit resource map
    pub fn new(cluster: Arc<dyn Cluster>, resources: HashMap<String, String>) -> Self {
        Self {
            cluster,
            resources,
            cache: HashMap::new(),
            wait_attempts: WAIT_ATTEMPTS,
            wait_interval: WAIT_INTERVAL,
        }
    }

    /// Watcher over the static resources file
    pub fn from_file(cluster: Arc<dyn Cluster>, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("reading {}: {e}", path.display())))?;
        let file: ResourcesFile = serde_yaml::from_str(&text)
            .map_err(|e| Error::serialization(format!("parsing {}: {e}", path.display())))?;
        info!(entries = file.resources.len(), "watch: read resources file");
        Ok(Self::new(cluster, file.resources))
    }

    /// Shorten the convergence poll (used by tests)
    pub fn with_convergence_poll(mut self, interval: Duration, attempts: u32) -> Self {
        self.wait_interval = interval;
        self.wait_attempts = attempts;
        self
    }

    /// Tick until cancelled
    pub async fn run(&mut self, period: Duration, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "watch tick failed");
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(period) => {}
            }
        }
    }

    /// One pass over the watched resources
    pub async fn tick(&mut self) -> Result<()> {
        // Only installed addons that opted in are watched
        let addons = self.cluster.list_addons().await?;
        let mut watched: HashMap<String, String> = HashMap::new();
        for a in &addons {
            if a.phase() == Some(AddonPhase::Installed) && a.spec.watch {
                debug!(addon = %a.name(), "watch: listing addon");
                watched.insert(a.spec.kind.clone(), a.name().to_string());
            }
        }

        let entries: Vec<(String, String)> =
            self.resources.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        for (res, addon_type) in entries {
            let Some(addon_name) = watched.get(&addon_type).cloned() else {
                continue;
            };
            debug!(resource = %res, "watch: checking resource");
            let current = match self.read_version(&res).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(resource = %res, error = %e, "watch: unable to read resource, skipping");
                    continue;
                }
            };

            match self.cache.get(&res).copied() {
                Some(cached) if current > cached => {
                    info!(resource = %res, addon = %addon_name, "watch: resource has changed, triggering addon");
                    self.trigger(&addon_name, &addon_type).await?;
                }
                Some(_) => {}
                None => {
                    info!(resource = %res, addon = %addon_name, "watch: version not found in cache, triggering addon");
                    self.trigger(&addon_name, &addon_type).await?;
                }
            }
        }

        Ok(())
    }

    /// Force a reconcile of the addon and re-baseline its resources.
    ///
    /// Decrementing `observedGeneration` keeps the invariant
    /// `observedGeneration <= generation` while making the gate comparison
    /// fail, so the reconciler re-runs install on the next event.
    async fn trigger(&mut self, name: &str, addon_type: &str) -> Result<()> {
        let Some(addon) = self.cluster.get_addon(name).await? else {
            return Ok(());
        };
        let observed = addon.status_or_default().observed_generation;
        let mut status = addon.status_or_default();
        status.observed_generation = observed - 1;
        self.cluster.update_addon_status(name, &status).await?;

        if let Err(e) = self.wait_for_convergence(name, observed).await {
            // Leave the baseline stale so the next tick re-triggers
            warn!(addon = %name, error = %e, "watch: addon did not converge");
            return Ok(());
        }

        self.refresh_baseline(addon_type).await;
        Ok(())
    }

    async fn wait_for_convergence(&self, name: &str, target: i64) -> Result<()> {
        for _ in 0..self.wait_attempts {
            tokio::time::sleep(self.wait_interval).await;
            match self.cluster.get_addon(name).await {
                Ok(Some(addon)) => {
                    let observed = addon.status_or_default().observed_generation;
                    if observed == target {
                        info!(addon = %name, "watch: addon converged after trigger");
                        return Ok(());
                    }
                    info!(addon = %name, observed, target, "watch: waiting for addon to converge");
                }
                Ok(None) => {}
                Err(e) => error!(addon = %name, error = %e, "watch: error waiting for addon"),
            }
        }
        Err(Error::internal(format!("addon {name} did not converge after triggering it")))
    }

    /// Record the current versions of an addon type's resources as the new
    /// baseline
    async fn refresh_baseline(&mut self, addon_type: &str) {
        let entries: Vec<String> = self
            .resources
            .iter()
            .filter(|(_, t)| t.as_str() == addon_type)
            .map(|(k, _)| k.clone())
            .collect();
        for res in entries {
            match self.read_version(&res).await {
                Ok(version) => {
                    self.cache.insert(res, version);
                }
                Err(e) => warn!(resource = %res, error = %e, "watch: skipping baseline refresh"),
            }
        }
    }

    /// Current resourceVersion of a watched resource; a missing object
    /// reads as 0
    async fn read_version(&self, res: &str) -> Result<u64> {
        let key = parse_resource_key(res)?;
        let version = self
            .cluster
            .resource_version(key.api_version, key.kind, key.namespace, key.name)
            .await?;
        Ok(version.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_resource_key() {
        let key = parse_resource_key("Deployment,kube-system,apps/v1,coredns").unwrap();
        assert_eq!(key.kind, "Deployment");
        assert_eq!(key.namespace, "kube-system");
        assert_eq!(key.api_version, "apps/v1");
        assert_eq!(key.name, "coredns");
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(parse_resource_key("Deployment,kube-system,coredns").is_err());
        assert!(parse_resource_key("").is_err());
    }
}
