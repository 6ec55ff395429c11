//! Runner facade: resolves parameters and drives per-type clients

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use addon_common::crd::Addon;
use addon_common::template::TemplateEngine;
use addon_common::{Cluster, Result};

use crate::addons::client_for;
use crate::context::VariantCtx;
use crate::params::resolve_override_params;

/// Dispatches addon lifecycle operations to per-type implementations.
///
/// The variant table is fixed at construction; there is no global
/// registry. Stateless per call.
pub struct Runner {
    cluster: Arc<dyn Cluster>,
    engine: Arc<TemplateEngine>,
    template_root: PathBuf,
}

impl Runner {
    /// Build a runner over a cluster handle and an on-disk template tree
    pub fn new(cluster: Arc<dyn Cluster>, template_root: impl Into<PathBuf>) -> Self {
        Self {
            cluster,
            engine: Arc::new(TemplateEngine::new()),
            template_root: template_root.into(),
        }
    }

    fn ctx(&self, version: &str, params: BTreeMap<String, String>) -> VariantCtx {
        VariantCtx {
            cluster: self.cluster.clone(),
            engine: self.engine.clone(),
            template_root: self.template_root.clone(),
            version: version.to_string(),
            params,
        }
    }

    /// Validate then install an addon
    pub async fn install(&self, addon: &Addon) -> Result<()> {
        let pkg = format!("{}-{}", addon.name(), addon.spec.version);
        info!(%pkg, "installing pkg");
        let params = resolve_override_params(addon)?;
        let mut client = client_for(&addon.spec.kind, self.ctx(&addon.spec.version, params))?;
        client.validate_params().await?;
        client.install().await?;
        info!(%pkg, "installed pkg");
        Ok(())
    }

    /// Uninstall an addon
    pub async fn uninstall(&self, addon: &Addon) -> Result<()> {
        let pkg = format!("{}-{}", addon.name(), addon.spec.version);
        info!(%pkg, "uninstalling pkg");
        let params = resolve_override_params(addon)?;
        let mut client = client_for(&addon.spec.kind, self.ctx(&addon.spec.version, params))?;
        client.uninstall().await?;
        info!(%pkg, "uninstalled pkg");
        Ok(())
    }

    /// Validate then upgrade an addon
    pub async fn upgrade(&self, addon: &Addon) -> Result<()> {
        let pkg = format!("{}-{}", addon.name(), addon.spec.version);
        info!(%pkg, "upgrading pkg");
        let params = resolve_override_params(addon)?;
        let mut client = client_for(&addon.spec.kind, self.ctx(&addon.spec.version, params))?;
        client.validate_params().await?;
        client.upgrade().await?;
        info!(%pkg, "upgraded pkg");
        Ok(())
    }

    /// Probe health of an installed addon type
    pub async fn health(&self, addon_type: &str, version: &str) -> Result<bool> {
        let client = client_for(addon_type, self.ctx(version, BTreeMap::new()))?;
        client.health().await
    }

    /// Validate an addon's parameters without applying anything
    pub async fn validate(&self, addon: &Addon) -> Result<()> {
        let params = resolve_override_params(addon)?;
        let mut client = client_for(&addon.spec.kind, self.ctx(&addon.spec.version, params))?;
        client.validate_params().await
    }
}
