//! Metal3 bare-metal addon

use async_trait::async_trait;

use addon_common::Result;

use super::{
    DEFAULT_GCR_REGISTRY, DEFAULT_QUAY_REGISTRY, ENV_GCR_REGISTRY, ENV_QUAY_REGISTRY,
    PARAM_GCR_REGISTRY, PARAM_QUAY_REGISTRY,
};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "baremetal-operator-system";
const TYPE_DIR: &str = "metal3";
const DEPLOY: &str = "baremetal-operator-controller-manager";

const INSTALL_FILES: [&str; 5] =
    ["cert-manager.yaml", "configmap.yaml", "ironic.yaml", "bmo-cert.yaml", "bmo.yaml"];
const UNINSTALL_FILES: [&str; 5] =
    ["bmo.yaml", "bmo-cert.yaml", "ironic.yaml", "configmap.yaml", "cert-manager.yaml"];

const REQUIRED_PARAMS: [&str; 3] =
    ["Metal3DhcpInterface", "Metal3DhcpRange", "Metal3IronicHostIP"];

// cert-manager webhooks need to come up before dependent documents land
const FILE_SETTLE_SECS: u64 = 15;
// Allow the operator to reap its children after the CRs are deleted
const OPERATOR_SETTLE_SECS: u64 = 30;

pub(crate) struct Metal3 {
    ctx: VariantCtx,
}

impl Metal3 {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }

    fn override_registries(&mut self) {
        self.ctx
            .override_registry_if_set(PARAM_QUAY_REGISTRY, ENV_QUAY_REGISTRY, DEFAULT_QUAY_REGISTRY);
        self.ctx
            .override_registry_if_set(PARAM_GCR_REGISTRY, ENV_GCR_REGISTRY, DEFAULT_GCR_REGISTRY);
    }
}

#[async_trait]
impl AddonClient for Metal3 {
    async fn validate_params(&mut self) -> Result<()> {
        for p in REQUIRED_PARAMS {
            self.ctx.require(p)?;
        }
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        Ok(self.ctx.cluster.deployment_ready_replicas(NS, DEPLOY).await?.is_some())
    }

    async fn install(&mut self) -> Result<()> {
        self.ctx
            .cluster
            .ensure_namespace(NS, &[("control-plane", "controller-manager")])
            .await?;
        self.override_registries();
        for file in INSTALL_FILES {
            self.ctx.render_and_apply(TYPE_DIR, file).await?;
            tokio::time::sleep(std::time::Duration::from_secs(FILE_SETTLE_SECS)).await;
        }
        Ok(())
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.override_registries();
        for (index, file) in UNINSTALL_FILES.iter().enumerate() {
            self.ctx.render_and_delete(TYPE_DIR, file).await?;
            if index == 1 {
                tokio::time::sleep(std::time::Duration::from_secs(OPERATOR_SETTLE_SECS)).await;
            }
        }
        Ok(())
    }
}
