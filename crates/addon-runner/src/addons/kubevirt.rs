//! KubeVirt addon

use async_trait::async_trait;

use addon_common::Result;

use super::{DEFAULT_QUAY_REGISTRY, ENV_QUAY_REGISTRY, PARAM_QUAY_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "kubevirt";
const CDI_NS: &str = "cdi";
const TYPE_DIR: &str = "kubevirt";
const CDI_DEPLOY: &str = "cdi-operator";
const OPERATOR_DEPLOY: &str = "virt-operator";

const INSTALL_FILES: [&str; 4] =
    ["kubevirt-operator.yaml", "kubevirt-cr.yaml", "cdi-operator.yaml", "cdi-cr.yaml"];
const UNINSTALL_FILES: [&str; 4] =
    ["kubevirt-cr.yaml", "cdi-cr.yaml", "cdi-operator.yaml", "kubevirt-operator.yaml"];

// The operators own child workloads; give them time to reap before the
// operator manifests themselves go away.
const OPERATOR_SETTLE_SECS: u64 = 30;

// Child resources the operators sometimes leave behind
const LEFTOVER_CDI_DEPLOYS: [&str; 3] = ["cdi-apiserver", "cdi-deployment", "cdi-uploadproxy"];
const LEFTOVER_VIRT_DEPLOYS: [&str; 2] = ["virt-api", "virt-controller"];
const LEFTOVER_VIRT_DAEMONSET: &str = "virt-handler";

pub(crate) struct KubeVirt {
    ctx: VariantCtx,
}

impl KubeVirt {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AddonClient for KubeVirt {
    async fn validate_params(&mut self) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        let cdi = self.ctx.cluster.deployment_ready_replicas(CDI_NS, CDI_DEPLOY).await?;
        let operator = self.ctx.cluster.deployment_ready_replicas(NS, OPERATOR_DEPLOY).await?;
        Ok(cdi.is_some() && operator.is_some())
    }

    async fn install(&mut self) -> Result<()> {
        self.ctx.cluster.ensure_namespace(NS, &[("kubevirt.io", "")]).await?;
        self.ctx.cluster.ensure_namespace(CDI_NS, &[("cdi.kubevirt.io", "")]).await?;

        self.ctx
            .override_registry_if_set(PARAM_QUAY_REGISTRY, ENV_QUAY_REGISTRY, DEFAULT_QUAY_REGISTRY);
        for file in INSTALL_FILES {
            self.ctx.render_and_apply(TYPE_DIR, file).await?;
        }
        Ok(())
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.ctx
            .override_registry_if_set(PARAM_QUAY_REGISTRY, ENV_QUAY_REGISTRY, DEFAULT_QUAY_REGISTRY);
        for (index, file) in UNINSTALL_FILES.iter().enumerate() {
            self.ctx.render_and_delete(TYPE_DIR, file).await?;
            // Both CR documents are gone after the second file
            if index == 1 {
                tokio::time::sleep(std::time::Duration::from_secs(OPERATOR_SETTLE_SECS)).await;
            }
        }

        for deploy in LEFTOVER_CDI_DEPLOYS {
            self.ctx.cluster.delete_deployment(CDI_NS, deploy).await?;
        }
        for deploy in LEFTOVER_VIRT_DEPLOYS {
            self.ctx.cluster.delete_deployment(NS, deploy).await?;
        }
        self.ctx.cluster.delete_daemonset(NS, LEFTOVER_VIRT_DAEMONSET).await?;

        Ok(())
    }
}
