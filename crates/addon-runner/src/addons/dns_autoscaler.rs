//! DNS horizontal autoscaler addon

use async_trait::async_trait;

use addon_common::Result;

use super::{DEFAULT_K8S_REGISTRY, ENV_K8S_REGISTRY, PARAM_K8S_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "kube-system";
const TYPE_DIR: &str = "dns-autoscaler";
const DEPLOY: &str = "kube-dns-autoscaler";

const FILES: [&str; 2] = ["cfgmap.yaml", "deploy.yaml"];

pub(crate) struct DnsAutoscaler {
    ctx: VariantCtx,
}

impl DnsAutoscaler {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AddonClient for DnsAutoscaler {
    async fn validate_params(&mut self) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        match self.ctx.cluster.deployment_ready_replicas(NS, DEPLOY).await? {
            Some(ready) => Ok(ready > 0),
            None => Ok(false),
        }
    }

    async fn install(&mut self) -> Result<()> {
        self.ctx
            .override_registry(PARAM_K8S_REGISTRY, ENV_K8S_REGISTRY, DEFAULT_K8S_REGISTRY);
        for file in FILES {
            self.ctx.render_and_apply(TYPE_DIR, file).await?;
        }
        Ok(())
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.ctx
            .override_registry(PARAM_K8S_REGISTRY, ENV_K8S_REGISTRY, DEFAULT_K8S_REGISTRY);
        for file in FILES.iter().rev() {
            self.ctx.render_and_delete(TYPE_DIR, file).await?;
        }
        Ok(())
    }
}
