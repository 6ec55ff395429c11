//! Cluster autoscaler addon, AWS variant

use async_trait::async_trait;

use addon_common::Result;

use super::{DEFAULT_K8S_REGISTRY, ENV_K8S_REGISTRY, PARAM_K8S_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "kube-system";
const TYPE_DIR: &str = "cluster-autoscaler/aws";
const FILE: &str = "cluster-autoscaler.yaml";
const DEPLOY: &str = "cluster-autoscaler";

const REQUIRED_PARAMS: [&str; 6] =
    ["clusterUUID", "clusterRegion", "cpuLimit", "memLimit", "cpuRequest", "memRequest"];

pub(crate) struct AutoScalerAws {
    ctx: VariantCtx,
}

impl AutoScalerAws {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AddonClient for AutoScalerAws {
    async fn validate_params(&mut self) -> Result<()> {
        for p in REQUIRED_PARAMS {
            self.ctx.require(p)?;
        }
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        match self.ctx.cluster.deployment_ready_replicas(NS, DEPLOY).await? {
            Some(ready) => Ok(ready > 0),
            None => Ok(false),
        }
    }

    async fn install(&mut self) -> Result<()> {
        self.ctx.guard_cluster_upgrade().await?;
        self.ctx
            .override_registry(PARAM_K8S_REGISTRY, ENV_K8S_REGISTRY, DEFAULT_K8S_REGISTRY);
        self.ctx.render_and_apply(TYPE_DIR, FILE).await
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.ctx.guard_cluster_upgrade().await?;
        self.ctx
            .override_registry(PARAM_K8S_REGISTRY, ENV_K8S_REGISTRY, DEFAULT_K8S_REGISTRY);
        self.ctx.render_and_delete(TYPE_DIR, FILE).await
    }
}
