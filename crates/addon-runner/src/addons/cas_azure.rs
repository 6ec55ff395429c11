//! Cluster autoscaler addon, Azure variant

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use addon_common::{Error, Result};

use super::{DEFAULT_K8S_REGISTRY, ENV_K8S_REGISTRY, PARAM_K8S_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "kube-system";
const TYPE_DIR: &str = "cluster-autoscaler/azure";
const FILE: &str = "cluster-autoscaler.yaml";
const DEPLOY: &str = "cluster-autoscaler";

const REQUIRED_PARAMS: [&str; 2] = ["minNumWorkers", "maxNumWorkers"];
const CRED_PARAMS: [&str; 5] =
    ["clientID", "clientSecret", "resourceGroup", "subscriptionID", "tenantID"];

pub(crate) struct AutoScalerAzure {
    ctx: VariantCtx,
}

impl AutoScalerAzure {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AddonClient for AutoScalerAzure {
    async fn validate_params(&mut self) -> Result<()> {
        for p in REQUIRED_PARAMS {
            self.ctx.require(p)?;
        }

        // All credentials spelled out explicitly wins; otherwise the whole
        // set comes from the shared addon-config secret, re-encoded the way
        // the manifest embeds them.
        if CRED_PARAMS.iter().all(|p| self.ctx.param(p).is_some()) {
            return Ok(());
        }

        let secret = self
            .ctx
            .addon_config()
            .await?
            .ok_or_else(|| Error::internal("addon-config secret not found"))?;
        for p in CRED_PARAMS {
            let value = secret
                .get(p)
                .ok_or_else(|| Error::internal(format!("{p} not found in addon-config")))?;
            self.ctx.set_param(p, STANDARD.encode(value));
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
