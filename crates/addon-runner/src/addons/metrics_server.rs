//! metrics-server addon

use async_trait::async_trait;

use addon_common::Result;

use super::{DEFAULT_K8S_REGISTRY, ENV_K8S_REGISTRY, PARAM_K8S_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "kube-system";
const TYPE_DIR: &str = "metrics-server";
const FILE: &str = "metrics-server.yaml";
const DEPLOY: &str = "metrics-server-v0.3.6";

pub(crate) struct MetricsServer {
    ctx: VariantCtx,
}

impl MetricsServer {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AddonClient for MetricsServer {
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
        self.ctx.render_and_apply(TYPE_DIR, FILE).await
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.ctx
            .override_registry(PARAM_K8S_REGISTRY, ENV_K8S_REGISTRY, DEFAULT_K8S_REGISTRY);
        self.ctx.render_and_delete(TYPE_DIR, FILE).await
    }
}
