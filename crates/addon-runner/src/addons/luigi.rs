//! Luigi networking-operator addon

use async_trait::async_trait;

use addon_common::Result;

use super::{
    DEFAULT_DOCKER_REGISTRY, DEFAULT_GCR_REGISTRY, ENV_DOCKER_REGISTRY, ENV_GCR_REGISTRY,
    PARAM_DOCKER_REGISTRY, PARAM_GCR_REGISTRY,
};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "luigi-system";
const TYPE_DIR: &str = "luigi";
const FILE: &str = "luigi.yaml";
const DEPLOY: &str = "luigi-controller-manager";

pub(crate) struct Luigi {
    ctx: VariantCtx,
}

impl Luigi {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }

    fn override_registries(&mut self) {
        self.ctx.override_registry_if_set(
            PARAM_DOCKER_REGISTRY,
            ENV_DOCKER_REGISTRY,
            DEFAULT_DOCKER_REGISTRY,
        );
        self.ctx
            .override_registry_if_set(PARAM_GCR_REGISTRY, ENV_GCR_REGISTRY, DEFAULT_GCR_REGISTRY);
    }
}

#[async_trait]
impl AddonClient for Luigi {
    async fn validate_params(&mut self) -> Result<()> {
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
        self.ctx.render_and_apply(TYPE_DIR, FILE).await
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.override_registries();
        self.ctx.render_and_delete(TYPE_DIR, FILE).await
    }
}
