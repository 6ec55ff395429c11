//! Profile agent addon

use async_trait::async_trait;

use addon_common::Result;

use super::{ENV_DOCKER_REGISTRY, PARAM_DOCKER_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "platform9-system";
const TYPE_DIR: &str = "pf9-profile-agent";
const FILE: &str = "pf9-profile-agent.yaml";
const DEPLOY: &str = "pf9-profile-agent";

pub(crate) struct ProfileAgent {
    ctx: VariantCtx,
}

impl ProfileAgent {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl AddonClient for ProfileAgent {
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
        self.ctx.override_registry(PARAM_DOCKER_REGISTRY, ENV_DOCKER_REGISTRY, "docker.io");

        // The agent reports back to the control plane under this identity
        let cluster_id = std::env::var("CLUSTER_ID").unwrap_or_default();
        let project_id = std::env::var("PROJECT_ID").unwrap_or_default();
        self.ctx.set_param("ClusterId", cluster_id);
        self.ctx.set_param("ProjectId", project_id);

        self.ctx.cluster.ensure_namespace(NS, &[]).await?;
        self.ctx.render_and_apply(TYPE_DIR, FILE).await
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.ctx.override_registry(PARAM_DOCKER_REGISTRY, ENV_DOCKER_REGISTRY, "docker.io");
        self.ctx.render_and_delete(TYPE_DIR, FILE).await
    }
}
