//! Kubernetes dashboard addon

use async_trait::async_trait;
use tracing::info;

use addon_common::{Error, Result};

use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "kubernetes-dashboard";
const TYPE_DIR: &str = "dashboard";
const FILE: &str = "dashboard.yaml";
const DEPLOY: &str = "kubernetes-dashboard";
const DEPLOY_SCRAPER: &str = "dashboard-metrics-scraper";
const CERT_SECRET: &str = "kubernetes-dashboard-certs";
const CERT_KEY: &str = "dashboard.key";
const CERT_CRT: &str = "dashboard.crt";

pub(crate) struct Dashboard {
    ctx: VariantCtx,
}

impl Dashboard {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }

    /// The dashboard serves TLS from a pre-provisioned secret; refuse to
    /// install until it exists with both halves of the keypair
    async fn pre_install(&self) -> Result<()> {
        let secret = self
            .ctx
            .cluster
            .get_secret(NS, CERT_SECRET)
            .await?
            .ok_or_else(|| Error::internal(format!("secret {NS}/{CERT_SECRET} not found")))?;
        for key in [CERT_KEY, CERT_CRT] {
            if !secret.contains_key(key) {
                return Err(Error::internal(format!(
                    "key: {key} not found in secret {NS}/{CERT_SECRET}"
                )));
            }
        }
        info!("secret {NS}/{CERT_SECRET} exists");
        Ok(())
    }
}

#[async_trait]
impl AddonClient for Dashboard {
    async fn validate_params(&mut self) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        let scraper = self.ctx.cluster.deployment_ready_replicas(NS, DEPLOY_SCRAPER).await?;
        let deploy = self.ctx.cluster.deployment_ready_replicas(NS, DEPLOY).await?;
        match (deploy, scraper) {
            (Some(d), Some(s)) => Ok(d > 0 && s > 0),
            _ => Ok(false),
        }
    }

    async fn install(&mut self) -> Result<()> {
        self.pre_install().await?;
        self.ctx.render_and_apply(TYPE_DIR, FILE).await
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.ctx.render_and_delete(TYPE_DIR, FILE).await
    }
}
