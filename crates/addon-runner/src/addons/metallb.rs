//! MetalLB addon

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use tracing::info;

use addon_common::{Error, Result};

use super::{DEFAULT_DOCKER_REGISTRY, ENV_DOCKER_REGISTRY, PARAM_DOCKER_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "metallb-system";
const TYPE_DIR: &str = "metallb";
const DEPLOY: &str = "controller";
const DAEMONSET: &str = "speaker";
const MEMBERLIST_SECRET: &str = "memberlist";
const MEMBERLIST_KEY: &str = "secretkey";
const MEMBERLIST_BYTES: usize = 10;

const IP_RANGE_PARAM: &str = "MetallbIpRange";

pub(crate) struct Metallb {
    ctx: VariantCtx,
}

impl Metallb {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }

    fn uses_config_map(&self) -> bool {
        self.ctx.param(IP_RANGE_PARAM).is_some()
    }

    fn files(&self) -> Vec<&'static str> {
        let mut files = vec!["metallb.yaml"];
        if self.uses_config_map() {
            files.push("cfgmap.yaml");
        }
        files
    }

    /// Reformat the comma-separated range list into the indented block the
    /// address-pool document expects, one range per line
    fn process_ip_range(&mut self) -> Result<()> {
        let raw = self
            .ctx
            .param(IP_RANGE_PARAM)
            .ok_or_else(|| Error::internal("parameter MetallbIpRange not found"))?;
        let mut block = String::new();
        for range in raw.split(',') {
            let range = range.trim();
            if range.is_empty() {
                continue;
            }
            block.push_str(&format!("      - {range}\n"));
        }
        self.ctx.set_param(IP_RANGE_PARAM, block);
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        self.ctx.override_registry_if_set(
            PARAM_DOCKER_REGISTRY,
            ENV_DOCKER_REGISTRY,
            DEFAULT_DOCKER_REGISTRY,
        );
        if self.uses_config_map() {
            self.process_ip_range()?;
        }
        Ok(())
    }

    /// The speaker mesh needs a shared key; generate it exactly once so
    /// repeated installs do not churn the membership
    async fn post_install(&self) -> Result<()> {
        if self.ctx.cluster.get_secret(NS, MEMBERLIST_SECRET).await?.is_some() {
            info!("secret member list already exists");
            return Ok(());
        }
        info!("secret member list not found, creating it");
        let mut key = [0u8; MEMBERLIST_BYTES];
        rand::thread_rng().fill_bytes(&mut key);
        let encoded = STANDARD.encode(key);
        self.ctx
            .cluster
            .create_secret(NS, MEMBERLIST_SECRET, MEMBERLIST_KEY, encoded.as_bytes())
            .await
    }
}

#[async_trait]
impl AddonClient for Metallb {
    async fn validate_params(&mut self) -> Result<()> {
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        let daemonset = self.ctx.cluster.daemonset_status(NS, DAEMONSET).await?;
        let deploy = self.ctx.cluster.deployment_ready_replicas(NS, DEPLOY).await?;
        match (deploy, daemonset) {
            (Some(ready), Some((number_ready, desired))) => {
                Ok(ready > 0 && number_ready == desired)
            }
            _ => Ok(false),
        }
    }

    async fn install(&mut self) -> Result<()> {
        self.prepare()?;
        for file in self.files() {
            self.ctx.render_and_apply(TYPE_DIR, file).await?;
        }
        self.post_install().await
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.prepare()?;
        for file in self.files().iter().rev() {
            self.ctx.render_and_delete(TYPE_DIR, file).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_common::cluster::FakeCluster;
    use addon_common::template::TemplateEngine;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn metallb_with(params: &[(&str, &str)]) -> Metallb {
        Metallb::new(VariantCtx {
            cluster: Arc::new(FakeCluster::new()),
            engine: Arc::new(TemplateEngine::new()),
            template_root: std::env::temp_dir(),
            version: "0.12.1".into(),
            params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        })
    }

    #[test]
    fn ip_ranges_render_one_per_indented_line() {
        let mut metallb =
            metallb_with(&[(IP_RANGE_PARAM, "10.0.0.21-10.0.0.25, 10.0.0.30-10.0.0.32")]);
        metallb.process_ip_range().unwrap();
        assert_eq!(
            metallb.ctx.param(IP_RANGE_PARAM).unwrap(),
            "      - 10.0.0.21-10.0.0.25\n      - 10.0.0.30-10.0.0.32\n"
        );
    }

    #[test]
    fn empty_segments_are_skipped() {
        let mut metallb = metallb_with(&[(IP_RANGE_PARAM, "10.0.0.1-10.0.0.2, ,")]);
        metallb.process_ip_range().unwrap();
        assert_eq!(metallb.ctx.param(IP_RANGE_PARAM).unwrap(), "      - 10.0.0.1-10.0.0.2\n");
    }

    #[test]
    fn config_map_rendered_only_with_range() {
        assert_eq!(metallb_with(&[]).files(), vec!["metallb.yaml"]);
        assert_eq!(
            metallb_with(&[(IP_RANGE_PARAM, "10.0.0.1-10.0.0.2")]).files(),
            vec!["metallb.yaml", "cfgmap.yaml"]
        );
    }
}
