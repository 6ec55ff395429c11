//! CoreDNS addon

use async_trait::async_trait;
use tracing::{error, warn};

use addon_common::{Error, Result};

use super::{DEFAULT_K8S_REGISTRY, ENV_K8S_REGISTRY, PARAM_K8S_REGISTRY};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "kube-system";
const TYPE_DIR: &str = "coredns";
const DEPLOY: &str = "coredns";
const FILE: &str = "coredns.yaml";

// Bootstrap-critical: transient failures (etcd not up yet) are retried
// before the error surfaces in status.
const RETRY_COUNT: u32 = 3;
const RETRY_SLEEP_SECS: u64 = 30;

pub(crate) struct CoreDns {
    ctx: VariantCtx,
}

impl CoreDns {
    pub fn new(ctx: VariantCtx) -> Self {
        Self { ctx }
    }

    async fn install_once(&mut self) -> Result<()> {
        self.ctx
            .override_registry(PARAM_K8S_REGISTRY, ENV_K8S_REGISTRY, DEFAULT_K8S_REGISTRY);
        self.ctx.render_and_apply(TYPE_DIR, FILE).await
    }
}

#[async_trait]
impl AddonClient for CoreDns {
    async fn validate_params(&mut self) -> Result<()> {
        for p in ["dnsDomain", "dnsMemoryLimit"] {
            self.ctx.require(p)?;
        }

        // dnsServer may come from the shared addon-config secret instead
        if self.ctx.param("dnsServer").is_some() {
            return Ok(());
        }

        let secret = self
            .ctx
            .addon_config()
            .await?
            .ok_or_else(|| Error::internal("addon-config secret not found"))?;
        let dns_ip = secret
            .get("dnsIP")
            .ok_or_else(|| Error::internal("dnsIP not found in addon-config"))?;
        let dns_ip = String::from_utf8(dns_ip.clone())
            .map_err(|e| Error::serialization(format!("dnsIP in addon-config: {e}")))?;
        self.ctx.set_param("dnsServer", dns_ip);
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        match self.ctx.cluster.deployment_ready_replicas(NS, DEPLOY).await? {
            Some(ready) => Ok(ready > 0),
            None => Ok(false),
        }
    }

    async fn install(&mut self) -> Result<()> {
        let mut last = None;
        for attempt in 1..=RETRY_COUNT {
            match self.install_once().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!(%e, attempt, of = RETRY_COUNT, "error installing coredns");
                    last = Some(e);
                    if attempt < RETRY_COUNT {
                        tokio::time::sleep(std::time::Duration::from_secs(RETRY_SLEEP_SECS))
                            .await;
                    }
                }
            }
        }
        warn!("coredns install giving up after {RETRY_COUNT} attempts");
        Err(last.expect("retry loop ran at least once"))
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.ctx
            .override_registry(PARAM_K8S_REGISTRY, ENV_K8S_REGISTRY, DEFAULT_K8S_REGISTRY);
        self.ctx.render_and_delete(TYPE_DIR, FILE).await
    }
}
