//! Remote control-plane access
//!
//! Materializes a kube client for the central control plane: mint a token
//! through the conductor, substitute it into the kubeconfig template, and
//! build a client from the rendered file. The last working client is kept
//! so a flapping conductor does not take the mirror down with it.

use std::path::PathBuf;

use async_trait::async_trait;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::warn;

use addon_common::crd::ClusterAddon;
use addon_common::{AgentConfig, Error, Result, CLUSTER_LABEL, REMOTE_NAMESPACE};

use super::RemoteAddons;
use crate::sync::token::TokenClient;

/// ClusterAddon access against the central control plane
pub struct SunpikeRemote {
    cluster_id: String,
    project_id: String,
    du_fqdn: String,
    kubecfg_template: PathBuf,
    tokens: TokenClient,
    cached: tokio::sync::Mutex<Option<Client>>,
}

impl SunpikeRemote {
    /// Build from agent configuration
    pub fn new(cfg: &AgentConfig) -> Self {
        Self {
            cluster_id: cfg.cluster_id.clone(),
            project_id: cfg.project_id.clone(),
            du_fqdn: cfg.du_fqdn.clone(),
            kubecfg_template: cfg.kubecfg_template.clone(),
            tokens: TokenClient::new(cfg.conductor_url.clone()),
            cached: tokio::sync::Mutex::new(None),
        }
    }

    /// A client for the remote API, falling back to the last working one
    /// when a fresh token or config cannot be produced
    async fn client(&self) -> Result<Client> {
        match self.build_client().await {
            Ok(client) => {
                let mut cached = self.cached.lock().await;
                *cached = Some(client.clone());
                Ok(client)
            }
            Err(e) => {
                let cached = self.cached.lock().await;
                if let Some(client) = cached.as_ref() {
                    warn!(error = %e, "reusing cached remote client");
                    return Ok(client.clone());
                }
                Err(e)
            }
        }
    }

    async fn build_client(&self) -> Result<Client> {
        let auth = self.tokens.sunpike_auth(&self.cluster_id, &self.project_id).await?;

        let template = tokio::fs::read_to_string(&self.kubecfg_template)
            .await
            .map_err(|e| Error::gen_token(format!("reading kubecfg template: {e}")))?;
        let rendered =
            render_kubeconfig(&template, &self.du_fqdn, &auth.token, &auth.project_id);

        let path = PathBuf::from(format!("{}.cfg", self.cluster_id));
        tokio::fs::write(&path, &rendered)
            .await
            .map_err(|e| Error::gen_token(format!("writing kubecfg: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }

        let kubeconfig = Kubeconfig::read_from(&path)
            .map_err(|e| Error::gen_token(format!("reading kubecfg: {e}")))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::gen_token(format!("loading kubecfg: {e}")))?;
        Client::try_from(config)
            .map_err(|e| Error::gen_token(format!("creating remote client: {e}")))
    }

    fn api(&self, client: Client) -> Api<ClusterAddon> {
        Api::namespaced(client, REMOTE_NAMESPACE)
    }
}

/// Substitute the three placeholders of the kubeconfig template
fn render_kubeconfig(template: &str, du_fqdn: &str, token: &str, project_id: &str) -> String {
    template
        .replacen("__DU_QBERT_FQDN__", du_fqdn, 1)
        .replacen("__KEYSTONE_TOKEN__", token, 1)
        .replacen("__PROJECT_ID__", project_id, 1)
}

#[async_trait]
impl RemoteAddons for SunpikeRemote {
    async fn list(&self) -> Result<Vec<ClusterAddon>> {
        let client = self.client().await?;
        let lp = ListParams::default().labels(&format!("{CLUSTER_LABEL}={}", self.cluster_id));
        let list = self
            .api(client)
            .list(&lp)
            .await
            .map_err(|e| Error::list_cluster_addons(e.to_string()))?;
        Ok(list.items)
    }

    async fn create(&self, addon: &ClusterAddon) -> Result<()> {
        let client = self.client().await?;
        self.api(client).create(&PostParams::default(), addon).await?;
        Ok(())
    }

    async fn update_status(&self, addon: &ClusterAddon) -> Result<()> {
        let client = self.client().await?;
        let patch = serde_json::json!({ "status": addon.status });
        self.api(client)
            .patch_status(addon.name(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
