//! Monitoring stack addon (prometheus operator, grafana, exporters)

use async_trait::async_trait;
use tracing::{debug, error, info};

use addon_common::{Error, Result};

use super::{
    DEFAULT_DOCKER_REGISTRY, DEFAULT_QUAY_REGISTRY, ENV_DOCKER_REGISTRY, ENV_QUAY_REGISTRY,
    PARAM_DOCKER_REGISTRY, PARAM_QUAY_REGISTRY,
};
use crate::context::VariantCtx;
use crate::AddonClient;

const NS: &str = "pf9-monitoring";
const OPERATORS_NS: &str = "pf9-operators";
const OLM_NS: &str = "pf9-olm";
const TYPE_DIR: &str = "monitoring";
const PROM_STATEFULSET: &str = "prometheus-system";
const RULES_FILE: &str = "prometheus-rules.yaml";

/// Grafana UI reached through the API-server proxy; 200 means the whole
/// path (prometheus -> grafana -> nginx) is serving
const GRAFANA_URL: &str =
    "https://localhost:443/api/v1/namespaces/pf9-monitoring/services/http:grafana-ui:80/proxy/";

const INSTALL_FILES: [&str; 6] = [
    "prometheus-operator-0.46.0.yaml",
    "monhelper.yaml",
    "objects.yaml",
    "grafana.yaml",
    "kube-state-metrics.yaml",
    "node-exporter.yaml",
];
const UNINSTALL_FILES: [&str; 6] = [
    "objects.yaml",
    "kube-state-metrics.yaml",
    "node-exporter.yaml",
    "monhelper.yaml",
    "grafana.yaml",
    "prometheus-operator-0.46.0.yaml",
];

/// Sidecar directory holding secret/configmap payloads
const SIDECAR_DIR: &str = "promplus";

/// (sidecar file, secret name, data key)
const SIDECAR_SECRETS: [(&str, &str, &str); 3] = [
    ("additional-scrape-config.yaml", "scrapeconfig", "additional-scrape-config.yaml"),
    ("alertmanager.yaml", "alertmanager-sysalert", "alertmanager.yaml"),
    ("grafana-datasources", "grafana-datasources", "datasources.yaml"),
];

const DEFAULT_DASHBOARD: &str = "grafana-dashboard-cluster-explorer";

const GRAFANA_DASHBOARDS: [&str; 9] = [
    "grafana-dashboard-apiserver",
    "grafana-dashboard-events",
    "grafana-dashboard-fs",
    "grafana-dashboard-kubelet",
    "grafana-dashboard-kubernetes",
    "grafana-dashboard-memusage",
    "grafana-dashboard-network",
    "grafana-dashboard-node-exporter",
    "grafana-dashboard-pvc",
];

pub(crate) struct Monitoring {
    ctx: VariantCtx,
}

impl Monitoring {
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
            .override_registry_if_set(PARAM_QUAY_REGISTRY, ENV_QUAY_REGISTRY, DEFAULT_QUAY_REGISTRY);
    }

    async fn create_secret_from_sidecar(&self, file: &str, name: &str, key: &str) -> Result<()> {
        let payload = self.ctx.read_sidecar(TYPE_DIR, &format!("{SIDECAR_DIR}/{file}"))?;
        if self.ctx.cluster.get_secret(NS, name).await?.is_some() {
            info!("secret {NS}/{name} already exists");
            return Ok(());
        }
        debug!("creating secret {NS}/{name}");
        self.ctx.cluster.create_secret(NS, name, key, &payload).await
    }

    async fn create_config_map_from_sidecar(
        &self,
        file: &str,
        name: &str,
        key: &str,
    ) -> Result<()> {
        let payload = self.ctx.read_sidecar(TYPE_DIR, &format!("{SIDECAR_DIR}/{file}"))?;
        let payload = String::from_utf8(payload)
            .map_err(|e| Error::serialization(format!("configmap payload {file}: {e}")))?;
        if self.ctx.cluster.get_config_map(NS, name).await?.is_some() {
            info!("configmap {NS}/{name} already exists");
            return Ok(());
        }
        debug!("creating configmap {NS}/{name}");
        self.ctx.cluster.create_config_map(NS, name, key, &payload).await
    }

    async fn pre_install(&self) -> Result<()> {
        self.ctx.cluster.ensure_namespace(NS, &[]).await?;
        self.ctx.cluster.ensure_namespace(OPERATORS_NS, &[]).await?;

        for (file, name, key) in SIDECAR_SECRETS {
            self.create_secret_from_sidecar(file, name, key).await?;
        }

        self.create_config_map_from_sidecar("grafana-dashboards", "grafana-dashboards", "dashboards.yaml")
            .await?;
        self.create_config_map_from_sidecar(DEFAULT_DASHBOARD, DEFAULT_DASHBOARD, "home.json")
            .await?;
        for board in GRAFANA_DASHBOARDS {
            self.create_config_map_from_sidecar(board, board, &format!("{board}.json")).await?;
        }
        self.create_config_map_from_sidecar("nginx-config", "nginx-conf", "nginx.conf").await?;
        self.create_config_map_from_sidecar("grafana-config", "grafana-conf", "grafana.ini")
            .await?;

        Ok(())
    }

    async fn post_uninstall(&self) -> Result<()> {
        let mut config_maps = vec!["grafana-dashboards", DEFAULT_DASHBOARD, "grafana-conf", "nginx-conf"];
        config_maps.extend(GRAFANA_DASHBOARDS);
        for name in config_maps {
            self.ctx.cluster.delete_config_map(NS, name).await?;
        }
        for name in ["scrapeconfig", "alertmanager-sysalert", "grafana-datasources"] {
            self.ctx.cluster.delete_secret(NS, name).await?;
        }
        Ok(())
    }

    /// Earlier releases shipped this stack through OLM; sweep those
    /// artifacts so the two installs cannot fight. Best-effort only.
    async fn cleanup_legacy_olm(&self) {
        let targets: [(&str, &str, &str, &str); 5] = [
            (
                OPERATORS_NS,
                "prometheusoperator.0.37.0",
                "clusterserviceversion",
                "operators.coreos.com/v1alpha1",
            ),
            (OLM_NS, "olm-operator", "Deployment", "apps/v1"),
            (OLM_NS, "catalog-operator", "Deployment", "apps/v1"),
            (OLM_NS, "packageserver", "clusterserviceversion", "operators.coreos.com/v1alpha1"),
            (OLM_NS, "platform9-operators", "catalogsource", "operators.coreos.com/v1alpha1"),
        ];
        for (ns, name, kind, api_version) in targets {
            if let Err(e) = self.ctx.cluster.delete_by_gvk(api_version, kind, Some(ns), name).await
            {
                debug!(%e, %kind, %name, "legacy olm cleanup skipped");
            }
        }
        if let Err(e) = self.ctx.cluster.delete_config_map(OLM_NS, "appbert").await {
            debug!(%e, "legacy olm configmap cleanup skipped");
        }
    }
}

#[async_trait]
impl AddonClient for Monitoring {
    async fn validate_params(&mut self) -> Result<()> {
        self.ctx.require("retentionTime")?;

        // storageClassName is optional; when set the PVC must be sized in Gi
        if self.ctx.param("storageClassName").is_none() {
            return Ok(());
        }
        let pvc_size =
            self.ctx.param("pvcSize").ok_or_else(|| Error::invalid_params("pvcSize"))?;
        if !pvc_size.ends_with("Gi") {
            return Err(Error::invalid_params("pvcSize invalid / "));
        }
        Ok(())
    }

    async fn health(&self) -> Result<bool> {
        match self.ctx.cluster.statefulset_ready_replicas(NS, PROM_STATEFULSET).await? {
            Some(ready) if ready > 0 => {}
            _ => return Ok(false),
        }

        let status = self.ctx.cluster.proxy_get_status(GRAFANA_URL).await?;
        debug!(%status, url = GRAFANA_URL, "invoked grafana url");
        if status != 200 {
            error!(%status, expected = 200, url = GRAFANA_URL, "monitoring health check failed");
            return Ok(false);
        }
        Ok(true)
    }

    async fn install(&mut self) -> Result<()> {
        self.override_registries();
        self.pre_install().await?;
        for file in INSTALL_FILES {
            self.ctx.render_and_apply(TYPE_DIR, file).await?;
        }
        // Rules ship as-is, no templating
        self.ctx.apply_untemplated(TYPE_DIR, RULES_FILE).await
    }

    async fn uninstall(&mut self) -> Result<()> {
        self.cleanup_legacy_olm().await;
        self.override_registries();

        if let Err(e) = self.ctx.delete_untemplated(TYPE_DIR, RULES_FILE).await {
            error!(%e, "failed to delete prometheus rules");
        }
        for file in UNINSTALL_FILES {
            if let Err(e) = self.ctx.render_and_delete(TYPE_DIR, file).await {
                error!(%e, %file, "error deleting yaml");
            }
        }
        if let Err(e) = self.post_uninstall().await {
            error!(%e, "failed in post uninstall for monitoring");
        }
        Ok(())
    }
}
