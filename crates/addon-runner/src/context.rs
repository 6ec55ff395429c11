//! Shared per-invocation state and helpers for addon variants

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use addon_common::config::registry_override;
use addon_common::template::TemplateEngine;
use addon_common::{yaml, Cluster, Error, Result, ADDONS_NAMESPACE, ADDON_CONFIG_SECRET};

/// Subdirectory of the template root that receives rendered output
const CREATE_DIR: &str = "create";

/// ConfigMap consulted by the cluster-upgrade guard
const UPGRADE_GUARD_NS: &str = "default";
const UPGRADE_GUARD_CONFIGMAP: &str = "pmk";

/// Per-invocation context handed to an addon variant: the cluster handle,
/// the template engine, and the resolved parameter map
pub(crate) struct VariantCtx {
    pub cluster: Arc<dyn Cluster>,
    pub engine: Arc<TemplateEngine>,
    pub template_root: PathBuf,
    pub version: String,
    pub params: BTreeMap<String, String>,
}

impl VariantCtx {
    /// Resolve the input and output directories for an addon's templates.
    ///
    /// The input directory must already exist; the output scratch
    /// directory under `create/` is created on demand.
    pub fn dirs(&self, type_dir: &str) -> Result<(PathBuf, PathBuf)> {
        let input = self.template_root.join(type_dir).join(&self.version);
        if !input.is_dir() {
            return Err(Error::internal(format!("dir {} does not exist", input.display())));
        }
        let output = self.template_root.join(CREATE_DIR).join(type_dir).join(&self.version);
        std::fs::create_dir_all(&output)
            .map_err(|e| Error::internal(format!("creating {}: {e}", output.display())))?;
        Ok((input, output))
    }

    /// Render one template file into the scratch tree and return its path
    pub fn render(&self, type_dir: &str, file: &str) -> Result<PathBuf> {
        let (input, output) = self.dirs(type_dir)?;
        let out_path = output.join(file);
        self.engine.render_file(&input.join(file), &out_path, &self.params)?;
        Ok(out_path)
    }

    /// Apply every document of a rendered file, in source order
    pub async fn apply_file(&self, path: &Path) -> Result<()> {
        for doc in yaml::split_file(path)? {
            if let Ok(coords) = addon_common::cluster::object_coords(&doc) {
                info!(kind = %coords.kind, name = %coords.name, "creating object");
            }
            self.cluster.apply_object(&doc).await?;
        }
        Ok(())
    }

    /// Delete every document of a rendered file, in reverse source order
    pub async fn delete_file(&self, path: &Path) -> Result<()> {
        for doc in yaml::split_file(path)?.iter().rev() {
            if let Ok(coords) = addon_common::cluster::object_coords(doc) {
                info!(kind = %coords.kind, name = %coords.name, "deleting object");
            }
            self.cluster.delete_object(doc).await?;
        }
        Ok(())
    }

    /// Render one file and apply its documents
    pub async fn render_and_apply(&self, type_dir: &str, file: &str) -> Result<()> {
        let rendered = self.render(type_dir, file)?;
        self.apply_file(&rendered).await
    }

    /// Render one file and delete its documents in reverse order
    pub async fn render_and_delete(&self, type_dir: &str, file: &str) -> Result<()> {
        let rendered = self.render(type_dir, file)?;
        self.delete_file(&rendered).await
    }

    /// Apply an untemplated file straight from the input tree
    pub async fn apply_untemplated(&self, type_dir: &str, file: &str) -> Result<()> {
        let (input, _) = self.dirs(type_dir)?;
        self.apply_file(&input.join(file)).await
    }

    /// Delete an untemplated file's documents in reverse order
    pub async fn delete_untemplated(&self, type_dir: &str, file: &str) -> Result<()> {
        let (input, _) = self.dirs(type_dir)?;
        self.delete_file(&input.join(file)).await
    }

    /// Read a sidecar payload file from the input tree
    pub fn read_sidecar(&self, type_dir: &str, rel: &str) -> Result<Vec<u8>> {
        let (input, _) = self.dirs(type_dir)?;
        let path = input.join(rel);
        std::fs::read(&path)
            .map_err(|e| Error::internal(format!("reading {}: {e}", path.display())))
    }

    /// Parameter value, if set
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Set a parameter
    pub fn set_param(&mut self, name: &str, value: impl Into<String>) {
        self.params.insert(name.to_string(), value.into());
    }

    /// Fail with `InvalidParams` unless the parameter is present
    pub fn require(&self, name: &str) -> Result<()> {
        if self.params.contains_key(name) {
            Ok(())
        } else {
            Err(Error::invalid_params(name))
        }
    }

    /// Substitute a registry parameter from the environment
    pub fn override_registry(&mut self, key: &str, env_var: &str, default: &str) {
        let registry = registry_override(env_var, default);
        debug!(%key, %registry, "using container registry");
        self.set_param(key, registry);
    }

    /// Substitute a registry parameter only when a non-empty value resolves
    pub fn override_registry_if_set(&mut self, key: &str, env_var: &str, default: &str) {
        let registry = registry_override(env_var, default);
        if !registry.is_empty() {
            debug!(%key, %registry, "using container registry");
            self.set_param(key, registry);
        }
    }

    /// The shared fallback configuration secret, if present
    pub async fn addon_config(&self) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        self.cluster.get_secret(ADDONS_NAMESPACE, ADDON_CONFIG_SECRET).await
    }

    /// Fail with `ClusterUpgrading` while the cluster declares an upgrade
    /// in progress
    pub async fn guard_cluster_upgrade(&self) -> Result<()> {
        let cm = self
            .cluster
            .get_config_map(UPGRADE_GUARD_NS, UPGRADE_GUARD_CONFIGMAP)
            .await?;
        if let Some(data) = cm {
            if data.get("upgrading").map(String::as_str) == Some("true") {
                return Err(Error::ClusterUpgrading);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use addon_common::cluster::FakeCluster;

    fn ctx_with_templates(files: &[(&str, &str)]) -> (VariantCtx, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let ctx = VariantCtx {
            cluster: Arc::new(FakeCluster::new()),
            engine: Arc::new(TemplateEngine::new()),
            template_root: dir.path().to_path_buf(),
            version: "1.0.0".into(),
            params: BTreeMap::new(),
        };
        (ctx, dir)
    }

    #[test]
    fn dirs_requires_existing_input() {
        let (ctx, _dir) = ctx_with_templates(&[]);
        assert!(ctx.dirs("coredns").is_err());
    }

    #[test]
    fn render_writes_into_create_tree() {
        let (mut ctx, dir) = ctx_with_templates(&[(
            "coredns/1.0.0/coredns.yaml",
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {{ name }}\n",
        )]);
        ctx.set_param("name", "dns");
        let rendered = ctx.render("coredns", "coredns.yaml").unwrap();
        assert_eq!(rendered, dir.path().join("create/coredns/1.0.0/coredns.yaml"));
        assert!(std::fs::read_to_string(rendered).unwrap().contains("name: dns"));
    }

    #[test]
    fn require_reports_the_missing_name() {
        let (ctx, _dir) = ctx_with_templates(&[]);
        let err = ctx.require("dnsDomain").unwrap_err();
        assert!(matches!(err, Error::InvalidParams { param } if param == "dnsDomain"));
    }

    #[tokio::test]
    async fn upgrade_guard_trips_only_on_true() {
        let (ctx, _dir) = ctx_with_templates(&[]);
        let fake = FakeCluster::new();
        fake.put_config_map(
            UPGRADE_GUARD_NS,
            UPGRADE_GUARD_CONFIGMAP,
            BTreeMap::from([("upgrading".to_string(), "true".to_string())]),
        );
        let guarded = VariantCtx { cluster: Arc::new(fake), ..ctx };
        assert!(matches!(
            guarded.guard_cluster_upgrade().await.unwrap_err(),
            Error::ClusterUpgrading
        ));

        let fake = FakeCluster::new();
        fake.put_config_map(
            UPGRADE_GUARD_NS,
            UPGRADE_GUARD_CONFIGMAP,
            BTreeMap::from([("upgrading".to_string(), "false".to_string())]),
        );
        let open = VariantCtx { cluster: Arc::new(fake), ..guarded };
        assert!(open.guard_cluster_upgrade().await.is_ok());
    }
}
