//! Cluster access for the addon agent
//!
//! The `Cluster` trait is the seam between the agent's control logic and
//! the Kubernetes API: the runner applies and deletes manifest documents
//! through it, the reconciler updates Addon status and finalizers, the
//! sync engine mirrors specs, and the drift watcher reads resource
//! versions. `KubeCluster` is the production implementation over kube-rs;
//! `FakeCluster` (feature `testing`) is an in-memory stand-in that records
//! an ordered operation log.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, DynamicObject, ObjectMeta, Patch, PatchParams, PostParams};
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::Value;
use tracing::debug;

use crate::crd::{Addon, AddonStatus};
use crate::error::Error;
use crate::{Result, ADDONS_NAMESPACE};

/// Path of the pod's service-account token, used for API-proxy probes
const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Operations the agent performs against the workload cluster
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Upsert one parsed manifest document by (gvk, namespace, name)
    async fn apply_object(&self, doc: &Value) -> Result<()>;

    /// Delete one parsed manifest document; missing objects are not an error
    async fn delete_object(&self, doc: &Value) -> Result<()>;

    /// Delete an arbitrary object by coordinates; missing objects are not an error
    async fn delete_by_gvk(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()>;

    /// Read an object's metadata.resourceVersion as a decimal integer
    async fn resource_version(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<u64>>;

    /// Secret data, or None when the secret does not exist
    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<BTreeMap<String, Vec<u8>>>>;

    /// Create a single-key secret
    async fn create_secret(&self, namespace: &str, name: &str, key: &str, value: &[u8])
        -> Result<()>;

    /// Delete a secret; missing secrets are not an error
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    /// ConfigMap data, or None when the configmap does not exist
    async fn get_config_map(&self, namespace: &str, name: &str)
        -> Result<Option<BTreeMap<String, String>>>;

    /// Create a single-key configmap
    async fn create_config_map(&self, namespace: &str, name: &str, key: &str, value: &str)
        -> Result<()>;

    /// Delete a configmap; missing configmaps are not an error
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()>;

    /// Ready replicas of a deployment, None when it does not exist
    async fn deployment_ready_replicas(&self, namespace: &str, name: &str)
        -> Result<Option<i32>>;

    /// (numberReady, desiredNumberScheduled) of a daemonset, None when absent
    async fn daemonset_status(&self, namespace: &str, name: &str) -> Result<Option<(i32, i32)>>;

    /// Ready replicas of a statefulset, None when it does not exist
    async fn statefulset_ready_replicas(&self, namespace: &str, name: &str)
        -> Result<Option<i32>>;

    /// Delete a deployment; missing deployments are not an error
    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()>;

    /// Delete a daemonset; missing daemonsets are not an error
    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<()>;

    /// Create a namespace with the given labels if it does not exist
    async fn ensure_namespace(&self, name: &str, labels: &[(&str, &str)]) -> Result<()>;

    /// HTTPS GET through the API-server proxy with the pod's bearer token;
    /// returns the response status code
    async fn proxy_get_status(&self, url: &str) -> Result<u16>;

    /// List all local Addons
    async fn list_addons(&self) -> Result<Vec<Addon>>;

    /// Fetch one Addon by name, None when it does not exist
    async fn get_addon(&self, name: &str) -> Result<Option<Addon>>;

    /// Create a local Addon
    async fn create_addon(&self, addon: &Addon) -> Result<()>;

    /// Replace a local Addon's metadata and spec
    async fn update_addon(&self, addon: &Addon) -> Result<()>;

    /// Write a local Addon's status subresource
    async fn update_addon_status(&self, name: &str, status: &AddonStatus) -> Result<()>;

    /// Delete a local Addon; missing addons are not an error
    async fn delete_addon(&self, name: &str) -> Result<()>;
}

/// Lowercase-plural resource name for a kind, following the API convention
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if let Some(stem) = lower.strip_suffix('y') {
        format!("{stem}ies")
    } else if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") {
        format!("{lower}es")
    } else {
        format!("{lower}s")
    }
}

/// Coordinates extracted from a manifest document
#[derive(Debug, Clone)]
pub struct ObjectCoords {
    /// apiVersion as written in the manifest
    pub api_version: String,
    /// Object kind
    pub kind: String,
    /// Object name
    pub name: String,
    /// Namespace, None for cluster-scoped objects
    pub namespace: Option<String>,
}

/// Extract (apiVersion, kind, name, namespace) from a parsed document
pub fn object_coords(doc: &Value) -> Result<ObjectCoords> {
    let api_version = doc
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::serialization("manifest missing apiVersion"))?
        .to_string();
    let kind = doc
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::serialization("manifest missing kind"))?
        .to_string();
    let name = doc
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::serialization("manifest missing metadata.name"))?
        .to_string();
    let namespace = doc
        .pointer("/metadata/namespace")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(ObjectCoords { api_version, kind, name, namespace })
}

fn api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    ApiResource {
        group,
        version,
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        plural: pluralize_kind(kind),
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Production cluster access over kube-rs
pub struct KubeCluster {
    client: Client,
    http: reqwest::Client,
}

impl KubeCluster {
    /// Wrap a kube client.
    ///
    /// The embedded HTTP client skips certificate verification because the
    /// API-proxy probe targets the node-local endpoint with a self-signed
    /// chain, matching what the original agent did.
    pub fn new(client: Client) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::internal(format!("building http client: {e}")))?;
        Ok(Self { client, http })
    }

    fn dynamic_api(&self, coords: &ObjectCoords) -> Api<DynamicObject> {
        let ar = api_resource(&coords.api_version, &coords.kind);
        match &coords.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn addons(&self) -> Api<Addon> {
        Api::namespaced(self.client.clone(), ADDONS_NAMESPACE)
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn apply_object(&self, doc: &Value) -> Result<()> {
        let coords = object_coords(doc)?;
        debug!(kind = %coords.kind, name = %coords.name, "applying object");
        let api = self.dynamic_api(&coords);
        let pp = PatchParams::apply("addon-agent").force();
        api.patch(&coords.name, &pp, &Patch::Apply(doc)).await.map_err(|e| {
            Error::internal(format!("applying {}/{}: {e}", coords.kind, coords.name))
        })?;
        Ok(())
    }

    async fn delete_object(&self, doc: &Value) -> Result<()> {
        let coords = object_coords(doc)?;
        let api = self.dynamic_api(&coords);
        match api.delete(&coords.name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::internal(format!(
                "deleting {}/{}: {e}",
                coords.kind, coords.name
            ))),
        }
    }

    async fn delete_by_gvk(
        &self,
        api_version: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<()> {
        let coords = ObjectCoords {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.map(str::to_string),
        };
        let api = self.dynamic_api(&coords);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(Error::internal(format!("deleting {kind}/{name}: {e}"))),
        }
    }

    async fn resource_version(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<u64>> {
        let coords = ObjectCoords {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.into()),
        };
        let api = self.dynamic_api(&coords);
        match api.get_opt(name).await? {
            Some(obj) => {
                let rv = obj.metadata.resource_version.unwrap_or_default();
                let parsed = rv.parse::<u64>().map_err(|e| {
                    Error::serialization(format!("resourceVersion {rv:?} of {kind}/{name}: {e}"))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(secret) => Ok(Some(
                secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, v.0))
                    .collect(),
            )),
            None => Ok(None),
        }
    }

    async fn create_secret(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &[u8],
    ) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(key.to_string(), ByteString(value.to_vec()))])),
            ..Default::default()
        };
        api.create(&PostParams::default(), &secret).await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(cm) => Ok(Some(cm.data.unwrap_or_default())),
            None => Ok(None),
        }
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
            ..Default::default()
        };
        api.create(&PostParams::default(), &cm).await?;
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn deployment_ready_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(d) => Ok(Some(
                d.status.and_then(|s| s.ready_replicas).unwrap_or_default(),
            )),
            None => Ok(None),
        }
    }

    async fn daemonset_status(&self, namespace: &str, name: &str) -> Result<Option<(i32, i32)>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(ds) => {
                let status = ds.status.unwrap_or_default();
                Ok(Some((status.number_ready, status.desired_number_scheduled)))
            }
            None => Ok(None),
        }
    }

    async fn statefulset_ready_replicas(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<i32>> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(name).await? {
            Some(s) => Ok(Some(
                s.status.and_then(|s| s.ready_replicas).unwrap_or_default(),
            )),
            None => Ok(None),
        }
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_namespace(&self, name: &str, labels: &[(&str, &str)]) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let label_map: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.into()),
                labels: (!label_map.is_empty()).then_some(label_map),
                ..Default::default()
            },
            ..Default::default()
        };
        match api.create(&PostParams::default(), &ns).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn proxy_get_status(&self, url: &str) -> Result<u16> {
        let token = tokio::fs::read_to_string(SERVICE_ACCOUNT_TOKEN)
            .await
            .map_err(|e| Error::internal(format!("reading service account token: {e}")))?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(token.trim_end_matches('\n'))
            .send()
            .await
            .map_err(|e| Error::internal(format!("invoking {url}: {e}")))?;
        Ok(resp.status().as_u16())
    }

    async fn list_addons(&self) -> Result<Vec<Addon>> {
        let list = self.addons().list(&Default::default()).await?;
        Ok(list.items)
    }

    async fn get_addon(&self, name: &str) -> Result<Option<Addon>> {
        Ok(self.addons().get_opt(name).await?)
    }

    async fn create_addon(&self, addon: &Addon) -> Result<()> {
        self.addons().create(&PostParams::default(), addon).await?;
        Ok(())
    }

    async fn update_addon(&self, addon: &Addon) -> Result<()> {
        let name = addon.name().to_string();
        self.addons().replace(&name, &PostParams::default(), addon).await?;
        Ok(())
    }

    async fn update_addon_status(&self, name: &str, status: &AddonStatus) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.addons()
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn delete_addon(&self, name: &str) -> Result<()> {
        match self.addons().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
pub use fake::{FakeCluster, Op, Verb};

#[cfg(any(test, feature = "testing"))]
mod fake {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::{object_coords, Cluster};
    use crate::crd::{Addon, AddonStatus};
    use crate::error::Error;
    use crate::Result;

    /// Verb of a recorded cluster write
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Verb {
        /// Server-side apply / create
        Apply,
        /// Delete
        Delete,
    }

    /// One recorded cluster write, in call order
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct Op {
        /// What was done
        pub verb: Verb,
        /// Object kind
        pub kind: String,
        /// Object namespace, None for cluster-scoped
        pub namespace: Option<String>,
        /// Object name
        pub name: String,
    }

    type NsName = (String, String);

    #[derive(Default)]
    struct FakeState {
        rv: u64,
        objects: BTreeMap<(String, String, String), Value>,
        versions: BTreeMap<(String, String, String), u64>,
        secrets: BTreeMap<NsName, BTreeMap<String, Vec<u8>>>,
        config_maps: BTreeMap<NsName, BTreeMap<String, String>>,
        deployments: BTreeMap<NsName, i32>,
        daemonsets: BTreeMap<NsName, (i32, i32)>,
        statefulsets: BTreeMap<NsName, i32>,
        namespaces: BTreeMap<String, Vec<(String, String)>>,
        proxy_statuses: BTreeMap<String, u16>,
        addons: BTreeMap<String, Addon>,
        ops: Vec<Op>,
    }

    /// In-memory cluster with API-server-faithful Addon semantics and an
    /// ordered operation log
    #[derive(Default)]
    pub struct FakeCluster {
        state: Mutex<FakeState>,
    }

    impl FakeCluster {
        /// Fresh empty cluster
        pub fn new() -> Self {
            Self::default()
        }

        fn key(kind: &str, namespace: Option<&str>, name: &str) -> (String, String, String) {
            (kind.to_string(), namespace.unwrap_or_default().to_string(), name.to_string())
        }

        /// All writes recorded so far, in order
        pub fn ops(&self) -> Vec<Op> {
            self.state.lock().unwrap().ops.clone()
        }

        /// Forget recorded writes
        pub fn clear_ops(&self) {
            self.state.lock().unwrap().ops.clear();
        }

        /// Look up an applied object
        pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Value> {
            self.state.lock().unwrap().objects.get(&Self::key(kind, namespace, name)).cloned()
        }

        /// Look up a secret's data
        pub fn secret(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, Vec<u8>>> {
            self.state.lock().unwrap().secrets.get(&(namespace.into(), name.into())).cloned()
        }

        /// Seed a secret
        pub fn put_secret(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
            self.state.lock().unwrap().secrets.insert((namespace.into(), name.into()), data);
        }

        /// Look up a configmap's data
        pub fn config_map(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
            self.state.lock().unwrap().config_maps.get(&(namespace.into(), name.into())).cloned()
        }

        /// Seed a configmap
        pub fn put_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
            self.state.lock().unwrap().config_maps.insert((namespace.into(), name.into()), data);
        }

        /// Seed a deployment's ready replica count
        pub fn set_deployment_ready(&self, namespace: &str, name: &str, ready: i32) {
            self.state.lock().unwrap().deployments.insert((namespace.into(), name.into()), ready);
        }

        /// Seed a daemonset's (ready, desired) counters
        pub fn set_daemonset(&self, namespace: &str, name: &str, ready: i32, desired: i32) {
            self.state
                .lock()
                .unwrap()
                .daemonsets
                .insert((namespace.into(), name.into()), (ready, desired));
        }

        /// Seed a statefulset's ready replica count
        pub fn set_statefulset_ready(&self, namespace: &str, name: &str, ready: i32) {
            self.state.lock().unwrap().statefulsets.insert((namespace.into(), name.into()), ready);
        }

        /// Seed the status code returned for an API-proxy probe URL
        pub fn set_proxy_status(&self, url: &str, status: u16) {
            self.state.lock().unwrap().proxy_statuses.insert(url.into(), status);
        }

        /// Namespaces created so far
        pub fn has_namespace(&self, name: &str) -> bool {
            self.state.lock().unwrap().namespaces.contains_key(name)
        }

        /// Simulate an external edit advancing an object's resourceVersion
        pub fn bump_resource_version(&self, kind: &str, namespace: &str, name: &str) {
            let mut st = self.state.lock().unwrap();
            st.rv += 1;
            let rv = st.rv;
            st.versions.insert(Self::key(kind, Some(namespace), name), rv);
        }

        /// Look up an Addon
        pub fn addon(&self, name: &str) -> Option<Addon> {
            self.state.lock().unwrap().addons.get(name).cloned()
        }

        /// Seed an Addon as the API server would store it
        pub fn insert_addon(&self, mut addon: Addon) {
            let mut st = self.state.lock().unwrap();
            if addon.metadata.generation.is_none() {
                addon.metadata.generation = Some(1);
            }
            st.rv += 1;
            addon.metadata.resource_version = Some(st.rv.to_string());
            st.addons.insert(addon.name().to_string(), addon);
        }

        /// Names of all stored addons
        pub fn addon_names(&self) -> Vec<String> {
            self.state.lock().unwrap().addons.keys().cloned().collect()
        }
    }

    #[async_trait]
    impl Cluster for FakeCluster {
        async fn apply_object(&self, doc: &Value) -> Result<()> {
            let coords = object_coords(doc)?;
            let mut st = self.state.lock().unwrap();
            st.rv += 1;
            let rv = st.rv;
            let key = Self::key(&coords.kind, coords.namespace.as_deref(), &coords.name);
            st.objects.insert(key.clone(), doc.clone());
            st.versions.insert(key, rv);
            st.ops.push(Op {
                verb: Verb::Apply,
                kind: coords.kind,
                namespace: coords.namespace,
                name: coords.name,
            });
            Ok(())
        }

        async fn delete_object(&self, doc: &Value) -> Result<()> {
            let coords = object_coords(doc)?;
            let mut st = self.state.lock().unwrap();
            let key = Self::key(&coords.kind, coords.namespace.as_deref(), &coords.name);
            st.objects.remove(&key);
            st.versions.remove(&key);
            st.ops.push(Op {
                verb: Verb::Delete,
                kind: coords.kind,
                namespace: coords.namespace,
                name: coords.name,
            });
            Ok(())
        }

        async fn delete_by_gvk(
            &self,
            _api_version: &str,
            kind: &str,
            namespace: Option<&str>,
            name: &str,
        ) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            let key = Self::key(kind, namespace, name);
            st.objects.remove(&key);
            st.versions.remove(&key);
            st.ops.push(Op {
                verb: Verb::Delete,
                kind: kind.to_string(),
                namespace: namespace.map(str::to_string),
                name: name.to_string(),
            });
            Ok(())
        }

        async fn resource_version(
            &self,
            _api_version: &str,
            kind: &str,
            namespace: &str,
            name: &str,
        ) -> Result<Option<u64>> {
            let st = self.state.lock().unwrap();
            Ok(st.versions.get(&Self::key(kind, Some(namespace), name)).copied())
        }

        async fn get_secret(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
            Ok(self.secret(namespace, name))
        }

        async fn create_secret(
            &self,
            namespace: &str,
            name: &str,
            key: &str,
            value: &[u8],
        ) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            let k = (namespace.to_string(), name.to_string());
            if st.secrets.contains_key(&k) {
                return Err(Error::internal(format!("secret {namespace}/{name} already exists")));
            }
            st.secrets.insert(k, BTreeMap::from([(key.to_string(), value.to_vec())]));
            Ok(())
        }

        async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
            self.state.lock().unwrap().secrets.remove(&(namespace.into(), name.into()));
            Ok(())
        }

        async fn get_config_map(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<BTreeMap<String, String>>> {
            Ok(self.config_map(namespace, name))
        }

        async fn create_config_map(
            &self,
            namespace: &str,
            name: &str,
            key: &str,
            value: &str,
        ) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            let k = (namespace.to_string(), name.to_string());
            if st.config_maps.contains_key(&k) {
                return Err(Error::internal(format!(
                    "configmap {namespace}/{name} already exists"
                )));
            }
            st.config_maps.insert(k, BTreeMap::from([(key.to_string(), value.to_string())]));
            Ok(())
        }

        async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<()> {
            self.state.lock().unwrap().config_maps.remove(&(namespace.into(), name.into()));
            Ok(())
        }

        async fn deployment_ready_replicas(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<i32>> {
            let st = self.state.lock().unwrap();
            Ok(st.deployments.get(&(namespace.into(), name.into())).copied())
        }

        async fn daemonset_status(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<(i32, i32)>> {
            let st = self.state.lock().unwrap();
            Ok(st.daemonsets.get(&(namespace.into(), name.into())).copied())
        }

        async fn statefulset_ready_replicas(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<i32>> {
            let st = self.state.lock().unwrap();
            Ok(st.statefulsets.get(&(namespace.into(), name.into())).copied())
        }

        async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            st.deployments.remove(&(namespace.to_string(), name.to_string()));
            st.ops.push(Op {
                verb: Verb::Delete,
                kind: "Deployment".into(),
                namespace: Some(namespace.into()),
                name: name.into(),
            });
            Ok(())
        }

        async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            st.daemonsets.remove(&(namespace.to_string(), name.to_string()));
            st.ops.push(Op {
                verb: Verb::Delete,
                kind: "DaemonSet".into(),
                namespace: Some(namespace.into()),
                name: name.into(),
            });
            Ok(())
        }

        async fn ensure_namespace(&self, name: &str, labels: &[(&str, &str)]) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            st.namespaces.entry(name.to_string()).or_insert_with(|| {
                labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
            });
            Ok(())
        }

        async fn proxy_get_status(&self, url: &str) -> Result<u16> {
            let st = self.state.lock().unwrap();
            Ok(st.proxy_statuses.get(url).copied().unwrap_or(200))
        }

        async fn list_addons(&self) -> Result<Vec<Addon>> {
            Ok(self.state.lock().unwrap().addons.values().cloned().collect())
        }

        async fn get_addon(&self, name: &str) -> Result<Option<Addon>> {
            Ok(self.addon(name))
        }

        async fn create_addon(&self, addon: &Addon) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            let name = addon.name().to_string();
            if st.addons.contains_key(&name) {
                return Err(Error::internal(format!("addon {name} already exists")));
            }
            let mut stored = addon.clone();
            stored.metadata.generation = Some(1);
            st.rv += 1;
            stored.metadata.resource_version = Some(st.rv.to_string());
            st.addons.insert(name, stored);
            Ok(())
        }

        async fn update_addon(&self, addon: &Addon) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            let name = addon.name().to_string();
            let existing = st
                .addons
                .get(&name)
                .cloned()
                .ok_or_else(|| Error::internal(format!("addon {name} not found")))?;
            let mut stored = addon.clone();
            // generation advances only on spec mutation, as the API server does
            let generation = existing.metadata.generation.unwrap_or(1);
            stored.metadata.generation =
                Some(if stored.spec != existing.spec { generation + 1 } else { generation });
            stored.status = existing.status;
            stored.metadata.deletion_timestamp = existing.metadata.deletion_timestamp.clone();
            st.rv += 1;
            stored.metadata.resource_version = Some(st.rv.to_string());
            let gone = stored.metadata.deletion_timestamp.is_some()
                && stored.metadata.finalizers.as_ref().map_or(true, Vec::is_empty);
            if gone {
                st.addons.remove(&name);
            } else {
                st.addons.insert(name, stored);
            }
            Ok(())
        }

        async fn update_addon_status(&self, name: &str, status: &AddonStatus) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            let addon = st
                .addons
                .get_mut(name)
                .ok_or_else(|| Error::internal(format!("addon {name} not found")))?;
            addon.status = Some(status.clone());
            Ok(())
        }

        async fn delete_addon(&self, name: &str) -> Result<()> {
            let mut st = self.state.lock().unwrap();
            let Some(addon) = st.addons.get_mut(name) else {
                return Ok(());
            };
            let has_finalizers =
                addon.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty());
            if has_finalizers {
                addon.metadata.deletion_timestamp =
                    Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                        k8s_openapi::chrono::Utc::now(),
                    ));
            } else {
                st.addons.remove(name);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pluralize_handles_common_kinds() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("ConfigMap"), "configmaps");
    }

    #[test]
    fn object_coords_extracts_namespace_and_name() {
        let doc = serde_json::json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "coredns", "namespace": "kube-system"}
        });
        let coords = object_coords(&doc).unwrap();
        assert_eq!(coords.api_version, "apps/v1");
        assert_eq!(coords.kind, "Deployment");
        assert_eq!(coords.name, "coredns");
        assert_eq!(coords.namespace.as_deref(), Some("kube-system"));
    }

    #[test]
    fn object_coords_rejects_missing_name() {
        let doc = serde_json::json!({"apiVersion": "v1", "kind": "Service", "metadata": {}});
        assert!(object_coords(&doc).is_err());
    }

    #[test]
    fn api_resource_splits_group_and_version() {
        let ar = api_resource("apps/v1", "Deployment");
        assert_eq!(ar.group, "apps");
        assert_eq!(ar.version, "v1");
        let core = api_resource("v1", "Service");
        assert_eq!(core.group, "");
        assert_eq!(core.version, "v1");
    }

    #[tokio::test]
    async fn fake_cluster_records_apply_and_delete_order() {
        let fake = FakeCluster::new();
        let doc = serde_json::json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "a", "namespace": "ns"}
        });
        fake.apply_object(&doc).await.unwrap();
        fake.delete_object(&doc).await.unwrap();
        let ops = fake.ops();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].verb, Verb::Apply);
        assert_eq!(ops[1].verb, Verb::Delete);
    }

    #[tokio::test]
    async fn fake_cluster_bumps_generation_only_on_spec_change() {
        use crate::crd::{Addon, AddonSpec};
        let fake = FakeCluster::new();
        let mut addon = Addon::new("x", AddonSpec { version: "1".into(), ..Default::default() });
        addon.metadata.namespace = Some(ADDONS_NAMESPACE.into());
        fake.create_addon(&addon).await.unwrap();

        // metadata-only update keeps the generation
        let mut stored = fake.addon("x").unwrap();
        stored.metadata.finalizers = Some(vec!["f".into()]);
        fake.update_addon(&stored).await.unwrap();
        assert_eq!(fake.addon("x").unwrap().metadata.generation, Some(1));

        // spec update bumps it
        let mut stored = fake.addon("x").unwrap();
        stored.spec.version = "2".into();
        fake.update_addon(&stored).await.unwrap();
        assert_eq!(fake.addon("x").unwrap().metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn fake_cluster_delete_respects_finalizers() {
        use crate::crd::{Addon, AddonSpec};
        let fake = FakeCluster::new();
        let mut addon = Addon::new("x", AddonSpec::default());
        addon.metadata.finalizers = Some(vec!["addons.pf9.io".into()]);
        fake.insert_addon(addon);

        fake.delete_addon("x").await.unwrap();
        let pending = fake.addon("x").expect("addon survives until finalizer clears");
        assert!(pending.metadata.deletion_timestamp.is_some());

        let mut cleared = pending.clone();
        cleared.metadata.finalizers = Some(vec![]);
        fake.update_addon(&cleared).await.unwrap();
        assert!(fake.addon("x").is_none());
    }
}
