#![allow(dead_code)]

//! Shared fixtures: on-disk template trees, an in-memory remote control
//! plane, and addon builders.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;

use addon_agent::sync::RemoteAddons;
use addon_common::crd::{Addon, AddonSpec, ClusterAddon, ClusterAddonSpec, Override, Param};
use addon_common::{Error, Result, ADDONS_NAMESPACE, REMOTE_NAMESPACE};

pub const CLUSTER_ID: &str = "6a1df3a2-0a6b-4f0f-8d8a-3d0a4bba9f31";

/// Build a local Addon as the API server would hand it to the agent
pub fn addon(name: &str, addon_type: &str, version: &str, params: &[(&str, &str)]) -> Addon {
    let mut a = Addon::new(
        name,
        AddonSpec {
            cluster_id: CLUSTER_ID.into(),
            version: version.into(),
            kind: addon_type.into(),
            r#override: Override {
                params: params
                    .iter()
                    .map(|(n, v)| Param { name: n.to_string(), value: v.to_string() })
                    .collect(),
            },
            watch: true,
        },
    );
    a.metadata.namespace = Some(ADDONS_NAMESPACE.into());
    a.metadata.generation = Some(1);
    a
}

/// Build a remote ClusterAddon carrying this cluster's selection label
pub fn cluster_addon(name: &str, addon_type: &str, version: &str) -> ClusterAddon {
    let mut c = ClusterAddon::new(
        name,
        ClusterAddonSpec {
            cluster_id: CLUSTER_ID.into(),
            version: version.into(),
            kind: addon_type.into(),
            ..Default::default()
        },
    );
    c.metadata.namespace = Some(REMOTE_NAMESPACE.into());
    c.metadata.labels = Some(
        [
            (addon_common::CLUSTER_LABEL.to_string(), CLUSTER_ID.to_string()),
            ("type".to_string(), addon_type.to_string()),
        ]
        .into(),
    );
    c
}

/// In-memory stand-in for the remote control plane's ClusterAddon store
#[derive(Default)]
pub struct FakeRemote {
    store: Mutex<HashMap<String, ClusterAddon>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, addon: ClusterAddon) {
        self.store.lock().unwrap().insert(addon.name().to_string(), addon);
    }

    pub fn get(&self, name: &str) -> Option<ClusterAddon> {
        self.store.lock().unwrap().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.store.lock().unwrap().len()
    }

    /// Stamp a ClusterAddon for deletion, as the upstream API would
    pub fn mark_deleted(&self, name: &str) {
        if let Some(addon) = self.store.lock().unwrap().get_mut(name) {
            addon.metadata.deletion_timestamp =
                Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(
                    k8s_openapi::chrono::Utc::now(),
                ));
        }
    }

    /// Drop a ClusterAddon entirely (upstream finalizer collection)
    pub fn store_remove(&self, name: &str) {
        self.store.lock().unwrap().remove(name);
    }

    /// Mutate the stored spec version (an upstream edit)
    pub fn set_version(&self, name: &str, version: &str) {
        if let Some(addon) = self.store.lock().unwrap().get_mut(name) {
            addon.spec.version = version.to_string();
        }
    }
}

#[async_trait]
impl RemoteAddons for FakeRemote {
    async fn list(&self) -> Result<Vec<ClusterAddon>> {
        Ok(self.store.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, addon: &ClusterAddon) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let name = addon.name().to_string();
        if store.contains_key(&name) {
            return Err(Error::internal(format!("ClusterAddon {name} already exists")));
        }
        store.insert(name, addon.clone());
        Ok(())
    }

    async fn update_status(&self, addon: &ClusterAddon) -> Result<()> {
        let mut store = self.store.lock().unwrap();
        let stored = store
            .get_mut(addon.name())
            .ok_or_else(|| Error::internal(format!("ClusterAddon {} not found", addon.name())))?;
        stored.status = addon.status.clone();
        Ok(())
    }
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// Lay down minimal but realistic template trees for the types the tests
/// install
pub fn write_template_tree(root: &Path) {
    write(
        root,
        "coredns/1.7.0/coredns.yaml",
        r#"apiVersion: v1
kind: ServiceAccount
metadata:
  name: coredns
  namespace: kube-system
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: coredns
  namespace: kube-system
data:
  Corefile: |
    .:53 {
        kubernetes {{ dnsDomain }} in-addr.arpa ip6.arpa
        forward . /etc/resolv.conf
    }
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: coredns
  namespace: kube-system
spec:
  template:
    spec:
      containers:
        - name: coredns
          image: {{ K8sRegistry }}/coredns:1.7.0
          resources:
            limits:
              memory: {{ dnsMemoryLimit }}
---
apiVersion: v1
kind: Service
metadata:
  name: kube-dns
  namespace: kube-system
spec:
  clusterIP: {{ dnsServer }}
  selector:
    k8s-app: kube-dns
"#,
    );

    write(
        root,
        "metallb/0.12.1/metallb.yaml",
        r#"apiVersion: v1
kind: Namespace
metadata:
  name: metallb-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: controller
  namespace: metallb-system
spec:
  template:
    spec:
      containers:
        - name: controller
          image: {{ DockerRegistry }}metallb/controller:v0.12.1
---
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: speaker
  namespace: metallb-system
spec:
  template:
    spec:
      containers:
        - name: speaker
          image: {{ DockerRegistry }}metallb/speaker:v0.12.1
"#,
    );

    write(
        root,
        "metallb/0.12.1/cfgmap.yaml",
        r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: config
  namespace: metallb-system
data:
  config: |
    address-pools:
    - name: default
      protocol: layer2
      addresses:
{{ MetallbIpRange }}
"#,
    );

    write(
        root,
        "dashboard/2.0.3/dashboard.yaml",
        r#"apiVersion: v1
kind: Namespace
metadata:
  name: kubernetes-dashboard
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: kubernetes-dashboard
  namespace: kubernetes-dashboard
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: dashboard-metrics-scraper
  namespace: kubernetes-dashboard
"#,
    );

    write(
        root,
        "metrics-server/0.3.6/metrics-server.yaml",
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: metrics-server-v0.3.6
  namespace: kube-system
spec:
  template:
    spec:
      containers:
        - name: metrics-server
          image: {{ K8sRegistry }}/metrics-server:v0.3.6
"#,
    );
}
