//! Addon and ClusterAddon Custom Resource Definitions
//!
//! `Addon` is the local, namespaced resource the reconciler acts on.
//! `ClusterAddon` is its upstream equivalent in the central control plane,
//! selected by the `sunpike.pf9.io/cluster` label. Both share the same
//! spec and status shape; the sync engine mirrors them in both directions.

use std::collections::BTreeMap;

use kube::api::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ADDONS_NAMESPACE, CLUSTER_LABEL, REMOTE_NAMESPACE};

/// Specification for a local Addon
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "agent.pf9.io",
    version = "v1",
    kind = "Addon",
    plural = "addons",
    namespaced,
    status = "AddonStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Healthy","type":"boolean","jsonPath":".status.healthy"}"#
)]
pub struct AddonSpec {
    /// UUID of the cluster this addon belongs to
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// Addon package version (selects the template directory)
    pub version: String,
    /// Addon type discriminator (e.g. "coredns")
    #[serde(rename = "type")]
    pub kind: String,
    /// Parameter overrides applied to the addon templates
    #[serde(default, skip_serializing_if = "Override::is_empty")]
    pub r#override: Override,
    /// Whether the drift watcher tracks this addon's sub-resources
    #[serde(default)]
    pub watch: bool,
}

/// Parameter overrides for an addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Override {
    /// Ordered name/value pairs; later entries of the same name win
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

impl Override {
    /// True when no params are set (elides the field on the wire)
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

/// A single parameter override
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Param {
    /// Parameter name; a `base64Enc` prefix marks the value as encoded
    pub name: String,
    /// Parameter value
    pub value: String,
}

/// Observed state of an Addon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct AddonStatus {
    /// Spec generation last acted on by the reconciler
    #[serde(default, rename = "observedGeneration")]
    pub observed_generation: i64,
    /// Coarse lifecycle state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<AddonPhase>,
    /// Human-readable failure detail, empty on success
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Result of the last health probe
    #[serde(default)]
    pub healthy: bool,
}

/// Lifecycle phase of an addon
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum AddonPhase {
    /// Install has been requested upstream but not yet completed locally
    Installing,
    /// Manifests applied successfully
    Installed,
    /// The last install attempt failed
    InstallError,
    /// Deletion requested upstream, local uninstall in progress
    Uninstalling,
    /// Manifests removed successfully
    Uninstalled,
    /// The last uninstall attempt failed
    UninstallError,
}

/// Specification for a remote ClusterAddon
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sunpike.pf9.io",
    version = "v1alpha2",
    kind = "ClusterAddon",
    plural = "clusteraddons",
    namespaced,
    status = "AddonStatus"
)]
pub struct ClusterAddonSpec {
    /// UUID of the workload cluster the addon targets
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    /// Addon package version
    pub version: String,
    /// Addon type discriminator
    #[serde(rename = "type")]
    pub kind: String,
    /// Parameter overrides
    #[serde(default, skip_serializing_if = "Override::is_empty")]
    pub r#override: Override,
    /// Whether the drift watcher tracks this addon's sub-resources
    #[serde(default)]
    pub watch: bool,
}

impl Addon {
    /// Addon name, empty when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Spec generation, 0 when the API server has not set one
    pub fn generation(&self) -> i64 {
        self.metadata.generation.unwrap_or_default()
    }

    /// Status sub-record, defaulted when absent
    pub fn status_or_default(&self) -> AddonStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Current phase, if any
    pub fn phase(&self) -> Option<AddonPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Build the local Addon a remote ClusterAddon maps onto
    pub fn from_remote(remote: &ClusterAddon) -> Self {
        Addon {
            metadata: ObjectMeta {
                name: remote.metadata.name.clone(),
                namespace: Some(ADDONS_NAMESPACE.into()),
                ..Default::default()
            },
            spec: AddonSpec {
                cluster_id: remote.spec.cluster_id.clone(),
                version: remote.spec.version.clone(),
                kind: remote.spec.kind.clone(),
                r#override: remote.spec.r#override.clone(),
                watch: remote.spec.watch,
            },
            status: None,
        }
    }

    /// Copy the mirrored spec fields from another Addon onto this one
    pub fn copy_spec_from(&mut self, from: &Addon) {
        self.spec.version = from.spec.version.clone();
        self.spec.cluster_id = from.spec.cluster_id.clone();
        self.spec.kind = from.spec.kind.clone();
        self.spec.watch = from.spec.watch;
        self.spec.r#override = from.spec.r#override.clone();
    }
}

impl ClusterAddon {
    /// ClusterAddon name, empty when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Current phase, if any
    pub fn phase(&self) -> Option<AddonPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Convert a local Addon into the ClusterAddon created upstream
    pub fn from_local(addon: &Addon) -> Self {
        let labels = BTreeMap::from([
            (CLUSTER_LABEL.to_string(), addon.spec.cluster_id.clone()),
            ("type".to_string(), addon.spec.kind.clone()),
        ]);
        ClusterAddon {
            metadata: ObjectMeta {
                name: addon.metadata.name.clone(),
                namespace: Some(REMOTE_NAMESPACE.into()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: ClusterAddonSpec {
                cluster_id: addon.spec.cluster_id.clone(),
                version: addon.spec.version.clone(),
                kind: addon.spec.kind.clone(),
                r#override: addon.spec.r#override.clone(),
                watch: addon.spec.watch,
            },
            status: addon.status.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_addon() -> Addon {
        Addon {
            metadata: ObjectMeta {
                name: Some("coredns".into()),
                namespace: Some(ADDONS_NAMESPACE.into()),
                ..Default::default()
            },
            spec: AddonSpec {
                cluster_id: "9c7b9f23-7e66-4a44-a8d8-716e2cdbebc3".into(),
                version: "1.7.0".into(),
                kind: "coredns".into(),
                r#override: Override {
                    params: vec![Param { name: "dnsDomain".into(), value: "cluster.local".into() }],
                },
                watch: true,
            },
            status: None,
        }
    }

    #[test]
    fn remote_conversion_sets_cluster_label_and_namespace() {
        let remote = ClusterAddon::from_local(&sample_addon());
        assert_eq!(remote.metadata.namespace.as_deref(), Some(REMOTE_NAMESPACE));
        let labels = remote.metadata.labels.unwrap();
        assert_eq!(
            labels.get(CLUSTER_LABEL).map(String::as_str),
            Some("9c7b9f23-7e66-4a44-a8d8-716e2cdbebc3")
        );
        assert_eq!(labels.get("type").map(String::as_str), Some("coredns"));
    }

    #[test]
    fn round_trip_preserves_spec_and_params() {
        let addon = sample_addon();
        let remote = ClusterAddon::from_local(&addon);
        let back = Addon::from_remote(&remote);
        assert_eq!(back.spec, addon.spec);
        assert_eq!(back.metadata.namespace.as_deref(), Some(ADDONS_NAMESPACE));
    }

    #[test]
    fn copy_spec_from_overwrites_mirrored_fields() {
        let mut local = sample_addon();
        let mut newer = sample_addon();
        newer.spec.version = "1.8.0".into();
        newer.spec.r#override.params.push(Param { name: "dnsServer".into(), value: "10.0.0.1".into() });
        local.copy_spec_from(&newer);
        assert_eq!(local.spec.version, "1.8.0");
        assert_eq!(local.spec.r#override.params.len(), 2);
    }

    #[test]
    fn phase_serializes_as_pascal_case() {
        let json = serde_json::to_string(&AddonPhase::UninstallError).unwrap();
        assert_eq!(json, "\"UninstallError\"");
    }

    #[test]
    fn status_elides_empty_message() {
        let status = AddonStatus { observed_generation: 3, phase: Some(AddonPhase::Installed), ..Default::default() };
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("message").is_none());
        assert_eq!(json["observedGeneration"], 3);
    }
}
