//! Cluster-side addon agent
//!
//! Reconciles the cluster's installed addons against two authorities:
//! local `Addon` resources and remote `ClusterAddon` resources in the
//! central control plane.
//!
//! - **controller**: serialized install/uninstall per Addon, finalizers,
//!   observed-generation gate
//! - **sync**: periodic bidirectional ClusterAddon ↔ Addon mirror plus
//!   health refresh
//! - **watch**: drift detection over managed sub-resources, re-triggering
//!   reconciliation through the observed-generation gate

pub mod controller;
pub mod proto;
pub mod sync;
pub mod watch;
