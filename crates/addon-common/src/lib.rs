//! Common types for the addon agent: CRDs, errors, cluster access, templates

pub mod cluster;
pub mod config;
pub mod crd;
pub mod error;
pub mod template;
pub mod yaml;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use cluster::{Cluster, KubeCluster};
pub use config::AgentConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace that holds the local Addon resources
pub const ADDONS_NAMESPACE: &str = "addons";

/// Finalizer placed on every installed Addon
pub const ADDON_FINALIZER: &str = "addons.pf9.io";

/// Label selecting this cluster's ClusterAddons in the remote control plane
pub const CLUSTER_LABEL: &str = "sunpike.pf9.io/cluster";

/// Namespace in which ClusterAddons live upstream
pub const REMOTE_NAMESPACE: &str = "default";

/// Secret in ADDONS_NAMESPACE that holds fallback addon configuration
pub const ADDON_CONFIG_SECRET: &str = "addon-config";

/// Root of the on-disk addon template tree
pub const TEMPLATE_DIR: &str = "/addon_templates";

/// Static map of watched sub-resources, consumed by the drift watcher
pub const RESOURCES_FILE: &str = "/etc/addon/resources.yaml";

/// Kubeconfig template used to reach the remote control plane
pub const KUBECFG_TEMPLATE: &str = "/etc/addon/keystone.kubeconfig.template";

/// Optional CA certificate refreshed into the system store at boot
pub const CA_CERT_PATH: &str = "/usr/local/share/ca-certificates/cert.pem";

/// Initialize tracing from the LOGLEVEL convention.
///
/// LOGLEVEL accepts DEBUG/INFO/WARN/FATAL; RUST_LOG still wins when set.
/// An unknown LOGLEVEL value is a startup error.
pub fn init_tracing(loglevel: &str) -> Result<()> {
    let directive = match loglevel {
        "DEBUG" => "debug",
        "" | "INFO" => "info",
        "WARN" => "warn",
        "FATAL" => "error",
        other => {
            return Err(Error::internal(format!("invalid log level: {other}")));
        }
    };

    let filter = EnvFilter::builder()
        .with_env_var("RUST_LOG")
        .from_env_lossy()
        .add_directive(directive.parse().expect("static directive is valid"));

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
    Ok(())
}
