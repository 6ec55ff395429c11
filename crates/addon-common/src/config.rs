//! Environment configuration for the agent
//!
//! The deployment contract is environment variables; CLUSTER_ID and
//! PROJECT_ID must be well-formed UUIDs and the process refuses to start
//! without them.

use std::path::PathBuf;
use std::time::Duration;

use uuid::Uuid;

use crate::error::Error;
use crate::Result;

/// Runtime configuration read from the environment
#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// UUID of this workload cluster (CLUSTER_ID)
    pub cluster_id: String,
    /// UUID of the owning project (PROJECT_ID)
    pub project_id: String,
    /// Host of the remote control plane (DU_FQDN)
    pub du_fqdn: String,
    /// Sync engine tick (HEALTHCHECK_INTERVAL_SECS, default 150)
    pub healthcheck_interval: Duration,
    /// Drift watcher tick (WATCH_SLEEP_SECS, default 300)
    pub watch_sleep: Duration,
    /// Consecutive remote-failure threshold (MAX_SYNC_ERR_COUNT, default 10)
    pub max_sync_err_count: u32,
    /// Skip the sync engine entirely (DISABLE_SUNPIKE_SYNC=true)
    pub disable_sync: bool,
    /// Skip the drift watcher entirely (DISABLE_WATCH=true)
    pub disable_watch: bool,
    /// Root of the addon template tree
    pub template_dir: PathBuf,
    /// Watched-resources map consumed by the drift watcher
    pub resources_file: PathBuf,
    /// Kubeconfig template for the remote control plane
    pub kubecfg_template: PathBuf,
    /// Conductor gRPC endpoint (CONDUCTOR_URL, default localhost:8111)
    pub conductor_url: String,
}

fn env_uuid(name: &str) -> Result<String> {
    let value = std::env::var(name)
        .map_err(|_| Error::internal(format!("{name} not defined as env variable")))?;
    Uuid::parse_str(&value).map_err(|_| Error::internal(format!("invalid UUID in {name}")))?;
    Ok(value)
}

fn env_secs(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| Error::internal(format!("invalid integer in {name}: {raw}")))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "true" || v == "1").unwrap_or(false)
}

impl AgentConfig {
    /// Read and validate configuration from the environment
    pub fn from_env() -> Result<Self> {
        let max_sync_err_count = match std::env::var("MAX_SYNC_ERR_COUNT") {
            Ok(raw) => raw
                .parse::<u32>()
                .map_err(|_| Error::internal(format!("invalid integer in MAX_SYNC_ERR_COUNT: {raw}")))?,
            Err(_) => 10,
        };

        Ok(Self {
            cluster_id: env_uuid("CLUSTER_ID")?,
            project_id: env_uuid("PROJECT_ID")?,
            du_fqdn: std::env::var("DU_FQDN")
                .map_err(|_| Error::internal("DU_FQDN not defined as env variable"))?,
            healthcheck_interval: env_secs("HEALTHCHECK_INTERVAL_SECS", 150)?,
            watch_sleep: env_secs("WATCH_SLEEP_SECS", 300)?,
            max_sync_err_count,
            disable_sync: env_flag("DISABLE_SUNPIKE_SYNC"),
            disable_watch: env_flag("DISABLE_WATCH"),
            template_dir: std::env::var("ADDON_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(crate::TEMPLATE_DIR)),
            resources_file: PathBuf::from(crate::RESOURCES_FILE),
            kubecfg_template: PathBuf::from(crate::KUBECFG_TEMPLATE),
            conductor_url: std::env::var("CONDUCTOR_URL")
                .unwrap_or_else(|_| "localhost:8111".into()),
        })
    }
}

/// Registry value from the environment, or the vendor default
pub fn registry_override(env_var: &str, default: &str) -> String {
    match std::env::var(env_var) {
        Ok(value) if !value.is_empty() => value,
        _ => default.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    // Serialize env mutation across tests
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard<'a> {
        _lock: MutexGuard<'a, ()>,
        keys: Vec<&'static str>,
    }

    impl<'a> EnvGuard<'a> {
        fn set(vars: &[(&'static str, &str)]) -> Self {
            let lock = ENV_LOCK.lock().unwrap();
            let mut keys = Vec::new();
            for (k, v) in vars {
                std::env::set_var(k, v);
                keys.push(*k);
            }
            Self { _lock: lock, keys }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for k in &self.keys {
                std::env::remove_var(k);
            }
        }
    }

    const CLUSTER: &str = "1f0db23e-8a4f-4f22-9c3b-0d2b86b7a1f4";
    const PROJECT: &str = "7f9f2d7e-3b1a-41ce-8f28-1f4c4cb1a9c0";

    #[test]
    fn from_env_reads_required_and_defaults() {
        let _guard = EnvGuard::set(&[
            ("CLUSTER_ID", CLUSTER),
            ("PROJECT_ID", PROJECT),
            ("DU_FQDN", "du.example.com"),
        ]);
        let cfg = AgentConfig::from_env().unwrap();
        assert_eq!(cfg.cluster_id, CLUSTER);
        assert_eq!(cfg.healthcheck_interval, Duration::from_secs(150));
        assert_eq!(cfg.watch_sleep, Duration::from_secs(300));
        assert_eq!(cfg.max_sync_err_count, 10);
        assert!(!cfg.disable_sync);
        assert!(!cfg.disable_watch);
    }

    #[test]
    fn from_env_rejects_malformed_cluster_id() {
        let _guard = EnvGuard::set(&[
            ("CLUSTER_ID", "not-a-uuid"),
            ("PROJECT_ID", PROJECT),
            ("DU_FQDN", "du.example.com"),
        ]);
        assert!(AgentConfig::from_env().is_err());
    }

    #[test]
    fn from_env_rejects_missing_cluster_id() {
        let _guard = EnvGuard::set(&[("PROJECT_ID", PROJECT), ("DU_FQDN", "du.example.com")]);
        assert!(AgentConfig::from_env().is_err());
    }

    #[test]
    fn from_env_honors_overrides() {
        let _guard = EnvGuard::set(&[
            ("CLUSTER_ID", CLUSTER),
            ("PROJECT_ID", PROJECT),
            ("DU_FQDN", "du.example.com"),
            ("HEALTHCHECK_INTERVAL_SECS", "15"),
            ("WATCH_SLEEP_SECS", "30"),
            ("MAX_SYNC_ERR_COUNT", "3"),
            ("DISABLE_SUNPIKE_SYNC", "true"),
            ("DISABLE_WATCH", "1"),
        ]);
        let cfg = AgentConfig::from_env().unwrap();
        assert_eq!(cfg.healthcheck_interval, Duration::from_secs(15));
        assert_eq!(cfg.watch_sleep, Duration::from_secs(30));
        assert_eq!(cfg.max_sync_err_count, 3);
        assert!(cfg.disable_sync);
        assert!(cfg.disable_watch);
    }

    #[test]
    fn registry_override_falls_back_to_default() {
        let _guard = EnvGuard::set(&[]);
        assert_eq!(registry_override("K8S_REGISTRY", "k8s.gcr.io"), "k8s.gcr.io");
        std::env::set_var("K8S_REGISTRY", "registry.local");
        assert_eq!(registry_override("K8S_REGISTRY", "k8s.gcr.io"), "registry.local");
        std::env::remove_var("K8S_REGISTRY");
    }
}
