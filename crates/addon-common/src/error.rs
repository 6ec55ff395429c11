//! Error types for the addon agent
//!
//! Errors carry enough context to drive the reconciler's requeue decision:
//! parameter and type validation failures are surfaced in status and not
//! retried, the cluster-upgrade guard is silently retried next tick, and
//! remote control-plane failures are counted by the sync loop.

use thiserror::Error;

/// Main error type for addon operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A required addon parameter is missing
    #[error("required parameter {param} missing")]
    InvalidParams {
        /// Name of the missing parameter
        param: String,
    },

    /// The addon type is not in the supported set
    #[error("addon type {addon_type} is not supported")]
    InvalidType {
        /// The unsupported type discriminator
        addon_type: String,
    },

    /// The cluster declared an upgrade in progress; retried next tick
    #[error("cluster is upgrading, ignoring request")]
    ClusterUpgrading,

    /// Could not list ClusterAddon objects from the remote control plane
    #[error("error listing ClusterAddon objects from sunpike: {message}")]
    ListClusterAddons {
        /// Description of what failed
        message: String,
    },

    /// Could not mint a token for the remote control plane
    #[error("error generating keystone token: {message}")]
    GenToken {
        /// Description of what failed
        message: String,
    },

    /// Credentials rejected by the remote control plane
    #[error("not authorized")]
    NotAuthorized,

    /// Template rendering error
    #[error("template error in {file}: {message}")]
    Template {
        /// Template file being rendered
        file: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error: {message}")]
    Internal {
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create an invalid-parameter error for the given parameter name
    pub fn invalid_params(param: impl Into<String>) -> Self {
        Self::InvalidParams { param: param.into() }
    }

    /// Create an invalid-type error
    pub fn invalid_type(addon_type: impl Into<String>) -> Self {
        Self::InvalidType { addon_type: addon_type.into() }
    }

    /// Create a remote-list error
    pub fn list_cluster_addons(msg: impl Into<String>) -> Self {
        Self::ListClusterAddons { message: msg.into() }
    }

    /// Create a token-mint error
    pub fn gen_token(msg: impl Into<String>) -> Self {
        Self::GenToken { message: msg.into() }
    }

    /// Create a template error for the given file
    pub fn template(file: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Template { file: file.into(), message: msg.into() }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization { message: msg.into() }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// Whether the reconciler should requeue after this error.
    ///
    /// Validation failures require a spec fix and are only surfaced in
    /// status; the upgrade guard resolves on its own and is retried by the
    /// next sync tick rather than the reconcile backoff.
    pub fn requeues(&self) -> bool {
        !matches!(
            self,
            Error::InvalidParams { .. }
                | Error::InvalidType { .. }
                | Error::ClusterUpgrading
                | Error::NotAuthorized
        )
    }

    /// Whether this error counts toward the sync loop's consecutive
    /// remote-failure threshold.
    pub fn counts_toward_sync_errors(&self) -> bool {
        matches!(
            self,
            Error::ListClusterAddons { .. } | Error::GenToken { .. }
        )
    }
}
