//! The addon runner: per-type dispatch over the addon lifecycle
//!
//! Each supported addon type implements [`AddonClient`]; the [`Runner`]
//! resolves parameters, constructs the right client and drives the
//! requested operation. Stateless per call — every invocation re-renders
//! the templates and re-applies the documents, relying on server-side
//! apply for idempotence.

mod addons;
mod context;
mod params;
mod runner;

use async_trait::async_trait;

use addon_common::Result;

pub use runner::Runner;

/// Capability set every addon type implements
#[async_trait]
pub trait AddonClient: Send + Sync {
    /// Check required parameters, filling fallbacks from cluster state
    /// where the type supports it
    async fn validate_params(&mut self) -> Result<()>;

    /// Probe the addon's workload health
    async fn health(&self) -> Result<bool>;

    /// Render and apply the addon's manifests
    async fn install(&mut self) -> Result<()>;

    /// Render the addon's manifests and delete them in reverse order
    async fn uninstall(&mut self) -> Result<()>;

    /// Upgrade; the apply primitive is an upsert, so this is an install
    async fn upgrade(&mut self) -> Result<()> {
        self.install().await
    }
}
