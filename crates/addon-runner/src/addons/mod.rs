//! Per-type addon implementations
//!
//! One module per supported addon type. Dispatch is a closed match on the
//! type discriminator; an unknown type is a validation failure.

mod cas_aws;
mod cas_azure;
mod coredns;
mod dashboard;
mod dns_autoscaler;
mod kubevirt;
mod luigi;
mod metal3;
mod metallb;
mod metrics_server;
mod monitoring;
mod profile_agent;

use addon_common::{Error, Result};

use crate::context::VariantCtx;
use crate::AddonClient;

/// Registry parameter names substituted into templates
pub(crate) const PARAM_QUAY_REGISTRY: &str = "QuayRegistry";
pub(crate) const PARAM_K8S_REGISTRY: &str = "K8sRegistry";
pub(crate) const PARAM_GCR_REGISTRY: &str = "GcrRegistry";
pub(crate) const PARAM_DOCKER_REGISTRY: &str = "DockerRegistry";

/// Environment variables carrying registry overrides
pub(crate) const ENV_QUAY_REGISTRY: &str = "QUAY_REGISTRY";
pub(crate) const ENV_K8S_REGISTRY: &str = "K8S_REGISTRY";
pub(crate) const ENV_GCR_REGISTRY: &str = "GCR_REGISTRY";
pub(crate) const ENV_DOCKER_REGISTRY: &str = "DOCKER_REGISTRY";

/// Vendor-default registries
pub(crate) const DEFAULT_QUAY_REGISTRY: &str = "quay.io";
pub(crate) const DEFAULT_K8S_REGISTRY: &str = "k8s.gcr.io";
pub(crate) const DEFAULT_GCR_REGISTRY: &str = "gcr.io";
pub(crate) const DEFAULT_DOCKER_REGISTRY: &str = "";

/// Build the client for an addon type; unknown types fail with
/// `InvalidType`
pub(crate) fn client_for(addon_type: &str, ctx: VariantCtx) -> Result<Box<dyn AddonClient>> {
    let client: Box<dyn AddonClient> = match addon_type {
        "coredns" => Box::new(coredns::CoreDns::new(ctx)),
        "metallb" => Box::new(metallb::Metallb::new(ctx)),
        "kubernetes-dashboard" => Box::new(dashboard::Dashboard::new(ctx)),
        "metrics-server" => Box::new(metrics_server::MetricsServer::new(ctx)),
        "cluster-auto-scaler-aws" => Box::new(cas_aws::AutoScalerAws::new(ctx)),
        "cluster-auto-scaler-azure" => Box::new(cas_azure::AutoScalerAzure::new(ctx)),
        "kubevirt" => Box::new(kubevirt::KubeVirt::new(ctx)),
        "monitoring" => Box::new(monitoring::Monitoring::new(ctx)),
        "luigi" => Box::new(luigi::Luigi::new(ctx)),
        "pf9-profile-agent" => Box::new(profile_agent::ProfileAgent::new(ctx)),
        "dns-autoscaler" => Box::new(dns_autoscaler::DnsAutoscaler::new(ctx)),
        "metal3" => Box::new(metal3::Metal3::new(ctx)),
        other => return Err(Error::invalid_type(other)),
    };
    Ok(client)
}
