//! Conductor token client
//!
//! Mints short-lived credentials for the remote control plane over gRPC.
//! The connection is plain-text by design: mutual TLS is terminated by the
//! comms tunnel in front of the conductor. Tokens are cached and reused
//! when the conductor is unreachable.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tonic::transport::Endpoint;
use tonic::Code;
use tracing::{error, info};

use addon_common::{Error, Result};

use crate::proto::conductor_client::ConductorClient;
use crate::proto::AuthRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const RETRY_MAX: u32 = 3;
const PER_RETRY_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_VALIDITY: Duration = Duration::from_secs(10 * 60 * 60);

/// Credentials minted by the conductor
#[derive(Clone, Debug, Deserialize)]
pub struct AuthInfo {
    /// Bearer token for the remote API
    pub token: String,
    /// Project the token is scoped to
    #[serde(rename = "projectID")]
    pub project_id: String,
}

struct CachedAuth {
    auth: AuthInfo,
    expires: Instant,
}

/// gRPC client for the conductor's auth endpoint, with a process-local
/// token cache
pub struct TokenClient {
    endpoint: String,
    cache: Mutex<Option<CachedAuth>>,
}

impl TokenClient {
    /// Client for a `host:port` conductor endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), cache: Mutex::new(None) }
    }

    /// Mint (or reuse) credentials for this cluster/project pair.
    ///
    /// On conductor failure a cached, unexpired token is returned instead;
    /// with no cache the failure surfaces as `GenToken`.
    pub async fn sunpike_auth(&self, cluster_id: &str, project_id: &str) -> Result<AuthInfo> {
        match self.fetch(cluster_id, project_id).await {
            Ok(auth) => {
                let mut cache = self.cache.lock().unwrap();
                *cache = Some(CachedAuth {
                    auth: auth.clone(),
                    expires: Instant::now() + CACHE_VALIDITY,
                });
                Ok(auth)
            }
            Err(e) => {
                error!(error = %e, "error fetching keystone token");
                let cache = self.cache.lock().unwrap();
                if let Some(cached) = cache.as_ref() {
                    if Instant::now() < cached.expires {
                        info!("using cached token");
                        return Ok(cached.auth.clone());
                    }
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, cluster_id: &str, project_id: &str) -> Result<AuthInfo> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.endpoint))
            .map_err(|e| Error::gen_token(format!("invalid conductor endpoint: {e}")))?
            .connect_timeout(CONNECT_TIMEOUT);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| Error::gen_token(format!("dialing conductor: {e}")))?;
        let mut client = ConductorClient::new(channel);

        let request = AuthRequest {
            cluster_id: cluster_id.to_string(),
            project_id: project_id.to_string(),
        };

        let mut last_err = String::new();
        for attempt in 1..=RETRY_MAX {
            let call = client.fetch_sunpike_auth_info(tonic::Request::new(request.clone()));
            match tokio::time::timeout(PER_RETRY_TIMEOUT, call).await {
                Ok(Ok(resp)) => return parse_auth_info(&resp.into_inner().auth_info),
                Ok(Err(status)) => {
                    // Only transient server states are worth retrying
                    if !matches!(status.code(), Code::Aborted | Code::Unavailable) {
                        return Err(Error::gen_token(format!(
                            "auth info request to sunpike: {status}"
                        )));
                    }
                    last_err = status.to_string();
                }
                Err(_) => last_err = "per-retry deadline exceeded".into(),
            }
            error!(attempt, of = RETRY_MAX, error = %last_err, "conductor auth attempt failed");
        }
        Err(Error::gen_token(format!("auth info request to sunpike: {last_err}")))
    }
}

fn parse_auth_info(payload: &str) -> Result<AuthInfo> {
    serde_json::from_str(payload)
        .map_err(|e| Error::gen_token(format!("unmarshalling auth info: {e}")))
}
