//! HTTP gateway client of the network runner.
//!
//! The runner exposes its control service as JSON over HTTP on the profile's
//! gateway port, one `POST /v1/control/<operation>` endpoint per call.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use url::Url;

use super::{
    ChainSpec, ClusterInfo, ControlClient, ControlConnector, ControlError, RPC_VERSION,
    StartRequest, with_deadline,
};
use crate::{
    NetworkProfile,
    rpc::{self, CallOutcome, DIAL_TIMEOUT, GatewayStatus},
};

/// gRPC status code for an expired deadline.
const CODE_DEADLINE_EXCEEDED: i32 = 4;
/// gRPC status code for an unavailable server.
const CODE_UNAVAILABLE: i32 = 14;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ClusterInfoReply {
    cluster_info: ClusterInfo,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VersionReply {
    version: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChainsBody<'a> {
    blockchain_specs: &'a [ChainSpec],
}

/// Client of one runner's HTTP gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: Url,
}

impl GatewayClient {
    pub fn new(base_url: Url) -> anyhow::Result<Self> {
        Ok(Self {
            client: rpc::create_client()?,
            base_url,
        })
    }

    /// Client for the gateway of `profile` on `host`.
    pub fn for_profile(host: &str, profile: NetworkProfile) -> anyhow::Result<Self> {
        let url = Url::parse(&format!("http://{host}:{}/", profile.ports().gateway))?;
        Self::new(url)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn call<B, T>(&self, operation: &str, body: &B) -> Result<T, ControlError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(&format!("v1/control/{operation}"))
            .map_err(|e| ControlError::Rpc(format!("invalid gateway url: {e}")))?;

        tracing::trace!(url = %url, "Calling network runner");

        match rpc::post_json(&self.client, url.as_str(), body).await {
            Ok(CallOutcome::Ok(value)) => Ok(value),
            Ok(CallOutcome::Status(http_status, status)) => {
                Err(classify_status(operation, http_status, status))
            }
            Ok(CallOutcome::Malformed(msg)) => Err(ControlError::Rpc(msg)),
            Err(e) if e.is_timeout() => Err(ControlError::DeadlineExceeded),
            Err(e) if e.is_connect() => Err(ControlError::Unreachable(e.to_string())),
            Err(e) => Err(ControlError::Rpc(format!("{operation} request failed: {e}"))),
        }
    }

    async fn cluster_call<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        body: &B,
    ) -> Result<ClusterInfo, ControlError> {
        self.call::<_, ClusterInfoReply>(operation, body)
            .await
            .map(|reply| reply.cluster_info)
    }
}

fn classify_status(operation: &str, http_status: u16, status: GatewayStatus) -> ControlError {
    if status.message.contains("not bootstrapped") {
        return ControlError::NotBootstrapped;
    }
    match (status.code, http_status) {
        (CODE_DEADLINE_EXCEEDED, _) | (_, 504) => ControlError::DeadlineExceeded,
        (CODE_UNAVAILABLE, _) | (_, 503) => ControlError::Unreachable(status.message),
        _ => ControlError::Rpc(format!(
            "{operation} failed (status {http_status}): {}",
            status.message
        )),
    }
}

impl ControlClient for GatewayClient {
    async fn rpc_version(&self) -> Result<u32, ControlError> {
        self.call::<_, VersionReply>("rpcversion", &json!({}))
            .await
            .map(|reply| reply.version)
    }

    async fn start(&self, request: StartRequest) -> Result<ClusterInfo, ControlError> {
        self.cluster_call("start", &request).await
    }

    async fn load_snapshot(
        &self,
        snapshot_name: &str,
        root_data_dir: &str,
    ) -> Result<ClusterInfo, ControlError> {
        self.cluster_call(
            "loadsnapshot",
            &json!({"snapshotName": snapshot_name, "rootDataDir": root_data_dir}),
        )
        .await
    }

    async fn status(&self) -> Result<ClusterInfo, ControlError> {
        self.cluster_call("status", &json!({})).await
    }

    async fn health(&self) -> Result<ClusterInfo, ControlError> {
        self.cluster_call("health", &json!({})).await
    }

    async fn wait_for_healthy(&self) -> Result<ClusterInfo, ControlError> {
        self.cluster_call("waitforhealthy", &json!({})).await
    }

    async fn create_chains(&self, specs: Vec<ChainSpec>) -> Result<ClusterInfo, ControlError> {
        self.cluster_call(
            "createchains",
            &CreateChainsBody {
                blockchain_specs: &specs,
            },
        )
        .await
    }

    async fn stop(&self) -> Result<(), ControlError> {
        self.cluster_call("stop", &json!({})).await.map(|_| ())
    }
}

/// Connects to the gateway of a profile and checks the protocol version.
#[derive(Debug, Clone)]
pub struct GatewayConnector {
    host: String,
}

impl GatewayConnector {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl ControlConnector for GatewayConnector {
    type Client = GatewayClient;

    async fn connect(&self, profile: NetworkProfile) -> Result<GatewayClient, ControlError> {
        let client = GatewayClient::for_profile(&self.host, profile)
            .map_err(|e| ControlError::Rpc(format!("{e:#}")))?;

        let server = with_deadline(DIAL_TIMEOUT, client.rpc_version()).await?;
        if server != RPC_VERSION {
            return Err(ControlError::VersionMismatch {
                server,
                client: RPC_VERSION,
            });
        }

        tracing::debug!(%profile, url = %client.base_url(), "Connected to network runner");
        Ok(client)
    }
}
