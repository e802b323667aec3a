//! The RPC channel to a profile's network runner.
//!
//! [`ControlConnector`] opens a [`ControlClient`] for a profile. Production
//! wiring uses the HTTP gateway in [`gateway`]; tests substitute in-process
//! fakes at construction time.

use std::{collections::BTreeMap, future::Future, time::Duration};

use serde::{Deserialize, Serialize};

use crate::NetworkProfile;

pub mod gateway;
pub use gateway::{GatewayClient, GatewayConnector};

/// Protocol version this client speaks. The runner must report the same.
pub const RPC_VERSION: u32 = 30;

/// Errors on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("network is not bootstrapped")]
    NotBootstrapped,
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("timed out trying to contact backend controller, it is most probably not running: {0}")]
    Unreachable(String),
    #[error(
        "trying to connect to a backend controller that uses a different RPC version ({server}) than the CLI client ({client}). Use 'network stop' to stop the controller and then restart the operation"
    )]
    VersionMismatch { server: u32, client: u32 },
    #[error("{0}")]
    Rpc(String),
}

impl ControlError {
    pub fn is_not_bootstrapped(&self) -> bool {
        matches!(self, ControlError::NotBootstrapped)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, ControlError::DeadlineExceeded)
    }
}

/// Run `fut` with a deadline, mapping expiry to [`ControlError::DeadlineExceeded`].
pub async fn with_deadline<T, F>(limit: Duration, fut: F) -> Result<T, ControlError>
where
    F: Future<Output = Result<T, ControlError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(ControlError::DeadlineExceeded))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeInfo {
    pub name: String,
    pub exec_path: String,
    pub uri: String,
    pub id: String,
    pub log_dir: String,
    pub db_dir: String,
    pub plugin_dir: String,
}

/// A chain created on the cluster beyond the primary network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomChainInfo {
    pub chain_name: String,
    pub vm_id: String,
    pub subnet_id: String,
    pub blockchain_id: String,
}

/// Snapshot of the cluster as reported by the runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClusterInfo {
    pub node_names: Vec<String>,
    pub node_infos: BTreeMap<String, NodeInfo>,
    pub pid: i32,
    pub root_data_dir: String,
    pub healthy: bool,
    pub custom_chains_healthy: bool,
    /// Keyed by blockchain id.
    pub custom_chains: BTreeMap<String, CustomChainInfo>,
}

impl ClusterInfo {
    /// Find a custom chain by name.
    pub fn chain_by_name(&self, name: &str) -> Option<&CustomChainInfo> {
        self.custom_chains.values().find(|c| c.chain_name == name)
    }

    /// Custom chains running the given VM.
    pub fn chains_by_vm<'a>(&'a self, vm_id: &'a str) -> impl Iterator<Item = &'a CustomChainInfo> {
        self.custom_chains.values().filter(move |c| c.vm_id == vm_id)
    }

    /// Node infos in node-name order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.node_infos.values()
    }
}

/// A chain to create on the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChainSpec {
    pub vm_name: String,
    /// Path to the genesis file.
    pub genesis: String,
    /// Path to the chain config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_config: Option<String>,
    pub blockchain_alias: String,
    /// Path to the per-node chain config file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_node_chain_config: Option<String>,
    /// Existing subnet to create the chain in. A new one is created when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
}

/// Parameters to boot a cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartRequest {
    pub exec_path: String,
    pub num_nodes: u32,
    pub root_data_dir: String,
    pub plugin_dir: String,
    /// Chain id to serialized chain config.
    pub chain_configs: BTreeMap<String, String>,
}

/// A client of a running network runner.
pub trait ControlClient: Send + Sync {
    fn rpc_version(&self) -> impl Future<Output = Result<u32, ControlError>> + Send;

    fn start(
        &self,
        request: StartRequest,
    ) -> impl Future<Output = Result<ClusterInfo, ControlError>> + Send;

    fn load_snapshot(
        &self,
        snapshot_name: &str,
        root_data_dir: &str,
    ) -> impl Future<Output = Result<ClusterInfo, ControlError>> + Send;

    fn status(&self) -> impl Future<Output = Result<ClusterInfo, ControlError>> + Send;

    fn health(&self) -> impl Future<Output = Result<ClusterInfo, ControlError>> + Send;

    fn wait_for_healthy(&self) -> impl Future<Output = Result<ClusterInfo, ControlError>> + Send;

    fn create_chains(
        &self,
        specs: Vec<ChainSpec>,
    ) -> impl Future<Output = Result<ClusterInfo, ControlError>> + Send;

    fn stop(&self) -> impl Future<Output = Result<(), ControlError>> + Send;
}

/// Opens clients to the runner of a profile.
pub trait ControlConnector: Send + Sync {
    type Client: ControlClient;

    fn connect(
        &self,
        profile: NetworkProfile,
    ) -> impl Future<Output = Result<Self::Client, ControlError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_info_from_gateway_json() {
        let json = r#"{
            "nodeNames": ["node1", "node2"],
            "nodeInfos": {
                "node1": {"name": "node1", "uri": "http://127.0.0.1:9630", "logDir": "/r/node1/logs"},
                "node2": {"name": "node2", "uri": "http://127.0.0.1:9632"}
            },
            "pid": 4242,
            "rootDataDir": "/r",
            "healthy": true,
            "customChainsHealthy": true,
            "customChains": {
                "2bc": {"chainName": "zoo", "vmId": "vm1", "subnetId": "s1", "blockchainId": "2bc"}
            },
            "attachedPeerInfos": {}
        }"#;

        let info: ClusterInfo = serde_json::from_str(json).expect("parse");

        assert!(info.healthy);
        assert_eq!(info.nodes().count(), 2);
        assert_eq!(info.chain_by_name("zoo").unwrap().subnet_id, "s1");
        assert_eq!(info.chains_by_vm("vm1").count(), 1);
        assert!(info.chain_by_name("vm1").is_none());
    }

    #[tokio::test]
    async fn test_with_deadline_maps_expiry() {
        let result: Result<(), _> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(ControlError::DeadlineExceeded));
    }

    #[test]
    fn test_version_mismatch_names_both_versions() {
        let msg = ControlError::VersionMismatch {
            server: 28,
            client: RPC_VERSION,
        }
        .to_string();
        assert!(msg.contains("(28)"));
        assert!(msg.contains(&format!("({RPC_VERSION})")));
    }
}
