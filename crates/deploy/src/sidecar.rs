//! Read-only view of per-chain sidecar metadata.

use std::{collections::BTreeMap, path::Path};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{NetworkProfile, fs::FsHandler};

/// Blockchain id of the primary P-chain, recorded by some tools for chains
/// that were never deployed.
pub const P_CHAIN_ID: &str = "11111111111111111111111111111111LpoYY";

/// Deployment of a chain to one network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkData {
    #[serde(rename = "SubnetID")]
    pub subnet_id: String,
    #[serde(rename = "BlockchainID")]
    pub blockchain_id: String,
    #[serde(rename = "RPCVersion")]
    pub rpc_version: u32,
}

impl NetworkData {
    /// Whether this record describes an actual deployment.
    pub fn is_deployed(&self) -> bool {
        !self.blockchain_id.is_empty() && self.blockchain_id != P_CHAIN_ID
    }
}

/// Metadata persisted next to a chain's genesis by the chain tooling.
///
/// Only the fields used by this crate are modelled; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sidecar {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "VM")]
    pub vm: String,
    #[serde(rename = "VMVersion")]
    pub vm_version: String,
    #[serde(rename = "ChainID")]
    pub chain_id: String,
    #[serde(rename = "TokenName")]
    pub token_name: String,
    #[serde(rename = "Networks")]
    pub networks: BTreeMap<String, NetworkData>,
}

impl Sidecar {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        FsHandler::read_json(path)
    }

    /// The deployment record of this chain for `profile`, if any.
    pub fn deployment(&self, profile: NetworkProfile) -> Option<&NetworkData> {
        profile
            .sidecar_network_keys()
            .iter()
            .find_map(|key| self.networks.get(*key))
            .filter(|data| data.is_deployed())
    }
}
