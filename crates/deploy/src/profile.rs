//! Network profiles and their fixed port assignments.

use serde::{Deserialize, Serialize};

/// A named local network configuration.
///
/// Every profile owns its own control/gateway port pair, run-directory root
/// and process record. `Local` is the legacy name of `Custom`: both resolve to
/// the same ports and the same on-disk state.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkProfile {
    #[default]
    Mainnet,
    Testnet,
    Devnet,
    Custom,
    Local,
}

/// Control and gateway ports used by the network runner of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProfilePorts {
    /// Port of the runner's RPC server.
    pub control: u16,
    /// Port of the HTTP gateway in front of the RPC server.
    pub gateway: u16,
}

impl NetworkProfile {
    /// Profiles that own distinct state. `Local` is excluded since it aliases `Custom`.
    pub const DISTINCT: [NetworkProfile; 4] = [
        NetworkProfile::Mainnet,
        NetworkProfile::Testnet,
        NetworkProfile::Devnet,
        NetworkProfile::Custom,
    ];

    /// Resolve legacy aliases to the profile that owns the on-disk state.
    pub fn canonical(self) -> Self {
        match self {
            NetworkProfile::Local => NetworkProfile::Custom,
            other => other,
        }
    }

    pub fn ports(self) -> ProfilePorts {
        match self.canonical() {
            NetworkProfile::Mainnet => ProfilePorts {
                control: 8097,
                gateway: 8197,
            },
            NetworkProfile::Testnet => ProfilePorts {
                control: 8098,
                gateway: 8198,
            },
            NetworkProfile::Devnet => ProfilePorts {
                control: 8096,
                gateway: 8196,
            },
            NetworkProfile::Custom | NetworkProfile::Local => ProfilePorts {
                control: 8099,
                gateway: 8199,
            },
        }
    }

    /// Directory name used for this profile's state.
    pub fn dir_name(self) -> &'static str {
        match self.canonical() {
            NetworkProfile::Mainnet => "mainnet",
            NetworkProfile::Testnet => "testnet",
            NetworkProfile::Devnet => "devnet",
            NetworkProfile::Custom | NetworkProfile::Local => "custom",
        }
    }

    /// Keys under which a sidecar records deployments to this profile.
    pub fn sidecar_network_keys(self) -> &'static [&'static str] {
        match self.canonical() {
            NetworkProfile::Mainnet => &["Mainnet", "mainnet"],
            NetworkProfile::Testnet => &["Testnet", "testnet"],
            NetworkProfile::Devnet => &["Devnet", "devnet"],
            NetworkProfile::Custom | NetworkProfile::Local => {
                &["Local Network", "local", "custom"]
            }
        }
    }
}
