//! luxnet-deploy - Control plane for local Lux test networks.
//!
//! This crate manages the network runner control process, the per-profile run
//! directories, layered chain configuration and the deployment of custom
//! chains onto a running cluster.

mod context;
pub use context::{
    AppContext, CHAIN_CONFIG_FILENAME, NETRUNNER_BINARY, PER_NODE_CHAIN_CONFIG_FILENAME,
    PROCESS_RECORD_FILENAME, SERVER_LOG_FILENAME, SIDECAR_FILENAME,
};

mod profile;
pub use profile::{NetworkProfile, ProfilePorts};

mod settings;
pub use settings::{DeployTimeouts, ENV_PREFIX, SETTINGS_FILENAME, Settings, TimeoutSettings};

pub mod fs;
pub use fs::FsHandler;

pub mod rpc;

pub mod control;
pub use control::{
    ChainSpec, ClusterInfo, ControlClient, ControlConnector, ControlError, CustomChainInfo,
    GatewayClient, GatewayConnector, NodeInfo, RPC_VERSION, StartRequest,
};

pub mod process;
pub use process::{ControlProcessManager, OsProcessTable, ProcessRecord, StartOutcome};

pub mod run_dir;
pub use run_dir::RunManager;

pub mod cluster;
pub use cluster::{ClusterLauncher, ClusterSource, LaunchOptions};

pub mod sidecar;
pub use sidecar::{NetworkData, Sidecar};

pub mod chain_config;
pub use chain_config::{ChainConfig, ConfigManager, ConfigMap};

pub mod vm_id;
pub use vm_id::{VmId, VmIdError};

pub mod plugin;
pub use plugin::{FsPluginInstaller, PluginGuard, PluginInstaller, VmBinaryError};

pub mod health;
pub use health::{ChainHealthDiagnostic, ClusterSummary, HealthReport};

mod tracker;
pub use tracker::{SlowStageWarning, StageTracker};

mod deployer;
pub use deployer::{
    ChainDeployer, DeployStage, DeployedChain, DeploymentError, DeploymentOutcome,
    DeploymentRequest, FailureKind, GENESIS_FILENAME,
};
