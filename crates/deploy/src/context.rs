//! On-disk layout of everything the control plane manages.

use std::path::{Path, PathBuf};

use crate::{NetworkProfile, settings::Settings};

/// Name of the per-chain sidecar metadata file.
pub const SIDECAR_FILENAME: &str = "sidecar.json";
/// Name of the chain configuration file passed to chain creation.
pub const CHAIN_CONFIG_FILENAME: &str = "chain.json";
/// Name of the per-node chain configuration file passed to chain creation.
pub const PER_NODE_CHAIN_CONFIG_FILENAME: &str = "per-node-chain.json";
/// Name of the process record of a profile's control process.
pub const PROCESS_RECORD_FILENAME: &str = "server.run";
/// Name of the control process log file.
pub const SERVER_LOG_FILENAME: &str = "netrunner-server.log";
/// Name of the network runner binary looked up in the bin dir and `$PATH`.
pub const NETRUNNER_BINARY: &str = "netrunner";

/// Paths derived from a base directory.
///
/// Every component receives an `AppContext` explicitly instead of reaching
/// for process-wide state.
///
/// ```text
/// <base>/
///   bin/netrunner
///   chains/<chain-name>/{sidecar.json, chain.json, per-node-chain.json}
///   chains/<chain-id>/config.json
///   plugins/<profile>/<vm-id>
///   runs/<profile>/{run_YYYYMMDD_HHMMSS, current -> run_...}
///   runs/server/<profile>/{server.run, <timestamp>/netrunner-server.log}
///   snapshots/
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    base_dir: PathBuf,
    netrunner_path: Option<PathBuf>,
    host: String,
}

impl AppContext {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            netrunner_path: None,
            host: "127.0.0.1".to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_dir: settings.base_dir.clone(),
            netrunner_path: settings.netrunner_path.clone(),
            host: settings.host.clone(),
        }
    }

    /// Use an explicit network runner binary instead of looking it up.
    pub fn with_netrunner_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.netrunner_path = Some(path.into());
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn netrunner_path(&self) -> Option<&Path> {
        self.netrunner_path.as_deref()
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.base_dir.join("bin")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base_dir.join("runs")
    }

    /// Root of the run directories of a profile.
    pub fn profile_runs_dir(&self, profile: NetworkProfile) -> PathBuf {
        self.runs_dir().join(profile.dir_name())
    }

    /// Directory holding a profile's process record and control process logs.
    pub fn server_dir(&self, profile: NetworkProfile) -> PathBuf {
        self.runs_dir().join("server").join(profile.dir_name())
    }

    pub fn process_record_path(&self, profile: NetworkProfile) -> PathBuf {
        self.server_dir(profile).join(PROCESS_RECORD_FILENAME)
    }

    /// Root of per-chain metadata, keyed by chain name.
    pub fn chains_dir(&self) -> PathBuf {
        self.base_dir.join("chains")
    }

    /// Root of persisted global chain configs, keyed by chain id.
    ///
    /// Shares the chains root: chain-id directories carry no sidecar and are
    /// ignored by deployed-chain discovery.
    pub fn chain_config_dir(&self) -> PathBuf {
        self.chains_dir()
    }

    pub fn chain_dir(&self, chain_name: &str) -> PathBuf {
        self.chains_dir().join(chain_name)
    }

    pub fn sidecar_path(&self, chain_name: &str) -> PathBuf {
        self.chain_dir(chain_name).join(SIDECAR_FILENAME)
    }

    pub fn plugins_dir(&self, profile: NetworkProfile) -> PathBuf {
        self.base_dir.join("plugins").join(profile.dir_name())
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.base_dir.join("snapshots")
    }
}
