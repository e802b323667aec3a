//! User settings, layered from built-in defaults, a TOML file and the environment.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

/// Name of the settings file inside the base directory.
pub const SETTINGS_FILENAME: &str = "luxnet.toml";

/// Prefix of environment variables overriding settings (`LUXNET_BASE_DIR`, ...).
pub const ENV_PREFIX: &str = "LUXNET_";

/// Name of the base directory under the user's home.
const DEFAULT_BASE_DIRNAME: &str = ".luxnet";

/// Budget for booting a cluster or restoring a snapshot.
const DEFAULT_CLUSTER_START_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Root of every file this tool manages.
    pub base_dir: PathBuf,
    /// Explicit path to the network runner binary.
    pub netrunner_path: Option<PathBuf>,
    /// Node binary the cluster is booted with.
    pub node_path: Option<PathBuf>,
    /// Number of nodes in a freshly booted cluster.
    pub num_nodes: u32,
    /// Host the network runner listens on.
    pub host: String,
    /// Seconds to wait for a freshly started control process to answer.
    pub startup_timeout_secs: u64,
    pub timeouts: TimeoutSettings,
}

impl Default for Settings {
    fn default() -> Self {
        let base_dir = dirs::home_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(DEFAULT_BASE_DIRNAME);

        Self {
            base_dir,
            netrunner_path: None,
            node_path: None,
            num_nodes: 5,
            host: "127.0.0.1".to_string(),
            startup_timeout_secs: 30,
            timeouts: TimeoutSettings::default(),
        }
    }
}

/// Deployment stage budgets, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub network_health_secs: u64,
    pub chain_creation_secs: u64,
    pub chain_health_secs: u64,
    pub health_probe_secs: u64,
    pub warn_after_secs: u64,
    /// Each of the start and wait-for-healthy calls of `network start`.
    pub cluster_start_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        let timeouts = DeployTimeouts::default();
        Self {
            network_health_secs: timeouts.network_health.as_secs(),
            chain_creation_secs: timeouts.chain_creation.as_secs(),
            chain_health_secs: timeouts.chain_health.as_secs(),
            health_probe_secs: timeouts.health_probe.as_secs(),
            warn_after_secs: timeouts.warn_after.as_secs(),
            cluster_start_secs: DEFAULT_CLUSTER_START_SECS,
        }
    }
}

/// Time budgets applied to each stage of a chain deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployTimeouts {
    /// Initial cluster health check.
    pub network_health: Duration,
    /// Chain creation: P-chain transactions, node restarts and height sync.
    pub chain_creation: Duration,
    /// Waiting for the new chain to report healthy.
    pub chain_health: Duration,
    /// Quick probe used to classify failures and build diagnostics.
    pub health_probe: Duration,
    /// Delay after which a slow stage emits a warning.
    pub warn_after: Duration,
}

impl Default for DeployTimeouts {
    fn default() -> Self {
        Self {
            network_health: Duration::from_secs(5),
            chain_creation: Duration::from_secs(90),
            chain_health: Duration::from_secs(10),
            health_probe: Duration::from_secs(5),
            warn_after: Duration::from_secs(5),
        }
    }
}

impl From<TimeoutSettings> for DeployTimeouts {
    fn from(value: TimeoutSettings) -> Self {
        Self {
            network_health: Duration::from_secs(value.network_health_secs),
            chain_creation: Duration::from_secs(value.chain_creation_secs),
            chain_health: Duration::from_secs(value.chain_health_secs),
            health_probe: Duration::from_secs(value.health_probe_secs),
            warn_after: Duration::from_secs(value.warn_after_secs),
        }
    }
}

impl Settings {
    /// Load settings.
    ///
    /// Layers, lowest precedence first: defaults, the TOML file (`config_path`
    /// if given, `<base dir>/luxnet.toml` otherwise), `LUXNET_*` environment
    /// variables. The base dir of the TOML file already honors
    /// `LUXNET_BASE_DIR`. A missing TOML file is not an error.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path(Self::env())?,
        };

        Self::figment(Settings::default(), &path, Self::env())
            .extract()
            .with_context(|| format!("Failed to load settings from {}", path.display()))
    }

    /// `<base dir>/luxnet.toml`, with the base dir taken from `overrides` if set there.
    fn default_path(overrides: impl Provider) -> Result<PathBuf> {
        let base_dir: PathBuf = Figment::from(Serialized::defaults(Settings::default()))
            .merge(overrides)
            .extract_inner("base_dir")
            .context("Failed to resolve the base directory")?;
        Ok(base_dir.join(SETTINGS_FILENAME))
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    fn figment(defaults: Settings, path: &Path, overrides: impl Provider) -> Figment {
        Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(path))
            .merge(overrides)
    }

    pub fn deploy_timeouts(&self) -> DeployTimeouts {
        self.timeouts.into()
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn cluster_start_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.cluster_start_secs)
    }

    /// Where `luxnet.toml` lives for these settings.
    pub fn file_path(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILENAME)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings to TOML")
    }

    /// Save the settings as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        crate::fs::FsHandler::write_atomic(path, content.as_bytes())
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    fn no_overrides() -> impl Provider {
        Toml::string("")
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = Settings::default().deploy_timeouts();
        assert_eq!(timeouts.network_health, Duration::from_secs(5));
        assert_eq!(timeouts.chain_creation, Duration::from_secs(90));
        assert_eq!(timeouts.chain_health, Duration::from_secs(10));
        assert_eq!(timeouts.health_probe, Duration::from_secs(5));
        assert_eq!(
            Settings::default().cluster_start_timeout(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let temp_dir = TempDir::new("luxnet-settings").expect("Failed to create temp dir");
        let path = temp_dir.path().join(SETTINGS_FILENAME);
        std::fs::write(
            &path,
            "base_dir = \"/tmp/luxnet-test\"\n[timeouts]\nchain_creation_secs = 120\n",
        )
        .expect("Failed to write settings");

        let settings = Settings::figment(Settings::default(), &path, no_overrides())
            .extract::<Settings>()
            .expect("extract");

        assert_eq!(settings.base_dir, PathBuf::from("/tmp/luxnet-test"));
        assert_eq!(settings.timeouts.chain_creation_secs, 120);
        assert_eq!(settings.timeouts.chain_health_secs, 10);
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.num_nodes, 5);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new("luxnet-settings").expect("Failed to create temp dir");
        let path = temp_dir.path().join("absent.toml");

        let settings = Settings::figment(Settings::default(), &path, no_overrides())
            .extract::<Settings>()
            .expect("extract");

        assert_eq!(settings.timeouts, TimeoutSettings::default());
    }

    #[test]
    fn test_settings_file_follows_base_dir_override() {
        let temp_dir = TempDir::new("luxnet-settings").expect("Failed to create temp dir");
        let base_dir = temp_dir.path().join("custom-base");
        std::fs::create_dir_all(&base_dir).expect("Failed to create base dir");
        std::fs::write(base_dir.join(SETTINGS_FILENAME), "num_nodes = 3\n")
            .expect("Failed to write settings");

        let overrides = || Serialized::default("base_dir", &base_dir);
        let path = Settings::default_path(overrides()).expect("default path");
        assert_eq!(path, base_dir.join(SETTINGS_FILENAME));

        let settings = Settings::figment(Settings::default(), &path, overrides())
            .extract::<Settings>()
            .expect("extract");
        assert_eq!(settings.base_dir, base_dir);
        assert_eq!(settings.num_nodes, 3);
        assert_eq!(settings.file_path(), path);
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = TempDir::new("luxnet-settings").expect("Failed to create temp dir");
        let path = temp_dir.path().join(SETTINGS_FILENAME);

        let mut settings = Settings::default();
        settings.netrunner_path = Some(PathBuf::from("/opt/netrunner"));
        settings.save_to_file(&path).expect("Failed to save settings");

        let loaded = Settings::figment(Settings::default(), &path, no_overrides())
            .extract::<Settings>()
            .expect("extract");
        assert_eq!(loaded.netrunner_path, settings.netrunner_path);
    }
}
