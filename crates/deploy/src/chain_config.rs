//! Layered chain configuration.
//!
//! The effective configuration of a chain is the union of four layers, lowest
//! precedence first:
//!
//! 1. built-in defaults,
//! 2. the persisted global file `<chain-config-dir>/<chain-id>/config.json`,
//! 3. per-run overrides `<run>/chainOverrides/<chain-id>.json`,
//! 4. command-line overrides.
//!
//! A key present in a higher layer replaces the whole value of the lower layer.
//! Rendering writes the effective view to `<run>/chainConfigs/<chain-id>/config.json`.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

use crate::{AppContext, NetworkProfile, fs::FsHandler, sidecar::Sidecar};

/// A single configuration layer.
pub type ConfigMap = Map<String, Value>;

/// Id and alias of the C-chain, which is always present on a running network.
pub const C_CHAIN_ID: &str = "C";
pub const C_CHAIN_ALIAS: &str = "c-chain";

/// Key of the API allowlist.
pub const ETH_APIS_KEY: &str = "eth-apis";
/// Key enabling the admin API.
pub const ADMIN_API_KEY: &str = "admin-api-enabled";
/// Allowlist entry of the admin API.
pub const ADMIN_API: &str = "admin";

const CONFIG_FILENAME: &str = "config.json";
const RENDERED_DIR: &str = "chainConfigs";
const RUN_OVERRIDES_DIR: &str = "chainOverrides";

/// Defaults applied to every EVM chain.
pub fn default_evm_config() -> ConfigMap {
    let value = json!({
        ETH_APIS_KEY: [
            "eth",
            "eth-filter",
            "net",
            "web3",
            "internal-eth",
            "internal-blockchain",
            "internal-transaction",
            "internal-account",
            ADMIN_API,
        ],
        ADMIN_API_KEY: true,
        "log-level": "info",
    });

    match value {
        Value::Object(map) => map,
        _ => unreachable!("json! object literal"),
    }
}

/// Configuration of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    chain_id: String,
    alias: Option<String>,
    global_path: PathBuf,
    defaults: ConfigMap,
    global: ConfigMap,
    run: ConfigMap,
    cli: ConfigMap,
}

impl ChainConfig {
    /// A configuration with EVM defaults whose global file lives under `config_dir`.
    pub fn new(chain_id: impl Into<String>, config_dir: &Path) -> Self {
        Self::with_defaults(chain_id, config_dir, default_evm_config())
    }

    pub fn with_defaults(chain_id: impl Into<String>, config_dir: &Path, defaults: ConfigMap) -> Self {
        let chain_id = chain_id.into();
        let global_path = config_dir.join(&chain_id).join(CONFIG_FILENAME);
        Self {
            chain_id,
            alias: None,
            global_path,
            defaults,
            global: ConfigMap::new(),
            run: ConfigMap::new(),
            cli: ConfigMap::new(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn global_path(&self) -> &Path {
        &self.global_path
    }

    /// Load the global layer. A missing file leaves the layer empty.
    pub fn load_global(&mut self) -> Result<()> {
        self.global = load_layer(&self.global_path)?;
        Ok(())
    }

    /// Persist the effective configuration as the new global layer.
    pub fn save_global(&mut self) -> Result<()> {
        let effective = self.effective();
        FsHandler::write_json(&self.global_path, &effective)
            .with_context(|| format!("Failed to save global config of chain {}", self.chain_id))?;
        self.global = effective;
        tracing::info!(chain_id = %self.chain_id, path = %self.global_path.display(), "Saved global chain config");
        Ok(())
    }

    fn run_overrides_path(&self, run_dir: &Path) -> PathBuf {
        run_dir
            .join(RUN_OVERRIDES_DIR)
            .join(format!("{}.json", self.chain_id))
    }

    /// Load the per-run layer of `run_dir`. A missing file leaves the layer empty.
    pub fn load_run_overrides(&mut self, run_dir: &Path) -> Result<()> {
        self.run = load_layer(&self.run_overrides_path(run_dir))?;
        Ok(())
    }

    pub fn save_run_overrides(&self, run_dir: &Path) -> Result<()> {
        FsHandler::write_json(&self.run_overrides_path(run_dir), &self.run)
    }

    pub fn set_run_override(&mut self, key: impl Into<String>, value: Value) {
        self.run.insert(key.into(), value);
    }

    pub fn set_run_overrides(&mut self, overrides: ConfigMap) {
        self.run.extend(overrides);
    }

    pub fn set_cli_override(&mut self, key: impl Into<String>, value: Value) {
        self.cli.insert(key.into(), value);
    }

    pub fn set_cli_overrides(&mut self, overrides: ConfigMap) {
        self.cli.extend(overrides);
    }

    /// The merged view of all layers.
    pub fn effective(&self) -> ConfigMap {
        let mut effective = self.defaults.clone();
        for layer in [&self.global, &self.run, &self.cli] {
            for (key, value) in layer {
                effective.insert(key.clone(), value.clone());
            }
        }
        effective
    }

    pub fn effective_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.effective())
            .with_context(|| format!("Failed to serialize config of chain {}", self.chain_id))
    }

    /// Enable the admin API.
    ///
    /// Sets `admin-api-enabled` and, when `eth-apis` is an array lacking
    /// `"admin"`, appends it after the existing entries.
    pub fn enable_admin(&mut self) {
        self.set_cli_override(ADMIN_API_KEY, Value::Bool(true));

        if let Some(Value::Array(apis)) = self.effective().get(ETH_APIS_KEY)
            && !apis.iter().any(|api| api.as_str() == Some(ADMIN_API))
        {
            let mut apis = apis.clone();
            apis.push(Value::String(ADMIN_API.to_string()));
            self.set_cli_override(ETH_APIS_KEY, Value::Array(apis));
        }
    }

    /// Path the configuration is rendered to inside `run_dir`.
    pub fn rendered_path(&self, run_dir: &Path) -> PathBuf {
        run_dir
            .join(RENDERED_DIR)
            .join(&self.chain_id)
            .join(CONFIG_FILENAME)
    }

    /// Write the effective configuration into `run_dir`, replacing any
    /// previous rendering.
    pub fn render(&self, run_dir: &Path) -> Result<PathBuf> {
        let path = self.rendered_path(run_dir);
        FsHandler::write_json(&path, &self.effective())
            .with_context(|| format!("Failed to render config of chain {}", self.chain_id))?;
        tracing::debug!(chain_id = %self.chain_id, path = %path.display(), "Rendered chain config");
        Ok(path)
    }
}

fn load_layer(path: &Path) -> Result<ConfigMap> {
    if !path.exists() {
        return Ok(ConfigMap::new());
    }
    FsHandler::read_json(path)
}

/// The configurations of every chain of a network.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
    chains_dir: PathBuf,
    configs: BTreeMap<String, ChainConfig>,
}

impl ConfigManager {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            config_dir: ctx.chain_config_dir(),
            chains_dir: ctx.chains_dir(),
            configs: BTreeMap::new(),
        }
    }

    /// Register a chain, returning its configuration.
    pub fn add_chain(&mut self, chain_id: &str) -> &mut ChainConfig {
        self.configs
            .entry(chain_id.to_string())
            .or_insert_with(|| ChainConfig::new(chain_id, &self.config_dir))
    }

    pub fn add_chain_with_alias(&mut self, chain_id: &str, alias: &str) -> &mut ChainConfig {
        let config = self.add_chain(chain_id);
        config.alias = Some(alias.to_string());
        config
    }

    /// Look a chain up by id or alias.
    pub fn get(&self, id_or_alias: &str) -> Option<&ChainConfig> {
        self.configs.get(id_or_alias).or_else(|| {
            self.configs
                .values()
                .find(|c| c.alias() == Some(id_or_alias))
        })
    }

    pub fn get_mut(&mut self, id_or_alias: &str) -> Option<&mut ChainConfig> {
        let key = if self.configs.contains_key(id_or_alias) {
            id_or_alias.to_string()
        } else {
            self.configs
                .values()
                .find(|c| c.alias() == Some(id_or_alias))?
                .chain_id
                .clone()
        };
        self.configs.get_mut(&key)
    }

    pub fn chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.configs.values()
    }

    /// Register every chain already deployed to the custom network, plus the C-chain.
    pub fn load_deployed_chains(&mut self) -> Result<()> {
        self.load_deployed_chains_for(NetworkProfile::Custom)
    }

    /// Register every chain whose sidecar records a deployment to `profile`,
    /// plus the C-chain, and load their global layers.
    ///
    /// Directories without a readable sidecar are skipped.
    pub fn load_deployed_chains_for(&mut self, profile: NetworkProfile) -> Result<()> {
        self.add_chain_with_alias(C_CHAIN_ID, C_CHAIN_ALIAS)
            .load_global()
            .context("Failed to load C-chain config")?;

        let entries = match std::fs::read_dir(&self.chains_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read chains directory {}", self.chains_dir.display())
                });
            }
        };

        for entry in entries {
            let entry = entry.context("Failed to read chains directory entry")?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }

            let sidecar_path = entry.path().join(crate::context::SIDECAR_FILENAME);
            if !sidecar_path.exists() {
                continue;
            }

            let sidecar = match Sidecar::load_from_file(&sidecar_path) {
                Ok(sidecar) => sidecar,
                Err(e) => {
                    tracing::debug!(path = %sidecar_path.display(), error = %e, "Skipping unreadable sidecar");
                    continue;
                }
            };

            let Some(deployment) = sidecar.deployment(profile) else {
                continue;
            };

            let name = if sidecar.name.is_empty() {
                entry.file_name().to_string_lossy().into_owned()
            } else {
                sidecar.name.clone()
            };
            let blockchain_id = deployment.blockchain_id.clone();

            self.add_chain_with_alias(&blockchain_id, &name)
                .load_global()
                .with_context(|| format!("Failed to load config of chain {name}"))?;
            tracing::debug!(chain = %name, blockchain_id = %blockchain_id, "Registered deployed chain");
        }

        Ok(())
    }

    /// Render every registered chain into `run_dir`.
    pub fn render_all(&self, run_dir: &Path) -> Result<Vec<PathBuf>> {
        self.configs.values().map(|c| c.render(run_dir)).collect()
    }

    /// Load the run layer of every registered chain from `run_dir`.
    pub fn load_run_overrides_all(&mut self, run_dir: &Path) -> Result<()> {
        for config in self.configs.values_mut() {
            config.load_run_overrides(run_dir)?;
        }
        Ok(())
    }

    pub fn enable_admin_all(&mut self) {
        for config in self.configs.values_mut() {
            config.enable_admin();
        }
    }

    /// Effective configs keyed by chain id, serialized as the network runner expects.
    pub fn to_netrunner_map(&self) -> Result<BTreeMap<String, String>> {
        self.configs
            .iter()
            .map(|(id, config)| {
                let json = serde_json::to_string(&config.effective())
                    .with_context(|| format!("Failed to serialize config of chain {id}"))?;
                Ok((id.clone(), json))
            })
            .collect()
    }
}
