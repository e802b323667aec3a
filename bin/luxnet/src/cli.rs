use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use luxnet_deploy::NetworkProfile;
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "luxnet")]
#[command(author, version, about = "Run local Lux test networks and deploy chains onto them")]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "LUXNET_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a luxnet.toml settings file.
    ///
    /// If not provided, `~/.luxnet/luxnet.toml` is used when it exists.
    #[arg(long, alias = "conf", env = "LUXNET_CONFIG")]
    pub config: Option<PathBuf>,

    /// The network profile to operate on.
    #[arg(short, long, env = "LUXNET_PROFILE", default_value_t = NetworkProfile::Custom)]
    pub profile: NetworkProfile,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage the network runner and its cluster.
    #[command(subcommand)]
    Network(NetworkCommand),

    /// Manage run directories.
    #[command(subcommand)]
    Run(RunCommand),

    /// Inspect and change chain configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Deploy a chain onto the running network.
    Deploy(DeployArgs),

    /// Print the effective settings as TOML.
    Settings {
        /// Also write them to the settings file.
        #[arg(long)]
        save: bool,
    },

    /// Print the VM id derived from a VM name.
    Vmid {
        /// The VM name, at most 32 bytes.
        name: String,
    },
}

#[derive(Subcommand)]
pub enum NetworkCommand {
    /// Start the network runner and boot a cluster.
    Start(StartArgs),

    /// Stop the network and its runner.
    Stop,

    /// Show the health of the cluster and its chain endpoints.
    Status,

    /// Run the network runner in the foreground until interrupted.
    Serve,
}

#[derive(Args)]
pub struct StartArgs {
    /// Wipe the current run directory before starting.
    #[arg(long)]
    pub fresh: bool,

    /// Start from a new timestamped run directory.
    #[arg(long)]
    pub new_run: bool,

    /// Node binary used to boot the cluster.
    ///
    /// If neither this, the `node_path` setting nor a snapshot is given, only
    /// the runner is started.
    #[arg(long, env = "LUXNET_NODE_PATH")]
    pub node_path: Option<PathBuf>,

    /// Restore the cluster from a snapshot saved by the runner instead of booting fresh nodes.
    #[arg(long, conflicts_with_all = ["fresh", "new_run", "num_nodes"])]
    pub snapshot_name: Option<String>,

    /// Number of nodes to boot.
    #[arg(long, alias = "nodes")]
    pub num_nodes: Option<u32>,

    /// Enable the admin API on every chain.
    #[arg(long)]
    pub admin: bool,
}

#[derive(Subcommand)]
pub enum RunCommand {
    /// Resolve the current run directory, creating one if needed.
    Ensure {
        /// Wipe the current run directory.
        #[arg(long)]
        fresh: bool,

        /// Create a new timestamped run directory.
        #[arg(long)]
        new_run: bool,
    },

    /// List run directories, oldest first.
    List,

    /// Print the current run directory.
    Current,

    /// Delete old run directories.
    Clean {
        /// Number of most recent runs to keep.
        #[arg(long, default_value_t = 5)]
        keep: usize,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration of a chain.
    Show {
        /// Chain id or alias.
        #[arg(default_value = "C")]
        chain: String,
    },

    /// Set configuration keys of a chain.
    Set {
        /// Chain id or alias.
        chain: String,

        /// Settings as `key=value`; values are parsed as JSON when possible.
        #[arg(required = true, value_parser = parse_key_value)]
        values: Vec<(String, serde_json::Value)>,

        /// Persist in the global configuration instead of the current run.
        #[arg(long)]
        global: bool,
    },

    /// Write effective configurations into the current run directory.
    Render {
        /// Enable the admin API on every chain.
        #[arg(long)]
        admin: bool,
    },
}

#[derive(Args)]
pub struct DeployArgs {
    /// Name of the chain, also used as its blockchain alias.
    pub chain: String,

    /// Canonical VM name.
    #[arg(long, default_value = "Lux EVM")]
    pub vm: String,

    /// Path to the VM binary.
    #[arg(long, env = "LUXNET_VM_BINARY")]
    pub vm_binary: PathBuf,

    /// Genesis file. Defaults to the chain directory's genesis.json.
    #[arg(long)]
    pub genesis: Option<PathBuf>,

    /// Chain configuration file.
    #[arg(long)]
    pub chain_config: Option<PathBuf>,

    /// Per-node chain configuration file.
    #[arg(long)]
    pub per_node_config: Option<PathBuf>,

    /// Existing subnet to create the chain in.
    #[arg(long)]
    pub subnet_id: Option<String>,
}

fn parse_key_value(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
