//! Booting a cluster on a running network runner.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};

use crate::{
    AppContext, NetworkProfile,
    chain_config::ConfigManager,
    control::{ClusterInfo, ControlClient, ControlError, StartRequest, with_deadline},
    run_dir::RunManager,
};

/// Where the nodes of a new cluster come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterSource {
    /// Boot fresh nodes from a node binary.
    Nodes { node_path: PathBuf, num_nodes: u32 },
    /// Restore a snapshot saved by the runner.
    Snapshot(String),
}

/// Run directory handling for [`ClusterSource::Nodes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    pub fresh: bool,
    pub new_run: bool,
    /// Enable the admin API on every chain.
    pub admin: bool,
}

/// Boots the cluster of one profile and waits for it to become healthy.
///
/// Every call to the runner is bounded by the launcher's timeout.
pub struct ClusterLauncher<'a> {
    ctx: &'a AppContext,
    profile: NetworkProfile,
    timeout: Duration,
}

impl<'a> ClusterLauncher<'a> {
    pub fn new(ctx: &'a AppContext, profile: NetworkProfile, timeout: Duration) -> Self {
        Self {
            ctx,
            profile,
            timeout,
        }
    }

    pub async fn launch<C: ControlClient>(
        &self,
        client: &C,
        source: &ClusterSource,
        options: LaunchOptions,
    ) -> Result<ClusterInfo> {
        match with_deadline(self.timeout, client.status()).await {
            Ok(cluster) if !cluster.node_names.is_empty() => {
                tracing::info!(
                    profile = %self.profile,
                    root_data_dir = %cluster.root_data_dir,
                    "Network has already been booted, waiting until healthy"
                );
                return self.wait_until_healthy(client).await;
            }
            Ok(_) | Err(ControlError::NotBootstrapped) => {}
            Err(e) => return Err(e).context("Failed to query the network runner status"),
        }

        let runs = RunManager::new(self.ctx, self.profile);
        let cluster = match source {
            ClusterSource::Nodes {
                node_path,
                num_nodes,
            } => self.boot(client, &runs, node_path, *num_nodes, options).await?,
            ClusterSource::Snapshot(name) => self.restore(client, &runs, name).await?,
        };

        tracing::info!(
            node_log_path = %format!("{}/node<i>/logs", cluster.root_data_dir),
            "Booting network, waiting until healthy"
        );
        self.wait_until_healthy(client).await
    }

    async fn boot<C: ControlClient>(
        &self,
        client: &C,
        runs: &RunManager,
        node_path: &Path,
        num_nodes: u32,
        options: LaunchOptions,
    ) -> Result<ClusterInfo> {
        let run_dir = runs.ensure_run_dir(options.fresh, options.new_run)?;

        let mut configs = ConfigManager::new(self.ctx);
        configs.load_deployed_chains_for(self.profile)?;
        configs.load_run_overrides_all(&run_dir)?;
        if options.admin {
            configs.enable_admin_all();
        }
        configs.render_all(&run_dir)?;

        let request = StartRequest {
            exec_path: node_path.display().to_string(),
            num_nodes,
            root_data_dir: run_dir.display().to_string(),
            plugin_dir: self.ctx.plugins_dir(self.profile).display().to_string(),
            chain_configs: configs.to_netrunner_map()?,
        };

        tracing::info!(
            profile = %self.profile,
            run_dir = %run_dir.display(),
            num_nodes,
            "Starting network"
        );
        with_deadline(self.timeout, client.start(request))
            .await
            .context("Failed to start the network")
    }

    async fn restore<C: ControlClient>(
        &self,
        client: &C,
        runs: &RunManager,
        snapshot_name: &str,
    ) -> Result<ClusterInfo> {
        let run_dir = runs.ensure_run_dir(false, true)?;

        tracing::info!(
            profile = %self.profile,
            snapshot = snapshot_name,
            run_dir = %run_dir.display(),
            "Starting previously deployed and stopped snapshot"
        );
        let cluster = with_deadline(
            self.timeout,
            client.load_snapshot(snapshot_name, &run_dir.display().to_string()),
        )
        .await
        .with_context(|| format!("Failed to start the network from snapshot {snapshot_name}"))?;

        // The runner may place the restored data elsewhere.
        let root = PathBuf::from(&cluster.root_data_dir);
        if !cluster.root_data_dir.is_empty() && root != run_dir {
            runs.set_current(&root)?;
            tracing::info!(run_dir = %root.display(), "Current run follows the restored snapshot");
        }
        Ok(cluster)
    }

    async fn wait_until_healthy<C: ControlClient>(&self, client: &C) -> Result<ClusterInfo> {
        with_deadline(self.timeout, client.wait_for_healthy())
            .await
            .context("Failed waiting for network to become healthy")
    }
}
