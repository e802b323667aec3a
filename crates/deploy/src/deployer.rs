//! Deployment of a chain onto a running cluster.
//!
//! The workflow is linear and never retries on its own:
//!
//! ```text
//! Idle -> ConnectedToControlPlane -> NetworkHealthVerified -> VmBinaryValidated
//!      -> PluginInstalled -> ChainCreationRequested -> ChainHealthConfirmed -> Deployed
//! ```
//!
//! The tracker enters a stage before attempting it, so a failure always names
//! the stage that did not complete. Every failure is returned as a
//! [`DeploymentError`] that tells whether the cluster is still healthy and
//! whether the deployment can simply be retried.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::{
    AppContext, NetworkProfile,
    context::{CHAIN_CONFIG_FILENAME, PER_NODE_CHAIN_CONFIG_FILENAME},
    control::{
        ChainSpec, ClusterInfo, ControlClient, ControlConnector, ControlError, CustomChainInfo,
        with_deadline,
    },
    health::{ChainHealthDiagnostic, HealthReport, chain_rpc_endpoint},
    plugin::{PluginGuard, PluginInstaller, validate_vm_binary},
    settings::DeployTimeouts,
    tracker::StageTracker,
    vm_id::VmId,
};

/// Name of the genesis file inside a chain directory.
pub const GENESIS_FILENAME: &str = "genesis.json";

/// Stages of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DeployStage {
    Idle,
    ConnectedToControlPlane,
    NetworkHealthVerified,
    VmBinaryValidated,
    PluginInstalled,
    ChainCreationRequested,
    ChainHealthConfirmed,
    Deployed,
}

impl DeployStage {
    /// What the deployment does while in this stage.
    pub fn action(self) -> &'static str {
        match self {
            DeployStage::Idle => "startup",
            DeployStage::ConnectedToControlPlane => "control plane connection",
            DeployStage::NetworkHealthVerified => "network health check",
            DeployStage::VmBinaryValidated => "VM binary validation",
            DeployStage::PluginInstalled => "plugin installation",
            DeployStage::ChainCreationRequested => "chain creation",
            DeployStage::ChainHealthConfirmed => "chain health check",
            DeployStage::Deployed => "chain lookup",
        }
    }
}

/// What went wrong in a failed deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum FailureKind {
    /// The control process could not be reached or speaks another protocol.
    ControlPlaneUnreachable,
    /// The cluster was never started.
    NetworkNotRunning,
    NetworkUnhealthy,
    /// The VM name, binary or genesis were rejected before touching the cluster.
    Preflight,
    PluginInstall,
    ChainCreation,
    ChainHealth,
    /// The chain was created but could not be found in the cluster state.
    ChainLookup,
}

/// A failed deployment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "chain '{chain_name}' deployment failed during {} ({}): {cause}{}",
    .stage.action(),
    network_state(.network_still_healthy),
    fix_hint(.suggestion)
)]
pub struct DeploymentError {
    pub chain_name: String,
    /// The stage that was being attempted.
    pub stage: DeployStage,
    pub kind: FailureKind,
    pub cause: String,
    /// `false` means the cluster itself may have crashed.
    pub network_still_healthy: bool,
    /// `true` means the deployment can be fixed and retried without touching the cluster.
    pub recoverable: bool,
    pub suggestion: String,
}

fn network_state(healthy: &bool) -> &'static str {
    if *healthy {
        "network still running"
    } else {
        "network may have crashed"
    }
}

fn fix_hint(suggestion: &str) -> String {
    if suggestion.is_empty() {
        String::new()
    } else {
        format!("\n\nTo fix: {suggestion}")
    }
}

impl DeploymentError {
    /// A failure that left the cluster untouched.
    pub fn recoverable(
        chain_name: &str,
        stage: DeployStage,
        kind: FailureKind,
        cause: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            stage,
            kind,
            cause: cause.into(),
            network_still_healthy: true,
            recoverable: true,
            suggestion: suggestion.into(),
        }
    }

    /// A failure that may have affected the cluster.
    pub fn fatal(
        chain_name: &str,
        stage: DeployStage,
        kind: FailureKind,
        cause: impl Into<String>,
        network_still_healthy: bool,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            chain_name: chain_name.to_string(),
            stage,
            kind,
            cause: cause.into(),
            network_still_healthy,
            recoverable: false,
            suggestion: suggestion.into(),
        }
    }
}

/// A chain to deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub chain_name: String,
    /// Canonical VM name the VM id is derived from.
    pub vm_name: String,
    pub vm_binary: PathBuf,
    pub genesis: Vec<u8>,
    pub genesis_path: PathBuf,
    pub chain_config_path: Option<PathBuf>,
    pub per_node_config_path: Option<PathBuf>,
    /// Existing subnet to create the chain in.
    pub subnet_id: Option<String>,
}

impl DeploymentRequest {
    /// Build a request from the genesis file at `genesis_path`.
    pub fn new(
        chain_name: impl Into<String>,
        vm_name: impl Into<String>,
        vm_binary: impl Into<PathBuf>,
        genesis_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let genesis_path = genesis_path.into();
        let genesis = std::fs::read(&genesis_path)
            .with_context(|| format!("Failed to read genesis {}", genesis_path.display()))?;
        Ok(Self {
            chain_name: chain_name.into(),
            vm_name: vm_name.into(),
            vm_binary: vm_binary.into(),
            genesis,
            genesis_path,
            chain_config_path: None,
            per_node_config_path: None,
            subnet_id: None,
        })
    }

    /// Build a request from `<chains>/<chain_name>/`, picking up
    /// `chain.json` and `per-node-chain.json` when present.
    pub fn from_chain_dir(
        ctx: &AppContext,
        chain_name: &str,
        vm_name: impl Into<String>,
        vm_binary: impl Into<PathBuf>,
    ) -> Result<Self> {
        let dir = ctx.chain_dir(chain_name);
        let optional = |name: &str| Some(dir.join(name)).filter(|p| p.is_file());

        let mut request = Self::new(chain_name, vm_name, vm_binary, dir.join(GENESIS_FILENAME))?;
        request.chain_config_path = optional(CHAIN_CONFIG_FILENAME);
        request.per_node_config_path = optional(PER_NODE_CHAIN_CONFIG_FILENAME);
        Ok(request)
    }

    pub fn chain_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.chain_config_path = Some(path.into());
        self
    }

    pub fn per_node_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.per_node_config_path = Some(path.into());
        self
    }

    pub fn subnet_id(mut self, subnet_id: impl Into<String>) -> Self {
        self.subnet_id = Some(subnet_id.into());
        self
    }

    fn chain_spec(&self) -> ChainSpec {
        let display = |p: &Path| p.display().to_string();
        ChainSpec {
            vm_name: self.vm_name.clone(),
            genesis: display(&self.genesis_path),
            chain_config: self.chain_config_path.as_deref().map(display),
            blockchain_alias: self.chain_name.clone(),
            per_node_chain_config: self.per_node_config_path.as_deref().map(display),
            subnet_id: self.subnet_id.clone(),
        }
    }
}

/// A chain running on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedChain {
    pub chain_name: String,
    pub vm_id: String,
    pub subnet_id: String,
    pub blockchain_id: String,
    /// RPC endpoint of the chain on the first node.
    pub rpc_endpoint: Option<String>,
}

impl DeployedChain {
    fn from_cluster(cluster: &ClusterInfo, chain: &CustomChainInfo) -> Self {
        Self {
            chain_name: chain.chain_name.clone(),
            vm_id: chain.vm_id.clone(),
            subnet_id: chain.subnet_id.clone(),
            blockchain_id: chain.blockchain_id.clone(),
            rpc_endpoint: cluster
                .nodes()
                .next()
                .map(|node| chain_rpc_endpoint(&node.uri, &chain.blockchain_id)),
        }
    }
}

/// Result of a successful deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// A chain with this name already runs on the cluster; nothing was changed.
    AlreadyDeployed(DeployedChain),
    Deployed(DeployedChain),
}

impl DeploymentOutcome {
    pub fn chain(&self) -> &DeployedChain {
        match self {
            DeploymentOutcome::AlreadyDeployed(chain) | DeploymentOutcome::Deployed(chain) => chain,
        }
    }
}

/// Deploys chains onto the cluster of one profile.
pub struct ChainDeployer<C, P> {
    profile: NetworkProfile,
    connector: C,
    installer: P,
    timeouts: DeployTimeouts,
    backend_log_dir: Option<PathBuf>,
}

impl<C: ControlConnector, P: PluginInstaller> ChainDeployer<C, P> {
    pub fn new(profile: NetworkProfile, connector: C, installer: P) -> Self {
        Self {
            profile,
            connector,
            installer,
            timeouts: DeployTimeouts::default(),
            backend_log_dir: None,
        }
    }

    pub fn with_timeouts(mut self, timeouts: DeployTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Control process log directory, reported in diagnostics.
    pub fn with_backend_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backend_log_dir = dir;
        self
    }

    /// Deploy the chain described by `request`.
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
    ) -> Result<DeploymentOutcome, DeploymentError> {
        tracing::info!(
            chain = %request.chain_name,
            vm = %request.vm_name,
            profile = %self.profile,
            "Deploying chain..."
        );

        let mut tracker = StageTracker::new(&request.chain_name);
        let result = self.run(request, &mut tracker).await;

        match &result {
            Ok(DeploymentOutcome::Deployed(chain)) => {
                for (stage, spent) in tracker.history() {
                    tracing::debug!(%stage, elapsed_ms = spent.as_millis() as u64, "Stage timing");
                }
                tracing::info!(
                    chain = %chain.chain_name,
                    subnet_id = %chain.subnet_id,
                    blockchain_id = %chain.blockchain_id,
                    elapsed_ms = tracker.total_elapsed().as_millis() as u64,
                    "Chain deployed"
                )
            }
            Ok(DeploymentOutcome::AlreadyDeployed(chain)) => tracing::info!(
                chain = %chain.chain_name,
                blockchain_id = %chain.blockchain_id,
                "Chain already deployed, nothing to do"
            ),
            Err(e) => tracing::error!(
                chain = %e.chain_name,
                stage = %e.stage,
                kind = %e.kind,
                recoverable = e.recoverable,
                network_still_healthy = e.network_still_healthy,
                "Deployment failed"
            ),
        }

        result
    }

    async fn run(
        &self,
        request: &DeploymentRequest,
        tracker: &mut StageTracker,
    ) -> Result<DeploymentOutcome, DeploymentError> {
        let name = request.chain_name.as_str();
        let start_hint = format!("Start it with: luxnet network start --profile {}", self.profile);

        tracker.enter(DeployStage::ConnectedToControlPlane);
        let client = self.connector.connect(self.profile).await.map_err(|e| {
            let suggestion = match e {
                ControlError::VersionMismatch { .. } => {
                    format!("Stop it with: luxnet network stop --profile {}", self.profile)
                }
                _ => start_hint.clone(),
            };
            DeploymentError::fatal(
                name,
                tracker.stage(),
                FailureKind::ControlPlaneUnreachable,
                format!("failed to connect to network. Is it running? {e}"),
                false,
                suggestion,
            )
        })?;

        tracker.enter(DeployStage::NetworkHealthVerified);
        let cluster = self.verify_network(&client, tracker, name, &start_hint).await?;

        if let Some(existing) = cluster.chain_by_name(name) {
            return Ok(DeploymentOutcome::AlreadyDeployed(DeployedChain::from_cluster(
                &cluster, existing,
            )));
        }

        tracker.enter(DeployStage::VmBinaryValidated);
        let vm_id = self.preflight(request, tracker)?;

        tracker.enter(DeployStage::PluginInstalled);
        let plugin = PluginGuard::install(&self.installer, vm_id, &request.vm_binary).map_err(|e| {
            DeploymentError::recoverable(
                name,
                tracker.stage(),
                FailureKind::PluginInstall,
                format!("failed to install VM plugin: {e:#}"),
                "Check plugin directory permissions and disk space",
            )
        })?;

        tracker.enter(DeployStage::ChainCreationRequested);
        let limit = self.timeouts.chain_creation;
        let timer = tracker.warn_if_slow(self.timeouts.warn_after, limit);
        let created = with_deadline(limit, client.create_chains(vec![request.chain_spec()])).await;
        timer.stop().await;
        let elapsed = tracker.stage_elapsed();

        let created = match created {
            Ok(created) => {
                let path = plugin.commit();
                tracing::debug!(plugin = %path.display(), "Chain creation accepted");
                created
            }
            Err(e) => {
                if let Err(rollback_err) = plugin.rollback() {
                    tracing::warn!(
                        chain = %name,
                        error = %rollback_err,
                        "Failed to roll back VM plugin"
                    );
                }

                let probe = HealthReport::probe(&client, self.timeouts.health_probe).await;
                let healthy = probe.network_healthy();
                let cause = if e.is_deadline_exceeded() {
                    format!("blockchain creation timed out after {elapsed:.1?} (limit: {limit:?})")
                } else {
                    format!("blockchain creation failed after {elapsed:.1?}: {e}")
                };
                let suggestion = if healthy {
                    "The network is still running. Check the node logs, fix the chain and deploy again".to_string()
                } else {
                    format!(
                        "The network may need a restart: luxnet network stop --profile {0} && luxnet network start --profile {0}",
                        self.profile
                    )
                };
                return Err(DeploymentError::fatal(
                    name,
                    tracker.stage(),
                    FailureKind::ChainCreation,
                    cause,
                    healthy,
                    suggestion,
                ));
            }
        };

        tracker.enter(DeployStage::ChainHealthConfirmed);
        let cluster = self.wait_for_chain(&client, tracker, name, &created).await?;

        tracker.enter(DeployStage::Deployed);
        let vm = vm_id.to_string();
        let entry = cluster
            .chains_by_vm(&vm)
            .find(|c| c.chain_name == name)
            .or_else(|| cluster.chains_by_vm(&vm).next())
            .ok_or_else(|| {
                DeploymentError::fatal(
                    name,
                    tracker.stage(),
                    FailureKind::ChainLookup,
                    format!("chain was created but no chain with VM {vm} is known to the cluster"),
                    true,
                    "Check the network status with: luxnet network status",
                )
            })?;

        Ok(DeploymentOutcome::Deployed(DeployedChain::from_cluster(
            &cluster, entry,
        )))
    }

    async fn verify_network(
        &self,
        client: &C::Client,
        tracker: &StageTracker,
        name: &str,
        start_hint: &str,
    ) -> Result<ClusterInfo, DeploymentError> {
        let unhealthy = |cause: String| {
            DeploymentError::fatal(
                name,
                tracker.stage(),
                FailureKind::NetworkUnhealthy,
                cause,
                false,
                format!(
                    "Check the network with: luxnet network status --profile {}",
                    self.profile
                ),
            )
        };

        match with_deadline(self.timeouts.network_health, client.wait_for_healthy()).await {
            Ok(cluster) if cluster.healthy => Ok(cluster),
            Ok(_) => Err(unhealthy("network is unhealthy".to_string())),
            Err(ControlError::NotBootstrapped) => Err(DeploymentError::fatal(
                name,
                tracker.stage(),
                FailureKind::NetworkNotRunning,
                "network is not running",
                false,
                start_hint,
            )),
            Err(e) => Err(unhealthy(format!("network is unhealthy: {e}"))),
        }
    }

    fn preflight(
        &self,
        request: &DeploymentRequest,
        tracker: &StageTracker,
    ) -> Result<VmId, DeploymentError> {
        let rejected = |cause: String, suggestion: &str| {
            DeploymentError::recoverable(
                &request.chain_name,
                tracker.stage(),
                FailureKind::Preflight,
                cause,
                suggestion,
            )
        };

        let vm_id = VmId::from_name(&request.vm_name)
            .map_err(|e| rejected(e.to_string(), "Use a VM name of at most 32 bytes"))?;

        let size = validate_vm_binary(&request.vm_binary)
            .map_err(|e| rejected(e.to_string(), "Rebuild the VM binary or check the VM path"))?;

        if request.genesis.is_empty() {
            return Err(rejected(
                format!("genesis {} is empty", request.genesis_path.display()),
                "Regenerate the chain genesis",
            ));
        }

        tracing::debug!(vm_id = %vm_id, binary_size = size, "VM binary validated");
        Ok(vm_id)
    }

    async fn wait_for_chain(
        &self,
        client: &C::Client,
        tracker: &StageTracker,
        name: &str,
        created: &ClusterInfo,
    ) -> Result<ClusterInfo, DeploymentError> {
        let limit = self.timeouts.chain_health;
        let cause = match with_deadline(limit, client.wait_for_healthy()).await {
            Ok(cluster) if cluster.custom_chains_healthy => return Ok(cluster),
            Ok(_) => "custom chains reported unhealthy".to_string(),
            Err(e) => e.to_string(),
        };

        let report = HealthReport::probe(client, self.timeouts.health_probe).await;
        let network_still_healthy = report.network_healthy();
        let root_data_dir = report
            .cluster
            .as_ref()
            .map(|c| c.root_data_dir.as_str())
            .filter(|dir| !dir.is_empty())
            .or(Some(created.root_data_dir.as_str()).filter(|dir| !dir.is_empty()))
            .map(PathBuf::from);

        let diagnostic = ChainHealthDiagnostic {
            chain_name: name.to_string(),
            timeout: limit,
            cause,
            report,
            root_data_dir,
            backend_log_dir: self.backend_log_dir.clone(),
        };

        Err(DeploymentError::fatal(
            name,
            tracker.stage(),
            FailureKind::ChainHealth,
            diagnostic.to_string(),
            network_still_healthy,
            "Inspect the logs above, fix the VM or genesis, then deploy again",
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use tempdir::TempDir;

    use super::*;
    use crate::{
        control::{NodeInfo, StartRequest},
        fs::FsHandler,
        plugin::FsPluginInstaller,
    };

    #[derive(Clone)]
    enum Create {
        Succeed,
        Fail(ControlError),
        Hang,
    }

    struct FakePlane {
        cluster: Mutex<ClusterInfo>,
        connect_error: Option<ControlError>,
        wait_error: Option<ControlError>,
        health_error: Option<ControlError>,
        create: Create,
        chains_become_healthy: bool,
        create_calls: AtomicUsize,
    }

    impl FakePlane {
        fn healthy() -> Self {
            let mut cluster = ClusterInfo {
                healthy: true,
                custom_chains_healthy: true,
                root_data_dir: "/runs/custom/current".to_string(),
                ..Default::default()
            };
            cluster.node_infos.insert(
                "node1".to_string(),
                NodeInfo {
                    name: "node1".to_string(),
                    uri: "http://127.0.0.1:9630".to_string(),
                    ..Default::default()
                },
            );
            Self {
                cluster: Mutex::new(cluster),
                connect_error: None,
                wait_error: None,
                health_error: None,
                create: Create::Succeed,
                chains_become_healthy: true,
                create_calls: AtomicUsize::new(0),
            }
        }

        fn with_chain(self, name: &str, vm_name: &str, blockchain_id: &str) -> Self {
            self.cluster.lock().unwrap().custom_chains.insert(
                blockchain_id.to_string(),
                CustomChainInfo {
                    chain_name: name.to_string(),
                    vm_id: VmId::from_name(vm_name).unwrap().to_string(),
                    subnet_id: format!("subnet-{name}"),
                    blockchain_id: blockchain_id.to_string(),
                },
            );
            self
        }

        fn snapshot(&self) -> ClusterInfo {
            self.cluster.lock().unwrap().clone()
        }
    }

    struct FakeClient<'a>(&'a FakePlane);

    impl ControlClient for FakeClient<'_> {
        async fn rpc_version(&self) -> Result<u32, ControlError> {
            Ok(crate::control::RPC_VERSION)
        }

        async fn start(&self, _: StartRequest) -> Result<ClusterInfo, ControlError> {
            Ok(self.0.snapshot())
        }

        async fn load_snapshot(&self, _: &str, _: &str) -> Result<ClusterInfo, ControlError> {
            Ok(self.0.snapshot())
        }

        async fn status(&self) -> Result<ClusterInfo, ControlError> {
            Ok(self.0.snapshot())
        }

        async fn health(&self) -> Result<ClusterInfo, ControlError> {
            match &self.0.health_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.0.snapshot()),
            }
        }

        async fn wait_for_healthy(&self) -> Result<ClusterInfo, ControlError> {
            match &self.0.wait_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.0.snapshot()),
            }
        }

        async fn create_chains(&self, specs: Vec<ChainSpec>) -> Result<ClusterInfo, ControlError> {
            self.0.create_calls.fetch_add(1, Ordering::SeqCst);
            match &self.0.create {
                Create::Fail(e) => Err(e.clone()),
                Create::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(ControlError::Rpc("unreachable".into()))
                }
                Create::Succeed => {
                    let mut cluster = self.0.cluster.lock().unwrap();
                    for (i, spec) in specs.iter().enumerate() {
                        let id = format!("2new{i}");
                        cluster.custom_chains.insert(
                            id.clone(),
                            CustomChainInfo {
                                chain_name: spec.blockchain_alias.clone(),
                                vm_id: VmId::from_name(&spec.vm_name).unwrap().to_string(),
                                subnet_id: "2subnet".to_string(),
                                blockchain_id: id,
                            },
                        );
                    }
                    cluster.custom_chains_healthy = self.0.chains_become_healthy;
                    Ok(cluster.clone())
                }
            }
        }

        async fn stop(&self) -> Result<(), ControlError> {
            Ok(())
        }
    }

    impl<'a> ControlConnector for &'a FakePlane {
        type Client = FakeClient<'a>;

        async fn connect(&self, _: NetworkProfile) -> Result<FakeClient<'a>, ControlError> {
            match &self.connect_error {
                Some(e) => Err(e.clone()),
                None => Ok(FakeClient(*self)),
            }
        }
    }

    /// Installs like [`FsPluginInstaller`] but can never remove a plugin.
    struct StuckInstaller(FsPluginInstaller);

    impl PluginInstaller for StuckInstaller {
        fn install(&self, vm_id: &VmId, binary: &Path) -> Result<PathBuf> {
            self.0.install(vm_id, binary)
        }

        fn uninstall(&self, _: &VmId) -> Result<()> {
            anyhow::bail!("plugin directory is read-only")
        }

        fn is_installed(&self, vm_id: &VmId) -> bool {
            self.0.is_installed(vm_id)
        }
    }

    struct Fixture {
        temp_dir: TempDir,
        installer: FsPluginInstaller,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new("luxnet-deployer").expect("Failed to create temp dir");
            let installer = FsPluginInstaller::new(temp_dir.path().join("plugins"));
            Self {
                temp_dir,
                installer,
            }
        }

        fn request(&self, chain_name: &str) -> DeploymentRequest {
            let binary = self.temp_dir.path().join("evm");
            std::fs::write(&binary, vec![0u8; 2048]).unwrap();
            FsHandler::set_executable(&binary).unwrap();
            let genesis = self.temp_dir.path().join("genesis.json");
            std::fs::write(&genesis, br#"{"config":{"chainId":1337}}"#).unwrap();
            DeploymentRequest::new(chain_name, "Lux EVM", binary, genesis).unwrap()
        }

        fn deployer<'a>(&'a self, plane: &'a FakePlane) -> ChainDeployer<&'a FakePlane, &'a FsPluginInstaller> {
            Self::deployer_with(plane, &self.installer)
        }

        fn deployer_with<'a, P: PluginInstaller>(
            plane: &'a FakePlane,
            installer: P,
        ) -> ChainDeployer<&'a FakePlane, P> {
            ChainDeployer::new(NetworkProfile::Custom, plane, installer)
                .with_timeouts(DeployTimeouts {
                    network_health: Duration::from_millis(500),
                    chain_creation: Duration::from_millis(200),
                    chain_health: Duration::from_millis(500),
                    health_probe: Duration::from_millis(500),
                    warn_after: Duration::from_millis(50),
                })
                .with_backend_log_dir(Some(PathBuf::from("/runs/server/custom/1")))
        }

        fn plugin_installed(&self) -> bool {
            self.installer
                .is_installed(&VmId::from_name("Lux EVM").unwrap())
        }
    }

    #[tokio::test]
    async fn test_deploy_creates_chain() {
        let fixture = Fixture::new();
        let plane = FakePlane::healthy();

        let outcome = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .expect("deploy");

        let DeploymentOutcome::Deployed(chain) = outcome else {
            panic!("expected a new deployment");
        };
        assert_eq!(chain.chain_name, "zoo");
        assert_eq!(chain.subnet_id, "2subnet");
        assert_eq!(chain.blockchain_id, "2new0");
        assert_eq!(
            chain.rpc_endpoint.as_deref(),
            Some("http://127.0.0.1:9630/ext/bc/2new0/rpc")
        );
        assert!(fixture.plugin_installed());
    }

    #[tokio::test]
    async fn test_redeploy_by_name_is_noop() {
        let fixture = Fixture::new();
        let plane = FakePlane::healthy().with_chain("zoo", "Other VM", "2old");

        let outcome = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .expect("deploy");

        assert!(matches!(
            outcome,
            DeploymentOutcome::AlreadyDeployed(ref c) if c.blockchain_id == "2old"
        ));
        assert_eq!(plane.create_calls.load(Ordering::SeqCst), 0);
        assert!(!fixture.plugin_installed());
    }

    #[tokio::test]
    async fn test_shared_vm_does_not_count_as_deployed() {
        let fixture = Fixture::new();
        let plane = FakePlane::healthy().with_chain("zoo", "Lux EVM", "2old");

        let outcome = fixture
            .deployer(&plane)
            .deploy(&fixture.request("bar"))
            .await
            .expect("deploy");

        assert_eq!(plane.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.chain().chain_name, "bar");
        assert_eq!(outcome.chain().blockchain_id, "2new0");
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let fixture = Fixture::new();
        let mut plane = FakePlane::healthy();
        plane.connect_error = Some(ControlError::Unreachable("connection refused".into()));

        let err = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::ControlPlaneUnreachable);
        assert_eq!(err.stage, DeployStage::ConnectedToControlPlane);
        assert!(!err.recoverable);
        assert!(err.to_string().contains("luxnet network start"));
    }

    #[tokio::test]
    async fn test_not_bootstrapped_is_distinct_from_unhealthy() {
        let fixture = Fixture::new();

        let mut plane = FakePlane::healthy();
        plane.wait_error = Some(ControlError::NotBootstrapped);
        let err = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NetworkNotRunning);
        assert_eq!(err.stage, DeployStage::NetworkHealthVerified);
        assert!(err.cause.contains("network is not running"));

        let mut plane = FakePlane::healthy();
        plane.wait_error = Some(ControlError::DeadlineExceeded);
        let err = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NetworkUnhealthy);
    }

    #[tokio::test]
    async fn test_preflight_rejection_never_installs() {
        let fixture = Fixture::new();
        let plane = FakePlane::healthy();

        let mut request = fixture.request("zoo");
        request.vm_binary = fixture.temp_dir.path().join("missing-evm");

        let err = fixture.deployer(&plane).deploy(&request).await.unwrap_err();

        assert_eq!(err.kind, FailureKind::Preflight);
        assert_eq!(err.stage, DeployStage::VmBinaryValidated);
        assert!(err.recoverable);
        assert!(err.network_still_healthy);
        assert!(err.cause.contains("not found"));
        let message = err.to_string();
        assert!(message.contains("failed during VM binary validation"), "{message}");
        assert!(message.contains("Rebuild the VM binary"));
        assert!(!fixture.plugin_installed());
        assert_eq!(plane.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_creation_deadline_with_healthy_network() {
        let fixture = Fixture::new();
        let mut plane = FakePlane::healthy();
        plane.create = Create::Fail(ControlError::DeadlineExceeded);

        let err = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::ChainCreation);
        assert_eq!(err.stage, DeployStage::ChainCreationRequested);
        assert!(!err.recoverable);
        assert!(err.network_still_healthy);
        assert!(err.cause.contains("timed out"));
        assert!(err.to_string().contains("zoo"));
        assert!(!fixture.plugin_installed());
    }

    #[tokio::test]
    async fn test_creation_failure_with_crashed_network() {
        let fixture = Fixture::new();
        let mut plane = FakePlane::healthy();
        plane.create = Create::Fail(ControlError::Rpc("node1 exited".into()));
        plane.health_error = Some(ControlError::Unreachable("connection refused".into()));

        let err = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::ChainCreation);
        assert!(!err.network_still_healthy);
        assert!(!err.recoverable);
        assert!(err.cause.contains("node1 exited"));
        assert!(err.suggestion.contains("luxnet network stop --profile custom"));
        assert!(err.to_string().contains("network may have crashed"));
        assert!(!fixture.plugin_installed());
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_creation_error() {
        let fixture = Fixture::new();
        let installer = StuckInstaller(fixture.installer.clone());
        let mut plane = FakePlane::healthy();
        plane.create = Create::Fail(ControlError::DeadlineExceeded);
        plane.health_error = Some(ControlError::DeadlineExceeded);

        let err = Fixture::deployer_with(&plane, &installer)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::ChainCreation);
        assert_eq!(err.stage, DeployStage::ChainCreationRequested);
        assert!(!err.network_still_healthy);
        assert!(err.cause.contains("timed out"), "{}", err.cause);
        assert!(!err.cause.contains("read-only"));
        // The plugin could not be removed and stays behind.
        assert!(fixture.plugin_installed());
    }

    #[tokio::test]
    async fn test_creation_hang_hits_limit() {
        let fixture = Fixture::new();
        let mut plane = FakePlane::healthy();
        plane.create = Create::Hang;

        let err = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::ChainCreation);
        assert!(err.cause.contains("limit: 200ms"), "{}", err.cause);
    }

    #[tokio::test]
    async fn test_chain_health_timeout_builds_diagnostic() {
        let fixture = Fixture::new();
        let mut plane = FakePlane::healthy();
        plane.chains_become_healthy = false;

        let err = fixture
            .deployer(&plane)
            .deploy(&fixture.request("zoo"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, FailureKind::ChainHealth);
        assert_eq!(err.stage, DeployStage::ChainHealthConfirmed);
        assert!(err.network_still_healthy);
        assert!(err.to_string().contains("failed during chain health check"));
        assert!(err.cause.contains("Chain 'zoo' failed to become healthy"));
        assert!(err.cause.contains("Custom chains are not healthy"));
        assert!(err.cause.contains("tail -f /runs/custom/current/node1/logs/*.log"));
        assert!(err.cause.contains("tail -f /runs/server/custom/1/*.log"));
        // The chain exists; its plugin must stay.
        assert!(fixture.plugin_installed());
    }

    #[test]
    fn test_error_display() {
        let err = DeploymentError::recoverable(
            "zoo",
            DeployStage::VmBinaryValidated,
            FailureKind::Preflight,
            "VM binary not found: /x",
            "Rebuild the VM binary or check the VM path",
        );
        assert_eq!(
            err.to_string(),
            "chain 'zoo' deployment failed during VM binary validation (network still running): VM binary not found: /x\n\nTo fix: Rebuild the VM binary or check the VM path"
        );

        let err = DeploymentError::fatal(
            "zoo",
            DeployStage::ChainCreationRequested,
            FailureKind::ChainCreation,
            "blockchain creation failed",
            false,
            "",
        );
        assert_eq!(
            err.to_string(),
            "chain 'zoo' deployment failed during chain creation (network may have crashed): blockchain creation failed"
        );
    }

    #[test]
    fn test_request_from_chain_dir() {
        let temp_dir = TempDir::new("luxnet-deployer").expect("Failed to create temp dir");
        let ctx = AppContext::new(temp_dir.path());
        let dir = ctx.chain_dir("zoo");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(GENESIS_FILENAME), b"{}").unwrap();
        std::fs::write(dir.join(CHAIN_CONFIG_FILENAME), b"{}").unwrap();

        let request = DeploymentRequest::from_chain_dir(&ctx, "zoo", "Lux EVM", "/bin/evm").unwrap();

        assert_eq!(request.genesis, b"{}");
        assert_eq!(request.chain_config_path, Some(dir.join(CHAIN_CONFIG_FILENAME)));
        assert_eq!(request.per_node_config_path, None);
        let spec = request.chain_spec();
        assert_eq!(spec.blockchain_alias, "zoo");
        assert!(spec.per_node_chain_config.is_none());
    }
}
