//! Lifecycle of the network runner control process.
//!
//! Each profile runs at most one control process. Its metadata is kept in a
//! [`ProcessRecord`] at [`AppContext::process_record_path`]; liveness is
//! decided by the OS process table, never by the record alone.

use std::{
    future::Future,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

use crate::{
    AppContext, NetworkProfile,
    context::{NETRUNNER_BINARY, SERVER_LOG_FILENAME},
    control::{ControlClient, ControlConnector, with_deadline},
    fs::FsHandler,
    rpc,
};

/// Environment variable telling the runner which profile it serves.
pub const NETWORK_TYPE_ENV: &str = "LUX_NETWORK_TYPE";

/// Deadline of the graceful stop request.
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Metadata of a running control process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    #[serde(rename = "serverLogFileName")]
    pub log_file: PathBuf,
    #[serde(rename = "networkType")]
    pub network: NetworkProfile,
    #[serde(rename = "grpcPort")]
    pub control_port: u16,
    #[serde(rename = "gatewayPort")]
    pub gateway_port: u16,
}

impl ProcessRecord {
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        FsHandler::write_json(path, self)
            .with_context(|| format!("Failed to write process record {}", path.display()))
    }

    /// Load a record, returning `None` when the file does not exist.
    pub fn load_from_file(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        FsHandler::read_json(path).map(Some)
    }

    /// Directory holding the control process logs.
    pub fn log_dir(&self) -> Option<&Path> {
        self.log_file.parent()
    }
}

/// Access to the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Whether a process with this PID exists.
    fn is_alive(&self, pid: u32) -> bool;

    /// Send an interrupt (SIGINT) to the process.
    fn interrupt(&self, pid: u32) -> std::io::Result<()>;
}

/// [`ProcessTable`] backed by `kill(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessTable;

impl ProcessTable for OsProcessTable {
    fn is_alive(&self, pid: u32) -> bool {
        let Ok(pid) = libc::pid_t::try_from(pid) else {
            return false;
        };
        // SAFETY: signal 0 performs the existence and permission checks only.
        let ret = unsafe { libc::kill(pid, 0) };
        if ret == 0 {
            return true;
        }
        // The process exists but belongs to another user.
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    fn interrupt(&self, pid: u32) -> std::io::Result<()> {
        send_interrupt(pid)
    }
}

fn send_interrupt(pid: u32) -> std::io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill has no memory-safety preconditions.
    let ret = unsafe { libc::kill(pid, libc::SIGINT) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Result of [`ControlProcessManager::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning(ProcessRecord),
    Started(ProcessRecord),
}

impl StartOutcome {
    pub fn record(&self) -> &ProcessRecord {
        match self {
            StartOutcome::AlreadyRunning(record) | StartOutcome::Started(record) => record,
        }
    }
}

/// Starts, stops and detects the control process of each profile.
pub struct ControlProcessManager<C, T = OsProcessTable> {
    ctx: AppContext,
    connector: C,
    table: T,
}

impl<C: ControlConnector, T: ProcessTable> ControlProcessManager<C, T> {
    pub fn new(ctx: AppContext, connector: C, table: T) -> Self {
        Self {
            ctx,
            connector,
            table,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    pub fn record(&self, profile: NetworkProfile) -> Result<Option<ProcessRecord>> {
        ProcessRecord::load_from_file(&self.ctx.process_record_path(profile))
    }

    /// Whether a control process is alive for `profile`.
    ///
    /// A record whose PID is gone reports `false`.
    pub fn is_running(&self, profile: NetworkProfile) -> Result<bool> {
        Ok(self.live_record(profile)?.is_some())
    }

    fn live_record(&self, profile: NetworkProfile) -> Result<Option<ProcessRecord>> {
        let Some(record) = self.record(profile)? else {
            return Ok(None);
        };
        if self.table.is_alive(record.pid) {
            Ok(Some(record))
        } else {
            tracing::debug!(%profile, pid = record.pid, "Process record is stale");
            Ok(None)
        }
    }

    /// Directory with the logs of the profile's control process.
    pub fn backend_log_dir(&self, profile: NetworkProfile) -> Result<Option<PathBuf>> {
        Ok(self
            .record(profile)?
            .and_then(|r| r.log_dir().map(Path::to_path_buf)))
    }

    /// Locate the network runner binary.
    ///
    /// Order: the configured path, `<base>/bin/netrunner`, then `$PATH`.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        if let Some(path) = self.ctx.netrunner_path() {
            if !path.exists() {
                anyhow::bail!("Configured network runner binary not found: {}", path.display());
            }
            return Ok(path.to_path_buf());
        }

        let installed = self.ctx.bin_dir().join(NETRUNNER_BINARY);
        if installed.exists() {
            return Ok(installed);
        }

        which::which(NETRUNNER_BINARY).with_context(|| {
            format!(
                "Network runner binary not found. Install it to {} or set netrunner_path",
                installed.display()
            )
        })
    }

    fn prepare_launch(&self, profile: NetworkProfile) -> Result<(std::process::Command, PathBuf)> {
        let binary = self.resolve_binary()?;
        let ports = profile.ports();

        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%.3f").to_string();
        let log_dir = self.ctx.server_dir(profile).join(stamp);
        FsHandler::create_dir(&log_dir)?;
        let log_file = log_dir.join(SERVER_LOG_FILENAME);

        let stdout = std::fs::File::create(&log_file)
            .with_context(|| format!("Failed to create log file {}", log_file.display()))?;
        let stderr = stdout
            .try_clone()
            .context("Failed to clone log file handle")?;

        let snapshots_dir = self.ctx.snapshots_dir();
        FsHandler::create_dir(&snapshots_dir)?;

        let mut cmd = std::process::Command::new(&binary);
        cmd.arg("server")
            .arg("--port")
            .arg(format!(":{}", ports.control))
            .arg("--grpc-gateway-port")
            .arg(format!(":{}", ports.gateway))
            .arg("--log-dir")
            .arg(&log_dir)
            .arg("--snapshots-dir")
            .arg(&snapshots_dir)
            .env(NETWORK_TYPE_ENV, profile.canonical().to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        tracing::debug!(binary = %binary.display(), log_file = %log_file.display(), "Prepared control process launch");
        Ok((cmd, log_file))
    }

    fn make_record(&self, profile: NetworkProfile, pid: u32, log_file: PathBuf) -> ProcessRecord {
        let ports = profile.ports();
        ProcessRecord {
            pid,
            log_file,
            network: profile.canonical(),
            control_port: ports.control,
            gateway_port: ports.gateway,
        }
    }

    fn persist_record(&self, record: &ProcessRecord) -> Result<()> {
        let path = self.ctx.process_record_path(record.network);
        if let Err(e) = record.save_to_file(&path) {
            if let Err(kill_err) = self.table.interrupt(record.pid) {
                tracing::warn!(pid = record.pid, error = %kill_err, "Failed to interrupt control process");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Start the control process of `profile` in the background.
    ///
    /// Does nothing when one is already running.
    pub fn start(&self, profile: NetworkProfile) -> Result<StartOutcome> {
        if let Some(record) = self.live_record(profile)? {
            tracing::info!(%profile, pid = record.pid, "Control process already running");
            return Ok(StartOutcome::AlreadyRunning(record));
        }

        let (mut cmd, log_file) = self.prepare_launch(profile)?;

        // Own process group: terminal interrupts aimed at the caller must not
        // reach the detached runner.
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

        let child = cmd.spawn().context("Failed to launch control process")?;
        let record = self.make_record(profile, child.id(), log_file);
        self.persist_record(&record)?;

        tracing::info!(
            %profile,
            pid = record.pid,
            control_port = record.control_port,
            gateway_port = record.gateway_port,
            log_file = %record.log_file.display(),
            "Control process started"
        );
        Ok(StartOutcome::Started(record))
    }

    /// Start the control process and wait until it answers on the control channel.
    pub async fn start_and_wait(
        &self,
        profile: NetworkProfile,
        timeout: Duration,
    ) -> Result<StartOutcome> {
        let outcome = self.start(profile)?;
        let connector = &self.connector;
        rpc::wait_until_ready("network runner", timeout, move || async move {
            connector
                .connect(profile)
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        })
        .await?;
        Ok(outcome)
    }

    /// Stop the control process of `profile`.
    ///
    /// The runner is first asked to stop its network, then interrupted. A
    /// missing record or a vanished process is an error; the record is only
    /// removed once the process was signalled.
    pub async fn stop(&self, profile: NetworkProfile) -> Result<()> {
        match self.connector.connect(profile).await {
            Ok(client) => match with_deadline(STOP_TIMEOUT, client.stop()).await {
                Ok(()) => tracing::info!(%profile, "Network stopped"),
                Err(e) if e.is_not_bootstrapped() => {
                    tracing::debug!(%profile, "Network was not bootstrapped")
                }
                Err(e) => tracing::debug!(%profile, error = %e, "Graceful stop failed"),
            },
            Err(e) => tracing::debug!(%profile, error = %e, "Control channel unavailable"),
        }

        let path = self.ctx.process_record_path(profile);
        let record = ProcessRecord::load_from_file(&path)?.with_context(|| {
            format!("No control process record for profile {profile}; is the network running?")
        })?;

        if !self.table.is_alive(record.pid) {
            anyhow::bail!(
                "Control process {} of profile {profile} not found. Remove {} if it is stale",
                record.pid,
                path.display()
            );
        }

        self.table
            .interrupt(record.pid)
            .with_context(|| format!("Failed to interrupt control process {}", record.pid))?;

        FsHandler::remove_file_if_exists(&path)?;
        tracing::info!(%profile, pid = record.pid, "Control process stopped");
        Ok(())
    }

    /// Run the control process of `profile` in the foreground until it exits
    /// or this process receives SIGINT/SIGTERM.
    pub async fn serve(&self, profile: NetworkProfile) -> Result<ExitStatus> {
        if let Some(record) = self.live_record(profile)? {
            anyhow::bail!(
                "Control process {} is already running for profile {profile}",
                record.pid
            );
        }

        let (mut cmd, log_file) = self.prepare_launch(profile)?;
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        let mut child = tokio::process::Command::from(cmd)
            .spawn()
            .context("Failed to launch control process")?;
        let pid = child.id().context("Control process exited before reporting its PID")?;

        let record = self.make_record(profile, pid, log_file);
        self.persist_record(&record)?;
        tracing::info!(%profile, pid, "Control process running in foreground");

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (exit_tx, exit_rx) = oneshot::channel();

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = cancel_rx.changed() => {
                    if let Err(e) = send_interrupt(pid) {
                        tracing::warn!(pid, error = %e, "Failed to interrupt control process");
                    }
                    child.wait().await
                }
            };
            let _ = exit_tx.send(status);
        });

        let result = watch_server_process(shutdown_signal(), cancel_tx, exit_rx).await;

        FsHandler::remove_file_if_exists(&self.ctx.process_record_path(profile))?;
        result
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for SIGINT");
                std::future::pending::<()>().await;
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for SIGINT");
                term.recv().await;
            }
        }
        _ = term.recv() => {}
    }
}

/// Wait for either `shutdown` or an early exit of the server.
///
/// On either event `cancel` is set, then the server's exit status is awaited,
/// so the caller never returns before the server is gone.
pub async fn watch_server_process<S>(
    shutdown: S,
    cancel: watch::Sender<bool>,
    mut exit: oneshot::Receiver<std::io::Result<ExitStatus>>,
) -> Result<ExitStatus>
where
    S: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => {
            tracing::info!("Shutdown requested, stopping control process");
        }
        result = &mut exit => {
            cancel.send_replace(true);
            return exit_status(result);
        }
    }

    cancel.send_replace(true);
    exit_status(exit.await)
}

fn exit_status(
    result: Result<std::io::Result<ExitStatus>, oneshot::error::RecvError>,
) -> Result<ExitStatus> {
    let status = result
        .context("Control process supervisor dropped without reporting an exit status")?
        .context("Failed to wait for control process")?;
    if status.success() {
        tracing::info!(%status, "Control process exited");
    } else {
        tracing::warn!(%status, "Control process exited with failure");
    }
    Ok(status)
}
