//! Health reporting for a running cluster.

use std::{fmt, path::PathBuf, time::Duration};

use comfy_table::{Table, presets::UTF8_FULL};

use crate::control::{ClusterInfo, ControlClient, ControlError, with_deadline};

/// Health snapshot of the cluster.
pub struct HealthReport {
    /// Cluster state, when the runner answered.
    pub cluster: Option<ClusterInfo>,
    /// Why the runner did not answer.
    pub error: Option<ControlError>,
}

impl HealthReport {
    /// Ask the runner for its health, bounded by `timeout`.
    pub async fn probe<C: ControlClient>(client: &C, timeout: Duration) -> Self {
        match with_deadline(timeout, client.health()).await {
            Ok(cluster) => Self {
                cluster: Some(cluster),
                error: None,
            },
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed");
                Self {
                    cluster: None,
                    error: Some(e),
                }
            }
        }
    }

    /// Whether the primary network answered and reported healthy.
    pub fn network_healthy(&self) -> bool {
        self.cluster.as_ref().is_some_and(|c| c.healthy)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.cluster, &self.error) {
            (Some(cluster), _) => write!(f, "{}", ClusterSummary(cluster)),
            (None, Some(e)) => writeln!(f, "  {} Health check failed: {e}", status_icon(false)),
            (None, None) => writeln!(f, "  {} No health information", status_icon(false)),
        }
    }
}

/// Human-readable summary of a [`ClusterInfo`].
pub struct ClusterSummary<'a>(pub &'a ClusterInfo);

impl fmt::Display for ClusterSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0;
        if info.healthy {
            writeln!(f, "  {} Network is healthy", status_icon(true))?;
        } else {
            writeln!(f, "  {} Network is not healthy", status_icon(false))?;
        }

        if !info.custom_chains.is_empty() {
            if info.custom_chains_healthy {
                writeln!(f, "  {} Custom chains are healthy", status_icon(true))?;
            } else {
                writeln!(f, "  {} Custom chains are not healthy", status_icon(false))?;
            }
        }

        for (id, chain) in &info.custom_chains {
            writeln!(f, "    Chain {id} (VM: {}): {}", chain.vm_id, chain.chain_name)?;
        }

        Ok(())
    }
}

/// RPC endpoint of `blockchain_id` on the node serving `node_uri`.
pub fn chain_rpc_endpoint(node_uri: &str, blockchain_id: &str) -> String {
    format!("{}/ext/bc/{blockchain_id}/rpc", node_uri.trim_end_matches('/'))
}

/// Table of node URIs and the RPC endpoints of every custom chain.
pub fn endpoints_table(info: &ClusterInfo) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Node", "URI", "Chain", "RPC endpoint"]);

    for node in info.nodes() {
        if info.custom_chains.is_empty() {
            table.add_row(vec![node.name.as_str(), node.uri.as_str(), "", ""]);
            continue;
        }
        for (id, chain) in &info.custom_chains {
            table.add_row(vec![
                node.name.clone(),
                node.uri.clone(),
                chain.chain_name.clone(),
                chain_rpc_endpoint(&node.uri, id),
            ]);
        }
    }

    table
}

/// Diagnostic produced when a new chain does not become healthy in time.
pub struct ChainHealthDiagnostic {
    pub chain_name: String,
    pub timeout: Duration,
    /// Error of the wait call itself.
    pub cause: String,
    pub report: HealthReport,
    /// Root data directory of the cluster nodes.
    pub root_data_dir: Option<PathBuf>,
    /// Log directory of the control process.
    pub backend_log_dir: Option<PathBuf>,
}

impl fmt::Display for ChainHealthDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ERROR: Chain '{}' failed to become healthy within {:?}",
            self.chain_name, self.timeout
        )?;
        writeln!(f, "Cause: {}", self.cause)?;
        writeln!(f)?;
        writeln!(f, "Network health:")?;
        write!(f, "{}", self.report)?;
        writeln!(f)?;
        writeln!(f, "Common causes:")?;
        writeln!(f, "  - The VM binary crashed on startup or is built for another platform")?;
        writeln!(f, "  - The genesis is invalid for this VM")?;
        writeln!(f, "  - The chain config contains options the VM does not understand")?;
        writeln!(f)?;
        writeln!(f, "To debug:")?;
        if let Some(root) = &self.root_data_dir {
            writeln!(f, "  tail -f {}/node1/logs/*.log", root.display())?;
        }
        if let Some(logs) = &self.backend_log_dir {
            writeln!(f, "  tail -f {}/*.log", logs.display())?;
        }
        write!(f, "  luxnet network status")
    }
}

fn status_icon(ok: bool) -> &'static str {
    if ok { "[ok]" } else { "[!!]" }
}
