//! systemd control of the RKE2 service on each node

use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::exec::CommandRunner;

/// Tail of the RKE2 unit journal on `node`
pub async fn service_logs<R: CommandRunner>(node: &R, lines: usize) -> Result<String> {
    let cmd = format!("journalctl -u {} -n {}", node.role().service_name(), lines);
    let out = node.run(&cmd).await?;
    if out.contains("No entries") {
        return Err(crate::error::Error::assertion(format!(
            "no journal entries for {} on {}",
            node.role().service_name(),
            node.name()
        )));
    }
    Ok(out)
}

/// Restart RKE2 on each node in order, stopping at the first failure.
///
/// Nodes restart one at a time so followers pick up state from servers that
/// are already back.
#[instrument(skip(nodes), fields(count = nodes.len()))]
pub async fn restart_cluster<R: CommandRunner>(nodes: &[R]) -> Result<()> {
    for node in nodes {
        let cmd = format!("systemctl restart {}", node.role().service_name());
        info!(node = node.name(), "Restarting RKE2");
        if let Err(e) = node.run(&cmd).await {
            match service_logs(node, 10).await {
                Ok(journal) => warn!(node = node.name(), journal = %journal, "Restart failed"),
                Err(journal_err) => {
                    warn!(node = node.name(), error = %journal_err, "Restart failed, no journal")
                }
            }
            return Err(e);
        }
    }
    Ok(())
}

#[instrument(skip(nodes), fields(count = nodes.len()))]
pub async fn start_cluster<R: CommandRunner>(nodes: &[R]) -> Result<()> {
    for node in nodes {
        let cmd = format!("systemctl start {}", node.role().service_name());
        node.run(&cmd).await?;
    }
    Ok(())
}

#[instrument(skip(nodes), fields(count = nodes.len()))]
pub async fn stop_cluster<R: CommandRunner>(nodes: &[R]) -> Result<()> {
    for node in nodes {
        let cmd = format!("systemctl stop {}", node.role().service_name());
        node.run(&cmd).await?;
    }
    Ok(())
}
