//! Post-mortem log collection
//!
//! Nodes are queried concurrently and reported in input order. A node that
//! fails to answer gets its error written into the dump in place of its logs.

use std::fmt::Write as _;

use futures::future::join_all;

use super::service::service_logs;
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, NodeOs};

const COMPONENT_LOGS: [&str; 2] = [
    "/var/lib/rancher/rke2/agent/containerd/containerd.log",
    "/var/lib/rancher/rke2/agent/logs/kubelet.log",
];

fn append(logs: &mut String, what: &str, node: &str, result: Result<String>) {
    // writing to a String cannot fail
    let _ = match result {
        Ok(out) => writeln!(logs, "** {} for node {} ***\n{}", what, node, out),
        Err(e) => writeln!(logs, "** failed to read {} for node {} ***\n{}", what, node, e),
    };
}

/// Tail of every pod log file on each node
pub async fn dump_pod_logs<R: CommandRunner>(nodes: &[R], lines: usize) -> String {
    let cmd = format!("tail -n {} /var/log/pods/*/*/*", lines);
    let results = join_all(nodes.iter().map(|node| node.run(&cmd))).await;
    let mut logs = String::new();
    for (node, result) in nodes.iter().zip(results) {
        append(&mut logs, "pod logs", node.name(), result);
    }
    logs
}

/// Tail of containerd and kubelet logs on each node
pub async fn dump_component_logs<R: CommandRunner>(nodes: &[R], lines: usize) -> String {
    let cmd = format!("tail -n {} {}", lines, COMPONENT_LOGS.join(" "));
    let results = join_all(nodes.iter().map(|node| node.run(&cmd))).await;
    let mut logs = String::new();
    for (node, result) in nodes.iter().zip(results) {
        append(&mut logs, "component logs", node.name(), result);
    }
    logs
}

/// Tail of the RKE2 unit journal on each node
pub async fn dump_service_logs<R: CommandRunner>(nodes: &[R], lines: usize) -> String {
    let results = join_all(nodes.iter().map(|node| service_logs(node, lines))).await;
    let mut logs = String::new();
    for (node, result) in nodes.iter().zip(results) {
        append(&mut logs, "journald log", node.name(), result);
    }
    logs
}

/// Journal and component logs of the node `err` happened on, if it names one
pub async fn node_journal<R: CommandRunner>(err: &Error, nodes: &[R], os: NodeOs) -> Option<String> {
    let name = err.node_name()?;
    let node = nodes.iter().find(|n| n.name() == name)?;

    let mut out = String::from("\nNode Journal Logs:\n");
    out.push_str(&node.run("journalctl -u rke2* --no-pager").await.unwrap_or_else(|e| e.to_string()));

    if os == NodeOs::Linux {
        for path in COMPONENT_LOGS {
            let log = node
                .run(&format!("cat {}", path))
                .await
                .unwrap_or_else(|e| e.to_string());
            let _ = write!(out, "\n{}:\n{}\n", path, log);
        }
    }
    Some(out)
}
