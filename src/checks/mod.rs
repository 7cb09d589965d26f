//! Assertions over node and pod snapshots
//!
//! A check returns `Err` with a description of the offending record. Inside
//! a [`Poller`] that `Err` means "not yet", so the same functions serve both
//! one-shot assertions and convergence waits.

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::exec::{run_command, CommandRunner};
use crate::kubectl::{Kubectl, Node, Pod};
use crate::poll::Poller;

/// Outcome of a single check; the error text names the offending record
pub type CheckResult = std::result::Result<(), String>;

/// A check applied to every node
pub type NodeCheck<'a> = &'a (dyn Fn(&Node) -> CheckResult + Send + Sync);

/// A check applied to every pod
pub type PodCheck<'a> = &'a (dyn Fn(&Pod) -> CheckResult + Send + Sync);

const COMPLETED: &str = "Completed";
const RUNNING: &str = "Running";

pub fn node_ready(node: &Node) -> CheckResult {
    if node.is_ready() {
        Ok(())
    } else {
        Err(format!("node {} is {}, expected Ready", node.name, node.status))
    }
}

/// Node reports exactly `version`
pub fn node_version_is(version: &str) -> impl Fn(&Node) -> CheckResult + Send + Sync + '_ {
    move |node| {
        if node.version == version {
            Ok(())
        } else {
            Err(format!(
                "node {} runs {}, expected {}",
                node.name, node.version, version
            ))
        }
    }
}

/// Node version appears inside `reported`, e.g. the output of `rke2 --version`
/// or a SUC upgrade target
pub fn node_version_within(reported: &str) -> impl Fn(&Node) -> CheckResult + Send + Sync + '_ {
    move |node| {
        if reported.contains(&node.version) {
            Ok(())
        } else {
            Err(format!(
                "node {} runs {}, not found in {}",
                node.name, node.version, reported
            ))
        }
    }
}

/// Pod has as many ready containers as it has containers
pub fn pod_ready_balanced(pod: &Pod) -> CheckResult {
    let count = pod
        .ready_count()
        .map_err(|e| format!("pod {}: {}", pod.name, e))?;
    if count.is_balanced() {
        Ok(())
    } else {
        Err(format!(
            "pod {}/{} has {} containers ready",
            pod.namespace, pod.name, count
        ))
    }
}

/// Control plane pods may restart once while the cluster comes up, not more
pub fn pod_restarts_acceptable(pod: &Pod) -> CheckResult {
    let control_plane = pod.namespace.contains("kube-system")
        && (pod.name.contains("controller") || pod.name.contains("scheduler"));
    if !control_plane {
        return Ok(());
    }

    match pod.restart_count() {
        Some(0) | Some(1) => Ok(()),
        _ => Err(format!(
            "pod {}/{} restarted {} times",
            pod.namespace, pod.name, pod.restarts
        )),
    }
}

/// helm-install jobs complete, SUC apply jobs complete or error out, the
/// rest run
pub fn pod_status_expected(pod: &Pod) -> CheckResult {
    let ok = if pod.name.contains("helm-install") {
        pod.status == COMPLETED
    } else if pod.name.contains("apply") && pod.namespace.contains("system-upgrade") {
        pod.status == COMPLETED || pod.status.contains("Error")
    } else {
        pod.status == RUNNING
    };

    if ok {
        Ok(())
    } else {
        Err(format!(
            "pod {}/{} has unexpected status {}",
            pod.namespace, pod.name, pod.status
        ))
    }
}

/// Exactly `expected_count` nodes, each passing every check
pub fn all_nodes(nodes: &[Node], expected_count: usize, checks: &[NodeCheck<'_>]) -> CheckResult {
    if nodes.len() != expected_count {
        return Err(format!(
            "expected {} nodes, found {}",
            expected_count,
            nodes.len()
        ));
    }
    nodes
        .iter()
        .try_for_each(|node| checks.iter().try_for_each(|check| check(node)))
}

/// Every pod passes every check
pub fn all_pods(pods: &[Pod], checks: &[PodCheck<'_>]) -> CheckResult {
    if pods.is_empty() {
        return Err("no pods found".to_string());
    }
    pods.iter()
        .try_for_each(|pod| checks.iter().try_for_each(|check| check(pod)))
}

/// Poll until `expected_count` nodes are Ready and pass `extra` checks
#[instrument(skip(kubectl, poller, extra))]
pub async fn wait_nodes_ready(
    kubectl: &Kubectl,
    poller: &Poller,
    expected_count: usize,
    extra: &[NodeCheck<'_>],
) -> Result<Vec<Node>> {
    let nodes = poller
        .eventually("nodes ready", move || async move {
            let nodes = kubectl.nodes().await.map_err(|e| e.to_string())?;
            all_nodes(&nodes, expected_count, &[&node_ready])?;
            all_nodes(&nodes, expected_count, extra)?;
            Ok::<_, String>(nodes)
        })
        .await?;

    info!(count = nodes.len(), "All nodes ready");
    Ok(nodes)
}

/// Poll until every pod is in its expected status with all containers ready
#[instrument(skip(kubectl, poller))]
pub async fn wait_pods_healthy(kubectl: &Kubectl, poller: &Poller) -> Result<Vec<Pod>> {
    let pods = poller
        .eventually("pods healthy", move || async move {
            let pods = kubectl.pods().await.map_err(|e| e.to_string())?;
            all_pods(
                &pods,
                &[&pod_status_expected, &pod_restarts_acceptable, &ready_unless_done],
            )?;
            Ok::<_, String>(pods)
        })
        .await?;

    info!(count = pods.len(), "All pods healthy");
    Ok(pods)
}

/// Completed jobs report `0/1`, so readiness only applies to running pods
fn ready_unless_done(pod: &Pod) -> CheckResult {
    if pod.status == RUNNING {
        pod_ready_balanced(pod)
    } else {
        Ok(())
    }
}

/// Poll a host command until its output contains every `expected` substring
pub async fn check_component_on_host(poller: &Poller, cmd: &str, expected: &[&str]) -> Result<String> {
    poller
        .eventually(cmd, move || async move {
            debug!(cmd, "Executing on host");
            let out = run_command(cmd).await.map_err(|e| e.to_string())?;
            contains_all(&out, expected)?;
            Ok::<_, String>(out)
        })
        .await
}

/// Poll a node command until its output contains `expected`
pub async fn check_component_on_node<R: CommandRunner>(
    poller: &Poller,
    runner: &R,
    cmd: &str,
    expected: &str,
) -> Result<String> {
    let description = format!("{} on {}", cmd, runner.name());
    poller
        .eventually(&description, move || async move {
            debug!(node = runner.name(), cmd, "Executing on node");
            let out = runner.run(cmd).await.map_err(|e| e.to_string())?;
            contains_all(&out, &[expected])?;
            Ok::<_, String>(out)
        })
        .await
}

/// Poll until running pods labelled `k8s-app=<app>` in `namespace` mention
/// `expected`
pub async fn wait_pod_running(
    kubectl: &Kubectl,
    poller: &Poller,
    app: &str,
    namespace: &str,
    expected: &str,
) -> Result<String> {
    let args = format!(
        "get pods -n {} -o=name -l k8s-app={} --field-selector=status.phase=Running",
        namespace, app
    );
    let args = args.as_str();
    poller
        .eventually(args, move || async move {
            let out = kubectl.run(args).await.map_err(|e| e.to_string())?;
            contains_all(&out, &[expected])?;
            Ok::<_, String>(out)
        })
        .await
}

/// Poll until the first pod labelled `label` has an IP containing `ip`
pub async fn wait_pod_ip(kubectl: &Kubectl, poller: &Poller, label: &str, ip: &str) -> Result<()> {
    let description = format!("pod ip {} for {}", ip, label);
    poller
        .eventually(&description, move || async move {
            let pods = kubectl.pod_ips_by_label(label).await.map_err(|e| e.to_string())?;
            let first = pods
                .first()
                .and_then(|p| p.ipv4.clone())
                .unwrap_or_default();
            if first.contains(ip) {
                Ok(())
            } else {
                Err(format!("first pod for {} has ip {:?}", label, first))
            }
        })
        .await
}

fn contains_all(out: &str, expected: &[&str]) -> CheckResult {
    match expected.iter().find(|e| !out.contains(**e)) {
        Some(missing) => Err(format!("output {:?} does not contain {:?}", out.trim(), missing)),
        None => Ok(()),
    }
}
