//! Named test cases selectable from the command line or environment
//!
//! Names keep their historical `TestXxx` spelling so existing CI job
//! definitions keep working. An unknown name is rejected when the list is
//! parsed, before any cluster work starts.

use std::str::FromStr;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::{info, instrument};

use crate::checks::{check_component_on_host, check_component_on_node, wait_pod_running};
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::kubectl::{count_pods_containing, Kubectl};
use crate::poll::Poller;
use crate::workload::Workloads;

const RUNNING: &str = "Running";
const NSLOOKUP_ANSWER: &str = "kubernetes.default.svc.cluster.local";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum TestCaseKind {
    #[strum(to_string = "TestDaemonset")]
    Daemonset,
    #[strum(to_string = "TestIngress")]
    Ingress,
    #[strum(to_string = "TestDnsAccess")]
    DnsAccess,
    #[strum(to_string = "TestServiceClusterIp")]
    ServiceClusterIp,
    #[strum(to_string = "TestServiceNodePort")]
    ServiceNodePort,
    #[strum(to_string = "TestCoredns")]
    Coredns,
}

impl TestCaseKind {
    /// Resolve a case name; blank means "no case selected"
    pub fn parse_name(name: &str) -> Result<Option<Self>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        name.parse::<Self>()
            .map(Some)
            .map_err(|_| Error::UnknownTestCase(name.to_string()))
    }

    /// Every registered case name
    pub fn names() -> Vec<String> {
        Self::iter().map(|k| k.to_string()).collect()
    }

    /// Manifest this case deploys when asked to
    pub fn manifest(&self) -> &'static str {
        match self {
            TestCaseKind::Daemonset => "daemonset.yaml",
            TestCaseKind::Ingress => "ingress.yaml",
            TestCaseKind::DnsAccess | TestCaseKind::Coredns => "dnsutils.yaml",
            TestCaseKind::ServiceClusterIp => "clusterip.yaml",
            TestCaseKind::ServiceNodePort => "nodeport.yaml",
        }
    }

    /// Optionally deploy the workload, then validate it
    #[instrument(skip(ctx))]
    pub async fn run<R: CommandRunner>(&self, ctx: &TestContext<'_, R>, deploy_workload: bool) -> Result<()> {
        if deploy_workload {
            ctx.workloads.create(self.manifest()).await?;
        }

        match self {
            TestCaseKind::Daemonset => daemonset(ctx).await,
            TestCaseKind::Ingress => ingress(ctx).await,
            TestCaseKind::DnsAccess => dns_access(ctx).await,
            TestCaseKind::ServiceClusterIp => service_cluster_ip(ctx).await,
            TestCaseKind::ServiceNodePort => service_node_port(ctx).await,
            TestCaseKind::Coredns => coredns(ctx).await,
        }?;

        info!(case = %self, "Test case passed");
        Ok(())
    }
}

/// A case plus whether it deploys its own workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestCaseSpec {
    pub kind: TestCaseKind,
    pub deploy_workload: bool,
}

impl FromStr for TestCaseSpec {
    type Err = Error;

    /// `TestDaemonset` or `TestDaemonset,true`
    fn from_str(s: &str) -> Result<Self> {
        let (name, deploy) = match s.split_once(',') {
            Some((name, deploy)) => {
                let deploy = deploy.trim().parse::<bool>().map_err(|e| {
                    Error::invalid(format!("invalid deploy workload flag {:?}: {}", deploy, e))
                })?;
                (name, deploy)
            }
            None => (s, false),
        };

        let kind = TestCaseKind::parse_name(name)?
            .ok_or_else(|| Error::invalid("invalid test case format"))?;
        Ok(Self {
            kind,
            deploy_workload: deploy,
        })
    }
}

/// Comma separated case names, all sharing one deploy flag
pub fn parse_test_cases(list: &str, deploy_workload: bool) -> Result<Vec<TestCaseSpec>> {
    list.split(',')
        .filter_map(|name| TestCaseKind::parse_name(name).transpose())
        .map(|kind| {
            kind.map(|kind| TestCaseSpec {
                kind,
                deploy_workload,
            })
        })
        .collect()
}

/// What a test case needs to reach the cluster
pub struct TestContext<'a, R> {
    pub kubectl: &'a Kubectl,
    pub workloads: &'a Workloads,
    /// Nodes node-side checks run on
    pub nodes: &'a [R],
    pub poller: Poller,
}

impl<'a, R> TestContext<'a, R> {
    pub fn new(kubectl: &'a Kubectl, workloads: &'a Workloads, nodes: &'a [R]) -> Self {
        Self {
            kubectl,
            workloads,
            nodes,
            poller: Poller::component(),
        }
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }
}

impl<R> std::fmt::Debug for TestContext<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestContext")
            .field("kubeconfig", &self.kubectl.kubeconfig())
            .field("nodes", &self.nodes.len())
            .field("poller", &self.poller)
            .finish()
    }
}

/// One daemonset pod per schedulable node
async fn daemonset<R: CommandRunner>(ctx: &TestContext<'_, R>) -> Result<()> {
    let kubectl = ctx.kubectl;
    ctx.poller
        .eventually("daemonset pod on every node", move || async move {
            let nodes = kubectl.schedulable_nodes().await.map_err(|e| e.to_string())?;
            let pods = kubectl.pods().await.map_err(|e| e.to_string())?;
            let count = count_pods_containing("test-daemonset", &pods);
            if count == nodes.len() {
                Ok(())
            } else {
                Err(format!(
                    "daemonset pod count {} does not match node count {}",
                    count,
                    nodes.len()
                ))
            }
        })
        .await
}

/// Every node serves the ingress, and each ingress IP answers
async fn ingress<R: CommandRunner>(ctx: &TestContext<'_, R>) -> Result<()> {
    let kubectl = ctx.kubectl;
    wait_pod_running(kubectl, &ctx.poller, "nginx-app-ingress", "auto-ingress", "pod/").await?;

    let node_count = kubectl.nodes().await?.len();
    let ips = ctx
        .poller
        .eventually("ingress ip on every node", move || async move {
            let ips = kubectl.ingress_ips("auto-ingress").await.map_err(|e| e.to_string())?;
            if ips.len() == node_count {
                Ok(ips)
            } else {
                Err(format!("{} ingress ips for {} nodes", ips.len(), node_count))
            }
        })
        .await?;

    for ip in ips {
        let cmd = format!("curl -s --header host:foo1.bar.com http://{}/name.html", ip);
        check_component_on_host(&ctx.poller, &cmd, &["test-ingress"]).await?;
    }
    Ok(())
}

/// Cluster DNS resolves the API service from inside a pod
async fn dns_access<R: CommandRunner>(ctx: &TestContext<'_, R>) -> Result<()> {
    let kubectl = ctx.kubectl;
    check_component_on_host(
        &ctx.poller,
        &kubectl.command("get pods -n auto-dns dnsutils"),
        &[RUNNING],
    )
    .await?;
    check_component_on_host(&ctx.poller, &nslookup_command(kubectl), &[NSLOOKUP_ANSWER]).await?;
    Ok(())
}

/// The ClusterIP service answers from every node
async fn service_cluster_ip<R: CommandRunner>(ctx: &TestContext<'_, R>) -> Result<()> {
    let kubectl = ctx.kubectl;
    wait_pod_running(kubectl, &ctx.poller, "nginx-app-clusterip", "auto-clusterip", "pod/").await?;

    let (ip, port) = kubectl
        .cluster_ip_and_port("auto-clusterip", "nginx-clusterip-svc")
        .await?;
    let cmd = format!("curl -sL --insecure http://{}:{}/name.html", ip, port);
    for node in ctx.nodes {
        check_component_on_node(&ctx.poller, node, &cmd, "test-clusterip").await?;
    }
    Ok(())
}

/// The NodePort answers on every node's external address
async fn service_node_port<R: CommandRunner>(ctx: &TestContext<'_, R>) -> Result<()> {
    let kubectl = ctx.kubectl;
    let node_port = kubectl.node_port("auto-nodeport", "nginx-nodeport-svc").await?;
    let ips = kubectl.node_external_ips().await?;
    if ips.is_empty() {
        return Err(Error::assertion("no node external ips reported"));
    }

    wait_pod_running(kubectl, &ctx.poller, "nginx-app-nodeport", "auto-nodeport", "test-nodeport").await?;

    // any node can reach any other node's port, so pairing order is irrelevant
    for (node, ip) in ctx.nodes.iter().zip(&ips) {
        let cmd = format!("curl -sL --insecure http://{}:{}/name.html", ip, node_port);
        check_component_on_node(&ctx.poller, node, &cmd, "test-nodeport").await?;
    }
    Ok(())
}

/// DNS works and the rke2-coredns chart is installed
async fn coredns<R: CommandRunner>(ctx: &TestContext<'_, R>) -> Result<()> {
    let kubectl = ctx.kubectl;
    check_component_on_host(&ctx.poller, &nslookup_command(kubectl), &[NSLOOKUP_ANSWER]).await?;

    let helm = format!(
        "helm list --all-namespaces{} | grep rke2-coredns",
        kubectl.kubeconfig_flag()
    );
    check_component_on_host(&ctx.poller, &helm, &["rke2-coredns"]).await?;
    Ok(())
}

/// The kubeconfig flag has to precede `--`, everything after it goes to nslookup
fn nslookup_command(kubectl: &Kubectl) -> String {
    format!(
        "{} exec -n auto-dns -t dnsutils{} -- nslookup kubernetes.default",
        kubectl.program(),
        kubectl.kubeconfig_flag()
    )
}
