//! Version checks driven by command/expected-value tables
//!
//! A [`TestMap`] pairs comma separated commands with comma separated expected
//! values. Every pair is checked on every node at once: `kubectl` and `helm`
//! commands run on the host against the cluster kubeconfig, the rest run on
//! the node itself.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::checks::{check_component_on_host, check_component_on_node};
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::fanout::FanOut;
use crate::kubectl::Kubectl;
use crate::poll::Poller;
use crate::testcase::{TestCaseSpec, TestContext};

/// One row of a version table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMap {
    pub cmd: String,
    pub expected_value: String,
    #[serde(default)]
    pub expected_value_upgrade: String,
    #[serde(default)]
    pub description: String,
}

impl TestMap {
    pub fn new(cmd: impl Into<String>, expected_value: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            expected_value: expected_value.into(),
            ..Default::default()
        }
    }

    pub fn with_upgrade_value(mut self, value: impl Into<String>) -> Self {
        self.expected_value_upgrade = value.into();
        self
    }
}

/// Where a command executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Host,
    Node,
}

impl Location {
    /// Cluster clients run where the kubeconfig lives
    pub fn for_command(cmd: &str) -> Self {
        if cmd.contains("kubectl") || cmd.contains("helm") {
            Location::Host
        } else {
            Location::Node
        }
    }
}

/// Pair up the comma separated commands and expected values of `map`
pub fn split_pairs(map: &TestMap) -> Result<Vec<(String, String)>> {
    let cmds: Vec<&str> = map.cmd.split(',').collect();
    let expected: Vec<&str> = map.expected_value.split(',').collect();
    if cmds.len() != expected.len() {
        return Err(Error::invalid("mismatched length commands x expected values"));
    }
    Ok(cmds
        .into_iter()
        .zip(expected)
        .map(|(c, e)| (c.to_string(), e.to_string()))
        .collect())
}

/// Put `flag` after the first `;` separated command and re-join the rest
/// with commas, so `kubectl get nodes;-o wide` becomes
/// `kubectl get nodes --kubeconfig=x -o wide`
pub fn join_commands(cmd: &str, flag: &str) -> String {
    let mut parts = cmd.split(';');
    let mut joined = format!("{}{}", parts.next().unwrap_or_default(), flag);
    let rest: Vec<&str> = parts.collect();
    if !rest.is_empty() {
        joined.push(' ');
        joined.push_str(&rest.join(","));
    }
    joined
}

/// Swap every row's expected value for its post-upgrade value
pub fn promote_upgrade_expectations(maps: &mut [TestMap]) {
    for map in maps {
        map.expected_value = std::mem::take(&mut map.expected_value_upgrade);
    }
}

#[derive(Clone)]
struct VersionCheck<R> {
    node: R,
    cmd: String,
    expected: String,
}

/// Check every row on every node concurrently; the first failure wins
#[instrument(skip_all, fields(nodes = nodes.len(), rows = maps.len()))]
pub async fn check_version<R>(kubectl: &Kubectl, poller: Poller, nodes: &[R], maps: &[TestMap]) -> Result<()>
where
    R: CommandRunner + Clone + 'static,
{
    let mut checks = Vec::new();
    for map in maps {
        for (cmd, expected) in split_pairs(map)? {
            for node in nodes {
                checks.push(VersionCheck {
                    node: node.clone(),
                    cmd: cmd.clone(),
                    expected: expected.clone(),
                });
            }
        }
    }

    let flag = kubectl.kubeconfig_flag();
    FanOut::new()
        .run(&checks, move |check: VersionCheck<R>| {
            let flag = flag.clone();
            async move { run_check(&check, &flag, &poller).await }
        })
        .await
}

async fn run_check<R: CommandRunner>(check: &VersionCheck<R>, flag: &str, poller: &Poller) -> Result<()> {
    let location = Location::for_command(&check.cmd);
    if check.expected.is_empty() {
        return Err(Error::invalid(format!(
            "expected value should be sent to {:?}",
            location
        )));
    }

    info!(
        node = check.node.name(),
        cmd = %check.cmd,
        expected = %check.expected,
        ?location,
        "Checking version"
    );
    match location {
        Location::Host => {
            let full = join_commands(&check.cmd, flag);
            check_component_on_host(poller, &full, &[check.expected.as_str()]).await?;
        }
        Location::Node => {
            check_component_on_node(poller, &check.node, &check.cmd, &check.expected).await?;
        }
    }
    Ok(())
}

/// A version table plus an optional test case to run once it passes
#[derive(Debug, Clone, Default)]
pub struct VersionTemplate {
    pub maps: Vec<TestMap>,
    pub test_case: Option<TestCaseSpec>,
}

impl VersionTemplate {
    pub async fn run<R>(&self, ctx: &TestContext<'_, R>) -> Result<()>
    where
        R: CommandRunner + Clone + 'static,
    {
        check_version(ctx.kubectl, ctx.poller, ctx.nodes, &self.maps).await?;
        if let Some(spec) = self.test_case {
            spec.kind.run(ctx, spec.deploy_workload).await?;
        }
        Ok(())
    }

    /// Check the pre-upgrade values, let `upgrade` run, then check the
    /// post-upgrade values
    pub async fn run_with_upgrade<R, F, Fut>(&mut self, ctx: &TestContext<'_, R>, upgrade: F) -> Result<()>
    where
        R: CommandRunner + Clone + 'static,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        self.run(ctx).await?;
        upgrade().await?;
        promote_upgrade_expectations(&mut self.maps);
        self.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pairs() {
        let map = TestMap::new("rke2 -v,kubectl version", "v1.31,v1.31");
        let pairs = split_pairs(&map).unwrap();
        assert_eq!(pairs[1], ("kubectl version".to_string(), "v1.31".to_string()));

        let bad = TestMap::new("a,b", "x");
        let err = split_pairs(&bad).unwrap_err();
        assert!(err.to_string().contains("mismatched length"));
    }

    #[test]
    fn test_join_commands() {
        assert_eq!(
            join_commands("kubectl get nodes", " --kubeconfig=/k"),
            "kubectl get nodes --kubeconfig=/k"
        );
        assert_eq!(
            join_commands("kubectl get pods -A;| grep coredns;| head -1", " --kubeconfig=/k"),
            "kubectl get pods -A --kubeconfig=/k | grep coredns,| head -1"
        );
    }

    #[test]
    fn test_location_for_command() {
        assert_eq!(Location::for_command("helm list -A"), Location::Host);
        assert_eq!(Location::for_command("kubectl get nodes"), Location::Host);
        assert_eq!(Location::for_command("rke2 --version"), Location::Node);
    }

    #[test]
    fn test_promote_upgrade_expectations() {
        let mut maps = vec![TestMap::new("rke2 -v", "v1.30").with_upgrade_value("v1.31")];
        promote_upgrade_expectations(&mut maps);
        assert_eq!(maps[0].expected_value, "v1.31");
        assert!(maps[0].expected_value_upgrade.is_empty());
    }

    #[tokio::test]
    async fn test_check_version_rejects_mismatched_rows_before_running() {
        let kubectl = Kubectl::new("/tmp/kc");
        let nodes = vec![crate::exec::Host::default()];
        let maps = vec![TestMap::new("a,b", "x")];
        let poller = Poller::new(std::time::Duration::ZERO, std::time::Duration::ZERO);
        let err = check_version(&kubectl, poller, &nodes, &maps).await.unwrap_err();
        assert!(err.to_string().contains("mismatched length"));
    }
}
