//! Tests for version table checks across nodes
//!
//! Node-side rows answer from a fake node whose installed version can be
//! bumped mid-test. Host-side rows go through `bash`, with `echo` standing
//! in for the cluster client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rke2_testkit::exec::CommandRunner;
use rke2_testkit::kubectl::Kubectl;
use rke2_testkit::poll::Poller;
use rke2_testkit::testcase::TestContext;
use rke2_testkit::version::{check_version, TestMap, VersionTemplate};
use rke2_testkit::workload::Workloads;
use rke2_testkit::{Error, Result};

#[derive(Debug, Clone)]
struct FakeNode {
    name: String,
    installed: Arc<Mutex<String>>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl FakeNode {
    fn new(name: &str, installed: &Arc<Mutex<String>>) -> Self {
        Self {
            name: name.to_string(),
            installed: Arc::clone(installed),
            commands: Arc::default(),
        }
    }

    fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl CommandRunner for FakeNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cmd: &str) -> Result<String> {
        self.commands.lock().unwrap().push(cmd.to_string());
        let installed = self.installed.lock().unwrap().clone();
        match cmd {
            "rke2 --version" => Ok(format!("rke2 version {} (1a2b3c4d)\ngo version go1.22.6", installed)),
            "/var/lib/rancher/rke2/bin/containerd --version" => {
                Ok("containerd github.com/k3s-io/containerd v1.7.21-k3s2".to_string())
            }
            _ => Err(Error::CommandFailed {
                cmd: cmd.to_string(),
                status: Some(127),
                output: "command not found".to_string(),
            }),
        }
    }
}

fn fast_poller() -> Poller {
    Poller::new(Duration::from_millis(300), Duration::from_millis(10))
}

fn cluster(version: &str) -> (Vec<FakeNode>, Arc<Mutex<String>>) {
    let installed = Arc::new(Mutex::new(version.to_string()));
    let nodes = vec![
        FakeNode::new("server-0", &installed),
        FakeNode::new("agent-0", &installed),
    ];
    (nodes, installed)
}

#[tokio::test]
async fn test_node_rows_run_on_every_node() {
    let (nodes, _) = cluster("v1.31.1+rke2r1");
    let kubectl = Kubectl::new("/tmp/kubeconfig");
    let maps = vec![TestMap::new(
        "rke2 --version,/var/lib/rancher/rke2/bin/containerd --version",
        "v1.31.1+rke2r1,v1.7.21-k3s2",
    )];

    check_version(&kubectl, fast_poller(), &nodes, &maps)
        .await
        .unwrap();

    for node in &nodes {
        let mut commands = node.commands();
        commands.sort();
        assert_eq!(
            commands,
            ["/var/lib/rancher/rke2/bin/containerd --version", "rke2 --version"]
        );
    }
}

#[tokio::test]
async fn test_host_rows_get_the_kubeconfig_flag() {
    let (nodes, _) = cluster("v1.31.1+rke2r1");
    let kubectl = Kubectl::new("/tmp/kubeconfig");
    // echo stands in for the client; the flag lands in its output
    let maps = vec![TestMap::new(
        "echo kubectl Server Version: v1.31.1+rke2r1",
        "--kubeconfig=/tmp/kubeconfig",
    )];

    check_version(&kubectl, fast_poller(), &nodes, &maps)
        .await
        .unwrap();

    assert!(nodes.iter().all(|n| n.commands().is_empty()));
}

#[tokio::test]
async fn test_stale_node_version_times_out() {
    let (nodes, _) = cluster("v1.30.5+rke2r1");
    let kubectl = Kubectl::new("/tmp/kubeconfig");
    let maps = vec![TestMap::new("rke2 --version", "v1.31.1+rke2r1")];

    let err = check_version(&kubectl, fast_poller(), &nodes, &maps)
        .await
        .unwrap_err();
    match err {
        Error::Timeout { last, .. } => assert!(last.contains("v1.31.1+rke2r1"), "{last}"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_empty_expected_value_is_rejected() {
    let (nodes, _) = cluster("v1.31.1+rke2r1");
    let kubectl = Kubectl::new("/tmp/kubeconfig");
    let maps = vec![TestMap::new("rke2 --version", "")];

    let err = check_version(&kubectl, fast_poller(), &nodes, &maps)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Invalid(_)), "{err}");
    assert!(nodes.iter().all(|n| n.commands().is_empty()));
}

#[tokio::test]
async fn test_run_with_upgrade_rechecks_promoted_values() {
    let (nodes, installed) = cluster("v1.30.5+rke2r1");
    let kubectl = Kubectl::new("/tmp/kubeconfig");
    let workloads = Workloads::new("/tmp/resources", kubectl.clone());
    let ctx = TestContext::new(&kubectl, &workloads, &nodes).with_poller(fast_poller());

    let mut template = VersionTemplate {
        maps: vec![TestMap::new("rke2 --version", "v1.30.5+rke2r1").with_upgrade_value("v1.31.1+rke2r1")],
        test_case: None,
    };
    let target = Arc::clone(&installed);
    template
        .run_with_upgrade(&ctx, || async move {
            *target.lock().unwrap() = "v1.31.1+rke2r1".to_string();
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(template.maps[0].expected_value, "v1.31.1+rke2r1");
    for node in &nodes {
        assert_eq!(node.commands(), ["rke2 --version", "rke2 --version"]);
    }
}

#[tokio::test]
async fn test_run_with_upgrade_fails_when_upgrade_did_nothing() {
    let (nodes, _) = cluster("v1.30.5+rke2r1");
    let kubectl = Kubectl::new("/tmp/kubeconfig");
    let workloads = Workloads::new("/tmp/resources", kubectl.clone());
    let ctx = TestContext::new(&kubectl, &workloads, &nodes).with_poller(fast_poller());

    let mut template = VersionTemplate {
        maps: vec![TestMap::new("rke2 --version", "v1.30.5+rke2r1").with_upgrade_value("v1.31.1+rke2r1")],
        test_case: None,
    };
    let err = template
        .run_with_upgrade(&ctx, || async { Ok(()) })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err}");
}

#[tokio::test]
async fn test_failed_upgrade_skips_second_check() {
    let (nodes, _) = cluster("v1.30.5+rke2r1");
    let kubectl = Kubectl::new("/tmp/kubeconfig");
    let workloads = Workloads::new("/tmp/resources", kubectl.clone());
    let ctx = TestContext::new(&kubectl, &workloads, &nodes).with_poller(fast_poller());

    let mut template = VersionTemplate {
        maps: vec![TestMap::new("rke2 --version", "v1.30.5+rke2r1").with_upgrade_value("v1.31.1+rke2r1")],
        test_case: None,
    };
    let err = template
        .run_with_upgrade(&ctx, || async { Err(Error::assertion("install script failed")) })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("install script failed"));
    assert_eq!(template.maps[0].expected_value, "v1.30.5+rke2r1");
    assert!(nodes.iter().all(|n| n.commands().len() == 1));
}
