use std::time::Duration;

use anyhow::{bail, Context, Result};

use rke2_testkit::{
    checks::{wait_nodes_ready, wait_pods_healthy},
    cluster::{fetch_kubeconfig, node_handles, TestConfig},
    config::Config,
    exec::{CommandRunner, NodeHandle, NodeRole},
    logging,
    poll::Poller,
    secrets::{RotationFlow, SecretsEncryption},
    suite::{after_suite, Suite},
    testcase::{parse_test_cases, TestContext},
    upgrade::{upgrade_cluster_manually, InstallType},
    workload::Workloads,
};

/// Pause after each node restarts during a manual upgrade
const UPGRADE_SETTLE: Duration = Duration::from_secs(20);

/// Address the host reaches the lead server's apiserver on
async fn lead_address(lead: &NodeHandle) -> Result<String> {
    match lead {
        NodeHandle::Vagrant(vm) => Ok(vm.external_ip().await?),
        other => other
            .address()
            .map(str::to_string)
            .with_context(|| format!("no address known for {}", other.name())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    if config.ci {
        logging::init_json();
    } else {
        logging::init();
    }
    tracing::info!("Starting RKE2 test run");

    let test_cases = parse_test_cases(
        config.test_cases.as_deref().unwrap_or_default(),
        config.deploy_workload,
    )?;
    let rotation = config
        .rotation
        .as_deref()
        .map(str::parse::<RotationFlow>)
        .transpose()
        .context("invalid E2E_ROTATION")?;
    let install = config
        .install_type
        .as_deref()
        .map(str::parse::<InstallType>)
        .transpose()?;

    let servers = node_handles(&config, &config.server_list(), NodeRole::Server)?;
    let agents = node_handles(&config, &config.agent_list(), NodeRole::Agent)?;
    if servers.is_empty() {
        bail!("E2E_SERVERS must name at least one server");
    }

    let mut cluster = TestConfig::new().await?.with_nodes(servers, agents);
    cluster.hardened = config.hardened;
    let kubeconfig = match &config.kubeconfig {
        Some(path) => path.clone(),
        None => {
            let lead = &cluster.servers[0];
            let host = lead_address(lead).await?;
            fetch_kubeconfig(lead, &host, None, &cluster.test_dir).await?
        }
    };
    cluster = cluster.with_kubeconfig(kubeconfig);
    tracing::info!("{}", cluster.status());

    let kubectl = cluster.kubectl()?.with_timeout(config.command_timeout());
    let workloads = Workloads::new(&config.resource_dir, kubectl.clone());
    let nodes = cluster.all_nodes();
    let node_count = cluster.node_count();
    let ctx = TestContext::new(&kubectl, &workloads, &nodes);

    let node_poller = Poller::nodes_from(&config);
    let pod_poller = Poller::pods_from(&config);
    let status_poller = Poller::status_from(&config);

    let mut suite = Suite::new(config.ci);
    let kubectl_ref = &kubectl;

    suite
        .spec("Checks node and pod status", move || async move {
            wait_nodes_ready(kubectl_ref, &node_poller, node_count, &[]).await?;
            wait_pods_healthy(kubectl_ref, &pod_poller).await?;
            Ok(())
        })
        .await;

    for spec in &test_cases {
        let ctx = &ctx;
        suite
            .spec(&spec.kind.to_string(), move || async move {
                spec.kind.run(ctx, spec.deploy_workload).await
            })
            .await;
    }

    if let Some(flow) = rotation {
        let servers = &cluster.servers;
        suite
            .spec(&format!("Secrets encryption {}", flow), move || async move {
                SecretsEncryption::new(servers)
                    .with_poller(status_poller)
                    .run_flow(flow)
                    .await?;
                Ok(())
            })
            .await;
    }

    if let Some(install) = &install {
        let (servers, agents) = (&cluster.servers, &cluster.agents);
        suite
            .spec(&format!("Manual upgrade to {}", install), move || async move {
                upgrade_cluster_manually(servers, agents, install, UPGRADE_SETTLE).await?;
                wait_nodes_ready(kubectl_ref, &node_poller, node_count, &[]).await?;
                wait_pods_healthy(kubectl_ref, &pod_poller).await?;
                Ok(())
            })
            .await;
    }

    let state = suite.state();
    after_suite(state, &config, &mut cluster).await?;

    if state.failed() {
        std::process::exit(1);
    }
    Ok(())
}
