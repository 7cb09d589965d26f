//! In-place RKE2 upgrades
//!
//! Two routes: re-running the install script on every node ("manual"), or
//! handing a `Plan` to the system-upgrade-controller (SUC).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::checks::check_component_on_host;
use crate::cluster::restart_cluster;
use crate::error::{Error, Result};
use crate::exec::{CommandRunner, NodeRole};
use crate::fanout::FanOut;
use crate::kubectl::Kubectl;
use crate::poll::Poller;
use crate::workload::Workloads;

pub const INSTALL_SCRIPT_URL: &str = "https://get.rke2.io";
pub const DEFAULT_CHANNEL: &str = "stable";

/// Placeholder in the SUC plan template
const PLAN_VERSION_PLACEHOLDER: &str = "$UPGRADEVERSION";

/// What the install script should install
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallType {
    Version(String),
    Commit(String),
    Channel(String),
}

impl Default for InstallType {
    fn default() -> Self {
        Self::Channel(DEFAULT_CHANNEL.to_string())
    }
}

impl InstallType {
    /// `INSTALL_RKE2_*=<value>` for the install script
    pub fn env_assignment(&self) -> String {
        match self {
            Self::Version(v) => format!("INSTALL_RKE2_VERSION={}", v),
            Self::Commit(c) => format!("INSTALL_RKE2_COMMIT={}", c),
            Self::Channel(c) => format!("INSTALL_RKE2_CHANNEL={}", c),
        }
    }
}

impl fmt::Display for InstallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.env_assignment())
    }
}

impl FromStr for InstallType {
    type Err = Error;

    /// `INSTALL_RKE2_VERSION=v1.31.1+rke2r1`, `INSTALL_RKE2_COMMIT=<sha>`,
    /// `INSTALL_RKE2_CHANNEL=latest`, or a bare channel name
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }

        let Some((key, value)) = s.split_once('=') else {
            return Ok(Self::Channel(s.to_string()));
        };
        if value.is_empty() {
            return Err(Error::invalid(format!("empty value in {}", s)));
        }

        match key {
            "INSTALL_RKE2_VERSION" => Ok(Self::Version(value.to_string())),
            "INSTALL_RKE2_COMMIT" => Ok(Self::Commit(value.to_string())),
            "INSTALL_RKE2_CHANNEL" => Ok(Self::Channel(value.to_string())),
            other => Err(Error::invalid(format!("invalid install type: {}", other))),
        }
    }
}

/// Target version for a SUC plan, e.g. `v1.31.1+rke2r1`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SucVersion(String);

impl SucVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SucVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with('v') && s.ends_with("rke2r1") {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::invalid(format!("invalid install format: {}", s)))
        }
    }
}

impl fmt::Display for SucVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Install script invocation for one node role
pub fn install_command(role: NodeRole, install: &InstallType) -> String {
    format!(
        "curl -sfL {} | {} INSTALL_RKE2_TYPE={} sh -",
        INSTALL_SCRIPT_URL,
        install.env_assignment(),
        role
    )
}

/// Reinstall and restart RKE2 on every node in parallel.
///
/// Each node sleeps `settle` after its restart so the next phase starts
/// from a quiet cluster.
#[instrument(skip(nodes), fields(count = nodes.len()))]
pub async fn upgrade_nodes<R>(
    nodes: &[R],
    role: NodeRole,
    install: &InstallType,
    settle: Duration,
) -> Result<()>
where
    R: CommandRunner + Clone + 'static,
{
    let cmd = install_command(role, install);
    info!(%role, cmd = %cmd, "Upgrading nodes");

    FanOut::new()
        .run(nodes, move |node: R| {
            let cmd = cmd.clone();
            async move {
                node.run(&cmd).await?;
                info!(node = node.name(), "Restarting after upgrade");
                restart_cluster(std::slice::from_ref(&node)).await?;
                tokio::time::sleep(settle).await;
                Ok(())
            }
        })
        .await
}

/// Servers first, then agents
pub async fn upgrade_cluster_manually<R>(
    servers: &[R],
    agents: &[R],
    install: &InstallType,
    settle: Duration,
) -> Result<()>
where
    R: CommandRunner + Clone + 'static,
{
    if servers.is_empty() && agents.is_empty() {
        return Err(Error::invalid("no nodes found to upgrade"));
    }
    upgrade_nodes(servers, NodeRole::Server, install, settle).await?;
    upgrade_nodes(agents, NodeRole::Agent, install, settle).await
}

/// Fill the version into a SUC plan template
pub fn render_upgrade_plan(template: &str, version: &SucVersion) -> String {
    template.replace(PLAN_VERSION_PLACEHOLDER, version.as_str())
}

/// Render `upgrade-plan.yaml` in `dir` into `plan.yaml` next to it
pub async fn write_upgrade_plan(dir: &Path, version: &SucVersion) -> Result<PathBuf> {
    let template = tokio::fs::read_to_string(dir.join("upgrade-plan.yaml")).await?;
    let path = dir.join("plan.yaml");
    tokio::fs::write(&path, render_upgrade_plan(&template, version)).await?;
    Ok(path)
}

/// Deploy SUC, wait for its controller, then hand it the upgrade plan
#[instrument(skip(workloads, kubectl, poller))]
pub async fn upgrade_cluster_suc(
    workloads: &Workloads,
    kubectl: &Kubectl,
    poller: &Poller,
    version: &SucVersion,
) -> Result<()> {
    workloads.create("suc.yaml").await?;
    check_component_on_host(
        poller,
        &kubectl.command("get pods -n system-upgrade"),
        &["system-upgrade-controller", "Running"],
    )
    .await?;

    write_upgrade_plan(workloads.dir(), version).await?;
    workloads.create("plan.yaml").await?;
    info!(%version, "Upgrade plan applied");
    Ok(())
}
