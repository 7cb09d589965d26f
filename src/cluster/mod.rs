//! Per-suite cluster handle
//!
//! One [`TestConfig`] is built before the first spec and passed by reference
//! to everything that needs the kubeconfig or the node list.

pub mod diagnostics;
pub mod kubeconfig;
mod service;

use std::path::PathBuf;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use diagnostics::{dump_component_logs, dump_pod_logs, dump_service_logs, node_journal};
pub use kubeconfig::{encode_base64, fetch_kubeconfig, rewrite_server};
pub use service::{restart_cluster, service_logs, start_cluster, stop_cluster};

use crate::config::{Config, NodeTarget};
use crate::error::{Error, Result};
use crate::exec::{
    run_command, CommandRunner, DockerNode, NodeHandle, NodeOs, NodeRole, SshTarget, VagrantNode,
};
use crate::kubectl::Kubectl;

/// Handles for the nodes named in `names`, reached the way `config` says.
///
/// Every handle carries the configured command timeout. Vagrant handles also
/// pass the `E2E_*` environment on to `vagrant`.
pub fn node_handles(config: &Config, names: &[String], role: NodeRole) -> Result<Vec<NodeHandle>> {
    let target = config.node_target()?;
    let timeout = config.command_timeout();
    let vagrant_env = match target {
        NodeTarget::Vagrant => Config::forwarded_env(),
        _ => Vec::new(),
    };

    Ok(names
        .iter()
        .map(|name| match target {
            NodeTarget::Ssh => {
                let mut ssh = SshTarget::new(name, &config.ssh_user, role)
                    .with_port(config.ssh_port)
                    .with_sudo(config.ssh_sudo)
                    .with_timeout(timeout);
                if let Some(key) = &config.ssh_key {
                    ssh = ssh.with_key(key);
                }
                NodeHandle::Ssh(ssh)
            }
            NodeTarget::Docker => NodeHandle::Docker(DockerNode::new(name).with_timeout(timeout)),
            NodeTarget::Vagrant => NodeHandle::Vagrant(
                VagrantNode::new(name, NodeOs::Linux)
                    .with_env(vagrant_env.clone())
                    .with_timeout(timeout),
            ),
        })
        .collect())
}

/// Everything a suite knows about the cluster under test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConfig {
    pub test_dir: PathBuf,
    pub kubeconfig: Option<PathBuf>,
    pub token: String,
    pub servers: Vec<NodeHandle>,
    pub agents: Vec<NodeHandle>,
    pub windows_agents: Vec<NodeHandle>,
    pub hardened: bool,
}

impl TestConfig {
    /// Create a scratch directory `rke2-test-<uuid>` with a `logs` subdir
    /// and a random 12 digit cluster token
    pub async fn new() -> Result<Self> {
        let test_dir = std::env::temp_dir().join(format!("rke2-test-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(test_dir.join("logs")).await?;

        let token = format!("{:012}", rand::thread_rng().gen_range(0..1_000_000_000_000u64));
        info!(dir = %test_dir.display(), "Test directory created");

        Ok(Self {
            test_dir,
            kubeconfig: None,
            token,
            servers: Vec::new(),
            agents: Vec::new(),
            windows_agents: Vec::new(),
            hardened: false,
        })
    }

    pub fn with_nodes(mut self, servers: Vec<NodeHandle>, agents: Vec<NodeHandle>) -> Self {
        self.servers = servers;
        self.agents = agents;
        self
    }

    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// kubectl bound to this cluster's kubeconfig
    pub fn kubectl(&self) -> Result<Kubectl> {
        self.kubeconfig
            .as_ref()
            .map(Kubectl::new)
            .ok_or_else(|| Error::invalid("kubeconfig has not been fetched yet"))
    }

    /// Linux servers followed by Linux agents
    pub fn all_nodes(&self) -> Vec<NodeHandle> {
        self.servers.iter().chain(&self.agents).cloned().collect()
    }

    pub fn server_names(&self) -> Vec<String> {
        names(&self.servers)
    }

    pub fn agent_names(&self) -> Vec<String> {
        names(&self.agents)
    }

    /// Node count kubectl should report
    pub fn node_count(&self) -> usize {
        self.servers.len() + self.agents.len() + self.windows_agents.len()
    }

    /// Human readable summary for suite logs
    pub fn status(&self) -> String {
        let mut out = String::new();
        if self.hardened {
            out.push_str("Hardened: true\n");
        }
        let kubeconfig = self
            .kubeconfig
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        out.push_str(&format!("Kubeconfig: {}\n", kubeconfig));
        out.push_str(&format!("Servers Nodes: {}\n", self.server_names().join(" ")));
        out.push_str(&format!("Agents Nodes: {}\n", self.agent_names().join(" ")));
        if !self.windows_agents.is_empty() {
            out.push_str(&format!(
                "Windows Agents: {}\n",
                names(&self.windows_agents).join(" ")
            ));
        }
        out
    }

    /// Tear down what this suite created.
    ///
    /// Keeps going after each failure and reports all of them at the end.
    #[instrument(skip(self), fields(dir = %self.test_dir.display()))]
    pub async fn cleanup(&mut self) -> Result<()> {
        let mut failures = Vec::new();

        let containers: Vec<String> = self
            .servers
            .iter()
            .chain(&self.agents)
            .filter_map(|node| match node {
                NodeHandle::Docker(d) => Some(d.name.clone()),
                _ => None,
            })
            .collect();
        for name in &containers {
            if let Err(e) = run_command(&format!("docker rm -f {}", name)).await {
                warn!(container = %name, error = %e, "Failed to remove node");
                failures.push(format!("remove {}: {}", name, e));
            }
        }
        if !containers.is_empty() {
            let dir_name = self
                .test_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let cmd = format!(
                "docker volume ls -q | grep -F {} | xargs -r docker volume rm",
                shell_words::quote(&dir_name)
            );
            if let Err(e) = run_command(&cmd).await {
                warn!(error = %e, "Failed to remove volumes");
                failures.push(format!("remove volumes: {}", e));
            }
        }
        self.servers.clear();
        self.agents.clear();
        self.windows_agents.clear();

        if let Some(path) = self.kubeconfig.take() {
            if !path.starts_with(&self.test_dir) {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove kubeconfig");
                    failures.push(format!("remove {}: {}", path.display(), e));
                }
            }
        }

        if let Err(e) = tokio::fs::remove_dir_all(&self.test_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "Failed to remove test directory");
                failures.push(format!("remove {}: {}", self.test_dir.display(), e));
            }
        }

        if failures.is_empty() {
            info!("Cleanup complete");
            Ok(())
        } else {
            Err(Error::Cleanup(failures))
        }
    }
}

fn names(nodes: &[NodeHandle]) -> Vec<String> {
    nodes.iter().map(|n| n.name().to_string()).collect()
}
