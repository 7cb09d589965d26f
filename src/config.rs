use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// How the driver reaches the nodes named in `E2E_SERVERS` / `E2E_AGENTS`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NodeTarget {
    #[default]
    Ssh,
    Docker,
    Vagrant,
}

/// Harness settings, read from `E2E_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,

    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default)]
    pub ssh_key: Option<PathBuf>,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default = "default_true")]
    pub ssh_sudo: bool,

    #[serde(default)]
    pub ci: bool,

    #[serde(default)]
    pub hardened: bool,

    /// Comma separated test case names, e.g. `TestDaemonset,TestIngress`
    #[serde(default)]
    pub test_cases: Option<String>,

    #[serde(default)]
    pub deploy_workload: bool,

    /// Lines of log tail collected per node on failure
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,

    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,

    #[serde(default = "default_pod_timeout")]
    pub pod_timeout_secs: u64,

    #[serde(default = "default_status_timeout")]
    pub status_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Comma separated server addresses or names, lead first
    #[serde(default)]
    pub servers: Option<String>,

    #[serde(default)]
    pub agents: Option<String>,

    /// `ssh`, `docker` or `vagrant`
    #[serde(default)]
    pub target: Option<String>,

    /// Secrets rotation to exercise: `rotate-keys` or `legacy`
    #[serde(default)]
    pub rotation: Option<String>,

    /// Manual upgrade target, e.g. `INSTALL_RKE2_VERSION=v1.31.1+rke2r1`
    #[serde(default)]
    pub install_type: Option<String>,
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from("resources")
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_true() -> bool {
    true
}

fn default_log_lines() -> usize {
    50
}

fn default_node_timeout() -> u64 {
    620
}

fn default_pod_timeout() -> u64 {
    620
}

fn default_status_timeout() -> u64 {
    420
}

fn default_poll_interval() -> u64 {
    5
}

fn default_status_interval() -> u64 {
    2
}

fn default_command_timeout() -> u64 {
    // 15 minutes: long enough for an install script on a cold VM
    900
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("E2E").try_parsing(true))
            .build()?;

        let settings: Config = config.try_deserialize()?;

        Ok(settings)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn server_list(&self) -> Vec<String> {
        split_list(self.servers.as_deref())
    }

    pub fn agent_list(&self) -> Vec<String> {
        split_list(self.agents.as_deref())
    }

    pub fn node_target(&self) -> Result<NodeTarget> {
        match self.target.as_deref().map(str::trim) {
            None | Some("") => Ok(NodeTarget::default()),
            Some(t) => t
                .parse()
                .map_err(|_| Error::invalid(format!("unknown node target: {}", t))),
        }
    }

    /// All `E2E_*` variables of this process, for forwarding to child tooling
    pub fn forwarded_env() -> Vec<(String, String)> {
        let mut vars: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with("E2E_"))
            .collect();
        vars.sort();
        vars
    }
}

fn split_list(list: Option<&str>) -> Vec<String> {
    list.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            resource_dir: default_resource_dir(),
            ssh_user: default_ssh_user(),
            ssh_key: None,
            ssh_port: default_ssh_port(),
            ssh_sudo: default_true(),
            ci: false,
            hardened: false,
            test_cases: None,
            deploy_workload: false,
            log_lines: default_log_lines(),
            node_timeout_secs: default_node_timeout(),
            pod_timeout_secs: default_pod_timeout(),
            status_timeout_secs: default_status_timeout(),
            poll_interval_secs: default_poll_interval(),
            status_interval_secs: default_status_interval(),
            command_timeout_secs: default_command_timeout(),
            servers: None,
            agents: None,
            target: None,
            rotation: None,
            install_type: None,
        }
    }
}
