//! Cluster node handles and how commands reach them

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, instrument};

use super::shell::{run_program, DEFAULT_COMMAND_TIMEOUT};
use super::CommandRunner;
use crate::error::{Error, Result};

/// Noise injected into `vagrant ssh` output by vagrant-libvirt on CI runners
const FOG_WARNING: &str = "[fog][WARNING] Unrecognized arguments: libvirt_ip_command\n";

/// Prints the address of the VM's private network interface
const ETH1_ADDRESS: &str = "ip -f inet addr show eth1| awk '/inet / {print $2}'|cut -d/ -f1";

/// Role of an RKE2 node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeRole {
    Server,
    Agent,
}

impl NodeRole {
    /// systemd unit running RKE2 for this role
    pub fn service_name(&self) -> &'static str {
        match self {
            NodeRole::Server => "rke2-server",
            NodeRole::Agent => "rke2-agent",
        }
    }

    /// Infer the role from a conventional node name (`server-0`, `agent-1`)
    pub fn from_node_name(name: &str) -> Self {
        if name.contains("agent") {
            NodeRole::Agent
        } else {
            NodeRole::Server
        }
    }
}

/// Operating system of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NodeOs {
    #[default]
    Linux,
    Windows,
}

/// A host reached with the system `ssh` client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key: Option<PathBuf>,
    pub role: NodeRole,
    /// Wrap every command in `sudo sh -c`
    pub sudo: bool,
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl SshTarget {
    pub fn new(host: impl Into<String>, user: impl Into<String>, role: NodeRole) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            key: None,
            role,
            sudo: false,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Upper bound for one remote command, ssh dial included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Arguments passed to `ssh` for running `cmd` remotely
    pub fn ssh_args(&self, cmd: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
            "-o",
            "ConnectTimeout=10",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("-p".to_string());
        args.push(self.port.to_string());
        if let Some(key) = &self.key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));

        if self.sudo {
            args.push(format!("sudo sh -c {}", shell_words::quote(cmd)));
        } else {
            args.push(cmd.to_string());
        }
        args
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn run(&self, cmd: &str) -> Result<String> {
        if cmd.trim().is_empty() {
            return Err(Error::invalid("cmd should not be empty"));
        }

        let output = run_program("ssh", self.ssh_args(cmd), &[], self.timeout)
            .await
            .map_err(|e| Error::on_node(&self.host, cmd, e))?;

        // 255 is ssh's own failure (dial, auth); anything else is the remote status
        if !output.success() {
            return Err(Error::on_node(
                &self.host,
                cmd,
                Error::CommandFailed {
                    cmd: cmd.to_string(),
                    status: output.status,
                    output: output.combined(),
                },
            ));
        }

        Ok(classify_ssh_output(cmd, &output.stdout, &output.stderr))
    }
}

/// Pick what a successful remote command reports back.
///
/// Any non-empty stderr is returned in place of stdout unless it mentions
/// `error`, `exit status 1` and `exit status 2` all at once. Callers match
/// on the stderr text returned here.
pub fn classify_ssh_output(cmd: &str, stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();

    if !stderr.is_empty()
        && (!stderr.contains("error")
            || !stderr.contains("exit status 1")
            || !stderr.contains("exit status 2"))
    {
        return stderr.to_string();
    } else if !stderr.is_empty() {
        return format!("\ncommand: {} \n failed with error: {}", cmd, stderr);
    }

    stdout.to_string()
}

/// A systemd-in-docker node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerNode {
    pub name: String,
    pub ip: Option<String>,
    /// Host port mapped to the apiserver, servers only
    pub port: Option<u16>,
    /// Supervisor URL agents join through, servers only
    pub url: Option<String>,
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

impl DockerNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ip: None,
            port: None,
            url: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, cmd: &str) -> Result<String> {
        let output = run_program(
            "docker",
            ["exec", self.name.as_str(), "/bin/sh", "-c", cmd],
            &[],
            self.timeout,
        )
        .await
        .map_err(|e| Error::on_node(&self.name, cmd, e))?;

        if output.success() {
            Ok(output.combined())
        } else {
            Err(Error::on_node(
                &self.name,
                cmd,
                Error::CommandFailed {
                    cmd: cmd.to_string(),
                    status: output.status,
                    output: output.combined(),
                },
            ))
        }
    }
}

/// A Vagrant managed VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VagrantNode {
    pub name: String,
    #[serde(default)]
    pub os: NodeOs,
    /// Extra environment for every `vagrant` invocation, e.g. the `E2E_*`
    /// settings the Vagrantfile reads
    #[serde(skip)]
    pub env: Vec<(String, String)>,
    #[serde(skip, default = "default_timeout")]
    pub timeout: Duration,
}

impl VagrantNode {
    pub fn new(name: impl Into<String>, os: NodeOs) -> Self {
        Self {
            name: name.into(),
            os,
            env: Vec::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The `-c` payload handed to `vagrant ssh`
    pub fn remote_command(&self, cmd: &str) -> String {
        match self.os {
            NodeOs::Linux => format!("sudo {}", cmd),
            NodeOs::Windows => format!("powershell.exe -Command \"{}\"", cmd),
        }
    }

    async fn run(&self, cmd: &str) -> Result<String> {
        let remote = self.remote_command(cmd);
        let output = run_program(
            "vagrant",
            ["ssh", "-c", remote.as_str(), self.name.as_str()],
            &self.env,
            self.timeout,
        )
        .await
        .map_err(|e| Error::on_node(&self.name, cmd, e))?;

        let out = output.combined().replace(FOG_WARNING, "");
        if output.success() {
            Ok(out)
        } else {
            Err(Error::on_node(
                &self.name,
                cmd,
                Error::CommandFailed {
                    cmd: cmd.to_string(),
                    status: output.status,
                    output: out,
                },
            ))
        }
    }

    /// Address of the private network interface, read from inside the VM
    pub async fn external_ip(&self) -> Result<String> {
        let output = run_program(
            "vagrant",
            ["ssh", self.name.as_str(), "-c", ETH1_ADDRESS],
            &self.env,
            self.timeout,
        )
        .await?;
        if !output.success() {
            return Err(Error::on_node(
                &self.name,
                ETH1_ADDRESS,
                Error::CommandFailed {
                    cmd: ETH1_ADDRESS.to_string(),
                    status: output.status,
                    output: output.combined(),
                },
            ));
        }
        output
            .combined()
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with("[fog]"))
            .map(|ip| ip.trim_start_matches("inet").trim().to_string())
            .ok_or_else(|| Error::assertion(format!("no eth1 address found on {}", self.name)))
    }
}

/// Any node the harness can run commands on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeHandle {
    Ssh(SshTarget),
    Docker(DockerNode),
    Vagrant(VagrantNode),
}

impl NodeHandle {
    /// Upper bound applied to each command sent to this node
    pub fn timeout(&self) -> Duration {
        match self {
            NodeHandle::Ssh(t) => t.timeout,
            NodeHandle::Docker(d) => d.timeout,
            NodeHandle::Vagrant(v) => v.timeout,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        match self {
            NodeHandle::Ssh(t) => NodeHandle::Ssh(t.with_timeout(timeout)),
            NodeHandle::Docker(d) => NodeHandle::Docker(d.with_timeout(timeout)),
            NodeHandle::Vagrant(v) => NodeHandle::Vagrant(v.with_timeout(timeout)),
        }
    }

    /// Best known address of the node
    pub fn address(&self) -> Option<&str> {
        match self {
            NodeHandle::Ssh(t) => Some(&t.host),
            NodeHandle::Docker(d) => d.ip.as_deref(),
            NodeHandle::Vagrant(_) => None,
        }
    }
}

impl CommandRunner for NodeHandle {
    fn name(&self) -> &str {
        match self {
            NodeHandle::Ssh(t) => &t.host,
            NodeHandle::Docker(d) => &d.name,
            NodeHandle::Vagrant(v) => &v.name,
        }
    }

    fn role(&self) -> NodeRole {
        match self {
            NodeHandle::Ssh(t) => t.role,
            other => NodeRole::from_node_name(other.name()),
        }
    }

    async fn run(&self, cmd: &str) -> Result<String> {
        debug!(node = %self.name(), cmd, "Running command on node");
        match self {
            NodeHandle::Ssh(t) => t.run(cmd).await,
            NodeHandle::Docker(d) => d.run(cmd).await,
            NodeHandle::Vagrant(v) => v.run(cmd).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_node_name() {
        assert_eq!(NodeRole::from_node_name("server-0"), NodeRole::Server);
        assert_eq!(NodeRole::from_node_name("linux-agent-1"), NodeRole::Agent);
        assert_eq!(NodeRole::Agent.service_name(), "rke2-agent");
        assert_eq!(NodeRole::Server.to_string(), "server");
        assert_eq!("agent".parse::<NodeRole>().unwrap(), NodeRole::Agent);
    }

    #[test]
    fn test_ssh_args_with_key_and_sudo() {
        let target = SshTarget::new("10.0.0.5", "ec2-user", NodeRole::Server)
            .with_port(2222)
            .with_key("/keys/id_rsa")
            .with_sudo(true);

        let args = target.ssh_args("rke2 secrets-encrypt status");
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert!(args.windows(2).any(|w| w[0] == "-i" && w[1] == "/keys/id_rsa"));
        assert_eq!(args[args.len() - 2], "ec2-user@10.0.0.5");
        assert_eq!(
            args.last().unwrap(),
            "sudo sh -c 'rke2 secrets-encrypt status'"
        );
    }

    #[test]
    fn test_ssh_args_without_sudo_passes_command_verbatim() {
        let target = SshTarget::new("10.0.0.5", "ubuntu", NodeRole::Agent);
        let args = target.ssh_args("uptime");
        assert_eq!(args.last().unwrap(), "uptime");
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn test_classify_prefers_stdout_when_stderr_empty() {
        assert_eq!(classify_ssh_output("c", "  v1.31.0+rke2r1\n", ""), "v1.31.0+rke2r1");
    }

    #[test]
    fn test_classify_returns_any_ordinary_stderr() {
        // stderr wins over stdout even for plain warnings
        let out = classify_ssh_output("c", "ok", "Warning: something\n");
        assert_eq!(out, "Warning: something");

        let out = classify_ssh_output("c", "ok", "error: exit status 1");
        assert_eq!(out, "error: exit status 1");
    }

    #[test]
    fn test_classify_formats_stderr_mentioning_every_marker() {
        let out = classify_ssh_output("c", "ok", "error exit status 1 exit status 2");
        assert!(out.contains("command: c"));
        assert!(out.contains("failed with error: error exit status 1 exit status 2"));
    }

    #[test]
    fn test_vagrant_remote_command_per_os() {
        let linux = VagrantNode::new("server-0", NodeOs::Linux);
        assert_eq!(linux.remote_command("systemctl restart rke2-*"), "sudo systemctl restart rke2-*");

        let windows = VagrantNode::new("windows-agent-0", NodeOs::Windows);
        assert_eq!(
            windows.remote_command("Get-Service rke2"),
            "powershell.exe -Command \"Get-Service rke2\""
        );
    }

    #[test]
    fn test_node_handle_role_and_name() {
        let docker = NodeHandle::Docker(DockerNode::new("agent-0-rke2-test-abc"));
        assert_eq!(docker.name(), "agent-0-rke2-test-abc");
        assert_eq!(docker.role(), NodeRole::Agent);
        assert_eq!(docker.address(), None);

        let ssh = NodeHandle::Ssh(SshTarget::new("3.3.3.3", "ubuntu", NodeRole::Server));
        assert_eq!(ssh.role(), NodeRole::Server);
        assert_eq!(ssh.address(), Some("3.3.3.3"));
    }

    #[test]
    fn test_timeout_reaches_every_target() {
        let limit = Duration::from_secs(42);
        let nodes = [
            NodeHandle::Ssh(SshTarget::new("10.0.0.5", "ubuntu", NodeRole::Server)),
            NodeHandle::Docker(DockerNode::new("server-0")),
            NodeHandle::Vagrant(VagrantNode::new("agent-0", NodeOs::Linux)),
        ];
        for node in nodes {
            assert_eq!(node.timeout(), DEFAULT_COMMAND_TIMEOUT);
            assert_eq!(node.with_timeout(limit).timeout(), limit);
        }
    }

    #[test]
    fn test_node_handle_serde_tag() {
        let node = NodeHandle::Vagrant(VagrantNode::new("server-1", NodeOs::Linux));
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "vagrant");
        assert_eq!(json["os"], "linux");
    }
}
