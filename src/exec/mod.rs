//! Command execution on the test host and on cluster nodes
//!
//! Everything the harness knows about a cluster comes from running commands:
//! - `bash -c` on the host for `kubectl`, `helm` and friends
//! - `ssh` for cloud instances
//! - `docker exec` for systemd-in-docker nodes
//! - `vagrant ssh` for VMs
//!
//! No retries happen here; callers wrap commands in a [`crate::poll::Poller`].

mod node;
mod shell;

use std::future::Future;

pub use node::{
    classify_ssh_output, DockerNode, NodeHandle, NodeOs, NodeRole, SshTarget, VagrantNode,
};
pub use shell::{
    run_command, run_command_with, run_commands_host, run_program, CommandOutput,
    DEFAULT_COMMAND_TIMEOUT,
};

use crate::error::Result;

/// Something a shell command can be sent to
pub trait CommandRunner: Send + Sync {
    /// Identifier used in logs and errors
    fn name(&self) -> &str;

    /// Role the target plays in the cluster
    fn role(&self) -> NodeRole {
        NodeRole::from_node_name(self.name())
    }

    /// Run `cmd` and return its output; errors on non-zero exit or dial failure
    fn run(&self, cmd: &str) -> impl Future<Output = Result<String>> + Send;
}

/// The machine the harness itself runs on
#[derive(Debug, Clone, Copy, Default)]
pub struct Host;

impl CommandRunner for Host {
    fn name(&self) -> &str {
        "host"
    }

    async fn run(&self, cmd: &str) -> Result<String> {
        run_command(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_host_runner() {
        let out = Host.run("printf hello").await.unwrap();
        assert_eq!(out, "hello");
        assert_eq!(Host.name(), "host");
        assert_eq!(Host.role(), NodeRole::Server);
    }
}
