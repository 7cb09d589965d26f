//! Error types for the RKE2 test toolkit

use std::time::Duration;

use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for harness operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The process could not be started at all
    #[error("failed to spawn command `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    /// The process ran and exited unsuccessfully
    #[error("failed to run command: {cmd} (exit status {}): {output}", status_text(*.status))]
    CommandFailed {
        cmd: String,
        status: Option<i32>,
        output: String,
    },

    /// A command failed on a specific cluster node
    #[error("command `{cmd}` failed on node {node}: {source}")]
    Node {
        node: String,
        cmd: String,
        #[source]
        source: Box<Error>,
    },

    /// The poller gave up before the condition held
    #[error("timed out after {timeout:?} ({attempts} attempts) waiting for {description}: last observed: {last}")]
    Timeout {
        description: String,
        timeout: Duration,
        attempts: u32,
        last: String,
    },

    /// CLI output did not have the expected shape
    #[error("unexpected field count parsing {what}: expected at least {expected}, found {found} in {line:?}")]
    Parse {
        what: &'static str,
        expected: usize,
        found: usize,
        line: String,
    },

    /// Invalid argument or flag value
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Test case name not present in the registry
    #[error("unknown test case: {0}")]
    UnknownTestCase(String),

    /// One-shot assertion failure
    #[error("assertion failed: {0}")]
    Assertion(String),

    /// Best-effort teardown finished with failures
    #[error("cleanup failed: {}", .0.join("; "))]
    Cleanup(Vec<String>),

    /// A fan-out task panicked or was aborted
    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

fn status_text(status: Option<i32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

impl Error {
    /// Create an invalid-input error with the given message
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Create an assertion error with the given message
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }

    /// Wrap an error with the node and command it happened on
    pub fn on_node(node: impl Into<String>, cmd: impl Into<String>, source: Error) -> Self {
        Self::Node {
            node: node.into(),
            cmd: cmd.into(),
            source: Box::new(source),
        }
    }

    /// Name of the node this error originated on, if any
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Node { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Command output attached to the error, if any
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::CommandFailed { output, .. } => Some(output),
            Self::Node { source, .. } => source.output(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message_includes_command_and_output() {
        let err = Error::CommandFailed {
            cmd: "kubectl get nodes".to_string(),
            status: Some(1),
            output: "connection refused".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("kubectl get nodes"));
        assert!(msg.contains("exit status 1"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_node_error_exposes_node_and_output() {
        let inner = Error::CommandFailed {
            cmd: "systemctl restart rke2-server".to_string(),
            status: None,
            output: "Job failed".to_string(),
        };
        let err = Error::on_node("server-0", "systemctl restart rke2-server", inner);

        assert_eq!(err.node_name(), Some("server-0"));
        assert_eq!(err.output(), Some("Job failed"));
        assert!(err.to_string().contains("exit status signal"));
    }

    #[test]
    fn test_timeout_carries_last_state() {
        let err = Error::Timeout {
            description: "nodes ready".to_string(),
            timeout: Duration::from_secs(5),
            attempts: 3,
            last: "node server-1 is NotReady".to_string(),
        };
        assert!(err.to_string().contains("server-1 is NotReady"));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[test]
    fn test_parse_error_reports_field_count() {
        let err = Error::Parse {
            what: "node",
            expected: 7,
            found: 2,
            line: "server-0 Ready".to_string(),
        };
        assert!(err.to_string().contains("unexpected field count"));
        assert_eq!(err.node_name(), None);
    }
}
