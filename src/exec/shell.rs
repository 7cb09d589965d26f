//! Host-side process execution

use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Upper bound for a single host command
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr
    pub fn combined(&self) -> String {
        let mut out = String::with_capacity(self.stdout.len() + self.stderr.len());
        out.push_str(&self.stdout);
        out.push_str(&self.stderr);
        out
    }
}

fn describe(program: &str, args: &[OsString]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    shell_words::join(parts)
}

/// Spawn `program` with `args`, wait for it and capture both streams.
///
/// A non-zero exit is not an error at this layer; callers decide. The child is
/// killed if `timeout` elapses first.
pub async fn run_program<I, S>(
    program: &str,
    args: I,
    envs: &[(String, String)],
    timeout: Duration,
) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
    let cmd_line = describe(program, &args);
    debug!(cmd = %cmd_line, "Executing command");

    let child = Command::new(program)
        .args(&args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| Error::Spawn {
            cmd: cmd_line.clone(),
            source,
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|source| Error::Spawn {
            cmd: cmd_line.clone(),
            source,
        })?,
        Err(_) => {
            warn!(cmd = %cmd_line, ?timeout, "Command timed out, killing it");
            return Err(Error::CommandFailed {
                cmd: cmd_line,
                status: None,
                output: format!("timed out after {:?}", timeout),
            });
        }
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code(),
    })
}

/// Run `cmd` through `bash -c` and return combined stdout+stderr
pub async fn run_command(cmd: &str) -> Result<String> {
    run_command_with(cmd, &[], DEFAULT_COMMAND_TIMEOUT).await
}

/// [`run_command`] with extra environment and an explicit timeout
pub async fn run_command_with(
    cmd: &str,
    envs: &[(String, String)],
    timeout: Duration,
) -> Result<String> {
    if cmd.trim().is_empty() {
        return Err(Error::invalid("cmd should not be empty"));
    }

    let output = run_program("bash", ["-c", cmd], envs, timeout).await?;
    if output.success() {
        Ok(output.combined())
    } else {
        warn!(cmd, status = ?output.status, "Command failed");
        Err(Error::CommandFailed {
            cmd: cmd.to_string(),
            status: output.status,
            output: output.combined(),
        })
    }
}

/// Run each command in order on the host, accumulating stdout.
///
/// Stops at the first failure; the error names the failing command.
pub async fn run_commands_host(cmds: &[&str]) -> Result<String> {
    if cmds.is_empty() {
        return Err(Error::invalid("cmd should not be empty"));
    }

    let mut stdout = String::new();
    for cmd in cmds {
        let output = run_program("bash", ["-c", *cmd], &[], DEFAULT_COMMAND_TIMEOUT).await?;
        stdout.push_str(&output.stdout);
        if !output.success() {
            warn!(cmd, stderr = %output.stderr.trim(), "Host command failed");
            return Err(Error::CommandFailed {
                cmd: cmd.to_string(),
                status: output.status,
                output: output.stderr,
            });
        }
    }

    Ok(stdout)
}
