//! Secrets-encryption key rotation, driven and verified from the outside
//!
//! The rotation subcommand runs on the first server only. That server moves
//! to the new stage immediately; the others keep reporting the previous stage
//! (and mismatched hashes) until a rolling restart brings them along. Each
//! server is polled on its own.

mod status;

use strum::{Display, EnumString};
use tracing::{info, instrument};

pub use status::{EncryptionStatus, RotationStage};

use crate::cluster::restart_cluster;
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::poll::Poller;

const SECRETS_ENCRYPT: &str = "rke2 secrets-encrypt";

/// One rotation subcommand and what it should do to the servers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationStep {
    pub subcommand: &'static str,
    /// Stage the lead reports right after the subcommand
    pub lead_stage: RotationStage,
    /// Stage the other servers keep reporting until restarted
    pub follower_stage: RotationStage,
    /// Lead also reports mismatched hashes before the restart
    pub lead_hashes_diverge: bool,
}

/// Which rotation procedure to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RotationFlow {
    /// Single `rotate-keys` call, `start` straight to `reencrypt_finished`
    #[default]
    RotateKeys,
    /// `prepare`, `rotate`, `reencrypt` with a restart after each
    Legacy,
}

impl RotationFlow {
    pub fn steps(&self) -> Vec<RotationStep> {
        use RotationStage::*;
        match self {
            RotationFlow::RotateKeys => vec![RotationStep {
                subcommand: "rotate-keys",
                lead_stage: ReencryptFinished,
                follower_stage: Start,
                lead_hashes_diverge: true,
            }],
            RotationFlow::Legacy => vec![
                RotationStep {
                    subcommand: "prepare",
                    lead_stage: Prepare,
                    follower_stage: Start,
                    lead_hashes_diverge: true,
                },
                RotationStep {
                    subcommand: "rotate",
                    lead_stage: Rotate,
                    follower_stage: Prepare,
                    lead_hashes_diverge: true,
                },
                RotationStep {
                    subcommand: "reencrypt",
                    lead_stage: ReencryptFinished,
                    follower_stage: Rotate,
                    lead_hashes_diverge: false,
                },
            ],
        }
    }
}

/// Rotation driver over the server nodes, lead first
pub struct SecretsEncryption<'a, R> {
    servers: &'a [R],
    poller: Poller,
    status_args: String,
}

impl<'a, R: CommandRunner> SecretsEncryption<'a, R> {
    pub fn new(servers: &'a [R]) -> Self {
        Self {
            servers,
            poller: Poller::status(),
            status_args: String::new(),
        }
    }

    pub fn with_poller(mut self, poller: Poller) -> Self {
        self.poller = poller;
        self
    }

    /// Extra arguments for `status`, e.g. `--server=https://localhost:9345`
    /// when every node shares one `RKE2_URL`
    pub fn with_status_args(mut self, args: impl Into<String>) -> Self {
        self.status_args = args.into();
        self
    }

    fn lead(&self) -> Result<&'a R> {
        self.servers
            .first()
            .ok_or_else(|| Error::invalid("secrets encryption needs at least one server"))
    }

    fn status_command(&self) -> String {
        if self.status_args.is_empty() {
            format!("{} status", SECRETS_ENCRYPT)
        } else {
            format!("{} status {}", SECRETS_ENCRYPT, self.status_args)
        }
    }

    /// Current status of one server
    pub async fn status(&self, server: &R) -> Result<EncryptionStatus> {
        let out = server.run(&self.status_command()).await?;
        EncryptionStatus::parse(&out)
    }

    /// Every server is enabled, at `stage`, with matching hashes
    #[instrument(skip(self), fields(servers = self.servers.len()))]
    pub async fn verify_all(&self, stage: RotationStage) -> Result<()> {
        self.lead()?;
        for server in self.servers {
            let description = format!("{} at stage {}", server.name(), stage);
            self.poller
                .eventually(&description, move || async move {
                    let status = self.status(server).await.map_err(|e| e.to_string())?;
                    status.expect(stage, true)
                })
                .await?;
        }
        info!(%stage, "All servers agree on rotation stage");
        Ok(())
    }

    /// Run `step` on the lead and wait for every server to show the
    /// pre-restart split
    #[instrument(skip(self), fields(subcommand = step.subcommand))]
    pub async fn run_step(&self, step: &RotationStep) -> Result<()> {
        let lead = self.lead()?;
        let cmd = format!("{} {}", SECRETS_ENCRYPT, step.subcommand);
        let out = lead.run(&cmd).await?;
        info!(node = lead.name(), output = %out.trim(), "Rotation subcommand accepted");

        for (index, server) in self.servers.iter().enumerate() {
            let is_lead = index == 0;
            let description = format!("{} after {}", server.name(), step.subcommand);
            self.poller
                .eventually(&description, move || async move {
                    let status = self.status(server).await.map_err(|e| e.to_string())?;
                    if is_lead {
                        status.expect_stage(step.lead_stage)?;
                        if step.lead_hashes_diverge && status.hashes_match != Some(false) {
                            return Err("lead hashes still match".to_string());
                        }
                        Ok(())
                    } else {
                        status.expect(step.follower_stage, false)
                    }
                })
                .await?;
        }
        Ok(())
    }

    /// Rolling restart of every server
    pub async fn restart_servers(&self) -> Result<()> {
        restart_cluster(self.servers).await
    }

    /// Full rotation: verify `start`, then per step run it, restart and
    /// verify that every server converged on the lead's stage
    #[instrument(skip(self))]
    pub async fn run_flow(&self, flow: RotationFlow) -> Result<RotationStage> {
        self.verify_all(RotationStage::Start).await?;

        let mut stage = RotationStage::Start;
        for step in flow.steps() {
            self.run_step(&step).await?;
            self.restart_servers().await?;
            self.verify_all(step.lead_stage).await?;
            stage = step.lead_stage;
        }
        Ok(stage)
    }
}

impl<R> std::fmt::Debug for SecretsEncryption<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsEncryption")
            .field("servers", &self.servers.len())
            .field("poller", &self.poller)
            .field("status_args", &self.status_args)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_keys_is_single_step() {
        let steps = RotationFlow::RotateKeys.steps();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].subcommand, "rotate-keys");
        assert_eq!(steps[0].lead_stage, RotationStage::ReencryptFinished);
        assert_eq!(steps[0].follower_stage, RotationStage::Start);
    }

    #[test]
    fn test_legacy_followers_trail_lead_by_one_stage() {
        let steps = RotationFlow::Legacy.steps();
        let subcommands: Vec<_> = steps.iter().map(|s| s.subcommand).collect();
        assert_eq!(subcommands, ["prepare", "rotate", "reencrypt"]);

        for pair in steps.windows(2) {
            assert_eq!(pair[1].follower_stage, pair[0].lead_stage);
        }
        assert!(!steps[2].lead_hashes_diverge);
    }

    #[test]
    fn test_flow_names() {
        assert_eq!("rotate-keys".parse::<RotationFlow>().unwrap(), RotationFlow::RotateKeys);
        assert_eq!("legacy".parse::<RotationFlow>().unwrap(), RotationFlow::Legacy);
        assert_eq!(RotationFlow::RotateKeys.to_string(), "rotate-keys");
    }
}
