//! Tests for the secrets-encryption rotation sequence
//!
//! A simulated set of servers stands in for a real cluster: the rotation
//! subcommand moves only the lead, and a restart brings a follower up to the
//! lead's stage.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rke2_testkit::exec::CommandRunner;
use rke2_testkit::poll::Poller;
use rke2_testkit::secrets::{RotationFlow, RotationStage, SecretsEncryption};
use rke2_testkit::{Error, Result};

#[derive(Debug)]
struct Sim {
    stages: Vec<RotationStage>,
    commands: Vec<String>,
    broken_restart: Option<usize>,
}

#[derive(Debug, Clone)]
struct FakeServer {
    name: String,
    index: usize,
    sim: Arc<Mutex<Sim>>,
}

impl FakeServer {
    fn status(sim: &Sim, index: usize) -> String {
        let hashes = if sim.stages.iter().all(|s| *s == sim.stages[0]) {
            "All hashes match".to_string()
        } else {
            "hash does not match between node server-0 and server-1".to_string()
        };
        format!(
            "Encryption Status: Enabled\nCurrent Rotation Stage: {}\nServer Encryption Hashes: {}\n",
            sim.stages[index], hashes
        )
    }
}

impl CommandRunner for FakeServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cmd: &str) -> Result<String> {
        let mut sim = self.sim.lock().unwrap();
        sim.commands.push(format!("{}: {}", self.name, cmd));

        if cmd.starts_with("rke2 secrets-encrypt status") {
            return Ok(Self::status(&sim, self.index));
        }
        if cmd == "systemctl restart rke2-server" {
            if sim.broken_restart == Some(self.index) {
                return Err(Error::CommandFailed {
                    cmd: cmd.to_string(),
                    status: Some(1),
                    output: "Job for rke2-server.service failed".to_string(),
                });
            }
            let lead = sim.stages[0];
            sim.stages[self.index] = lead;
            return Ok(String::new());
        }
        if cmd.starts_with("journalctl") {
            return Ok("-- No entries --".to_string());
        }

        let next = match cmd.strip_prefix("rke2 secrets-encrypt ") {
            Some("rotate-keys") | Some("reencrypt") => RotationStage::ReencryptFinished,
            Some("prepare") => RotationStage::Prepare,
            Some("rotate") => RotationStage::Rotate,
            _ => {
                return Err(Error::CommandFailed {
                    cmd: cmd.to_string(),
                    status: Some(127),
                    output: "unknown command".to_string(),
                })
            }
        };
        if self.index != 0 {
            return Err(Error::assertion("rotation must only run on the lead"));
        }
        sim.stages[0] = next;
        Ok(format!("{} completed successfully", cmd))
    }
}

fn cluster(count: usize) -> (Vec<FakeServer>, Arc<Mutex<Sim>>) {
    let sim = Arc::new(Mutex::new(Sim {
        stages: vec![RotationStage::Start; count],
        commands: Vec::new(),
        broken_restart: None,
    }));
    let servers = (0..count)
        .map(|index| FakeServer {
            name: format!("server-{}", index),
            index,
            sim: Arc::clone(&sim),
        })
        .collect();
    (servers, sim)
}

fn fast_poller() -> Poller {
    Poller::new(Duration::from_secs(2), Duration::from_millis(5))
}

#[tokio::test]
async fn test_rotate_keys_flow_converges() {
    let (servers, sim) = cluster(3);
    let rotation = SecretsEncryption::new(&servers).with_poller(fast_poller());

    let stage = rotation.run_flow(RotationFlow::RotateKeys).await.unwrap();
    assert_eq!(stage, RotationStage::ReencryptFinished);

    let sim = sim.lock().unwrap();
    assert!(sim.stages.iter().all(|s| *s == RotationStage::ReencryptFinished));
    let rotations: Vec<_> = sim
        .commands
        .iter()
        .filter(|c| c.ends_with("rotate-keys"))
        .collect();
    assert_eq!(rotations, ["server-0: rke2 secrets-encrypt rotate-keys"]);
}

#[tokio::test]
async fn test_legacy_flow_restarts_after_every_step() {
    let (servers, sim) = cluster(2);
    let rotation = SecretsEncryption::new(&servers).with_poller(fast_poller());

    let stage = rotation.run_flow(RotationFlow::Legacy).await.unwrap();
    assert_eq!(stage, RotationStage::ReencryptFinished);

    let sim = sim.lock().unwrap();
    let restarts = sim
        .commands
        .iter()
        .filter(|c| c.ends_with("systemctl restart rke2-server"))
        .count();
    assert_eq!(restarts, 3 * servers.len());
}

#[tokio::test]
async fn test_single_step_leaves_followers_behind() {
    let (servers, _sim) = cluster(2);
    let rotation = SecretsEncryption::new(&servers).with_poller(fast_poller());

    let step = RotationFlow::Legacy.steps()[0];
    rotation.run_step(&step).await.unwrap();

    let lead = rotation.status(&servers[0]).await.unwrap();
    let follower = rotation.status(&servers[1]).await.unwrap();
    assert_eq!(lead.stage, Some(RotationStage::Prepare));
    assert_eq!(follower.stage, Some(RotationStage::Start));
    assert_eq!(follower.hashes_match, Some(false));
}

#[tokio::test]
async fn test_failed_restart_aborts_flow() {
    let (servers, sim) = cluster(2);
    sim.lock().unwrap().broken_restart = Some(1);
    let rotation = SecretsEncryption::new(&servers).with_poller(fast_poller());

    let err = rotation.run_flow(RotationFlow::RotateKeys).await.unwrap_err();
    assert!(matches!(err, Error::CommandFailed { .. }), "unexpected error: {err}");
}

#[tokio::test]
async fn test_rotation_without_servers_is_rejected() {
    let servers: Vec<FakeServer> = Vec::new();
    let err = SecretsEncryption::new(&servers)
        .with_poller(fast_poller())
        .run_flow(RotationFlow::RotateKeys)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("at least one server"));
}
