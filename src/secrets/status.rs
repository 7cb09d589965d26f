use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::checks::CheckResult;
use crate::error::{Error, Result};

/// Stage reported by `rke2 secrets-encrypt status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RotationStage {
    Start,
    Prepare,
    Rotate,
    ReencryptRequest,
    ReencryptActive,
    ReencryptFinished,
}

/// Parsed `rke2 secrets-encrypt status` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionStatus {
    pub enabled: bool,
    pub stage: Option<RotationStage>,
    /// `None` when the hashes line is absent, e.g. on a single server
    pub hashes_match: Option<bool>,
}

const STATUS_PREFIX: &str = "Encryption Status:";
const STAGE_PREFIX: &str = "Current Rotation Stage:";
const HASHES_PREFIX: &str = "Server Encryption Hashes:";

impl EncryptionStatus {
    pub fn parse(output: &str) -> Result<Self> {
        let mut enabled = None;
        let mut stage = None;
        let mut hashes_match = None;

        for line in output.lines().map(str::trim) {
            if let Some(value) = line.strip_prefix(STATUS_PREFIX) {
                enabled = Some(value.trim() == "Enabled");
            } else if let Some(value) = line.strip_prefix(STAGE_PREFIX) {
                let value = value.trim();
                stage = Some(value.parse::<RotationStage>().map_err(|_| {
                    Error::invalid(format!("unknown rotation stage {:?}", value))
                })?);
            } else if let Some(value) = line.strip_prefix(HASHES_PREFIX) {
                let value = value.trim();
                if value.contains("All hashes match") {
                    hashes_match = Some(true);
                } else if value.contains("hash does not match") {
                    hashes_match = Some(false);
                }
            }
        }

        let enabled = enabled.ok_or_else(|| {
            Error::invalid(format!("no {:?} line in {:?}", STATUS_PREFIX, output.trim()))
        })?;

        Ok(Self {
            enabled,
            stage,
            hashes_match,
        })
    }

    /// Encryption is on, at `stage`, with the given hash agreement
    pub fn expect(&self, stage: RotationStage, hashes_match: bool) -> CheckResult {
        if !self.enabled {
            return Err("encryption is disabled".to_string());
        }
        self.expect_stage(stage)?;
        match self.hashes_match {
            Some(actual) if actual == hashes_match => Ok(()),
            actual => Err(format!(
                "hashes match is {:?}, expected {}",
                actual, hashes_match
            )),
        }
    }

    pub fn expect_stage(&self, stage: RotationStage) -> CheckResult {
        if self.stage == Some(stage) {
            Ok(())
        } else {
            Err(format!("rotation stage is {:?}, expected {}", self.stage, stage))
        }
    }
}
