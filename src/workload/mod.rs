//! Manifests from the resource directory, applied and removed by file name

use std::path::{Path, PathBuf};
use std::str::FromStr;

use strum::Display;
use tracing::{info, instrument};

use crate::error::{Error, Result};
use crate::kubectl::Kubectl;
use crate::poll::Poller;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum WorkloadAction {
    Create,
    Delete,
}

impl FromStr for WorkloadAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "create" | "apply" => Ok(Self::Create),
            "delete" => Ok(Self::Delete),
            other => Err(Error::invalid(format!(
                "invalid action: {}. Must be 'create' or 'delete'",
                other
            ))),
        }
    }
}

/// Manifest directory bound to a cluster
#[derive(Debug, Clone)]
pub struct Workloads {
    dir: PathBuf,
    kubectl: Kubectl,
    deletion: Poller,
}

impl Workloads {
    pub fn new(dir: impl Into<PathBuf>, kubectl: Kubectl) -> Self {
        Self {
            dir: dir.into(),
            kubectl,
            deletion: Poller::deletion(),
        }
    }

    pub fn with_deletion_poller(mut self, poller: Poller) -> Self {
        self.deletion = poller;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the manifest whose file name is exactly `name`
    pub async fn find_manifest(&self, name: &str) -> Result<PathBuf> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| {
            Error::invalid(format!(
                "{}: unable to read resource manifest file for {}",
                e, name
            ))
        })?;

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().trim() == name {
                return Ok(entry.path());
            }
        }
        Err(Error::invalid(format!("workload {} not found", name)))
    }

    /// Apply or delete the manifest `name`.
    ///
    /// Deletion waits until `kubectl get all -A` no longer mentions `name`.
    #[instrument(skip(self))]
    pub async fn manage(&self, action: WorkloadAction, name: &str) -> Result<String> {
        let manifest = self.find_manifest(name).await?;
        match action {
            WorkloadAction::Create => {
                info!(workload = name, "Deploying");
                self.kubectl.apply(&manifest).await
            }
            WorkloadAction::Delete => {
                info!(workload = name, "Removing");
                let out = self.kubectl.delete(&manifest).await?;
                let kubectl = &self.kubectl;
                self.deletion
                    .eventually(&format!("{} deleted", name), move || async move {
                        let all = kubectl.get_all().await.map_err(|e| e.to_string())?;
                        if all.contains(name) {
                            Err(format!("{} still present", name))
                        } else {
                            Ok(())
                        }
                    })
                    .await?;
                Ok(out)
            }
        }
    }

    pub async fn create(&self, name: &str) -> Result<String> {
        self.manage(WorkloadAction::Create, name).await
    }

    pub async fn delete(&self, name: &str) -> Result<String> {
        self.manage(WorkloadAction::Delete, name).await
    }
}
