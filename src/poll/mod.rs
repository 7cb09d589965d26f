//! Eventually-consistent polling
//!
//! Cluster state converges asynchronously: nodes join, pods restart, the
//! encryption controller advances a stage. A [`Poller`] re-runs a check on a
//! fixed interval until it passes or a deadline is reached.
//!
//! # Example
//!
//! ```ignore
//! let nodes = Poller::nodes()
//!     .eventually("all nodes ready", || async {
//!         let nodes = kubectl.nodes().await.map_err(|e| e.to_string())?;
//!         checks::all_nodes(&nodes, 3, &[checks::node_ready])
//!     })
//!     .await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};

/// What a successful poll produced and what it cost
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Retry-until-success-or-deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Poller {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Node readiness after cluster creation
    pub const fn nodes() -> Self {
        Self::new(Duration::from_secs(620), Duration::from_secs(5))
    }

    /// Pod health after cluster creation
    pub const fn pods() -> Self {
        Self::new(Duration::from_secs(620), Duration::from_secs(5))
    }

    /// `secrets-encrypt status` style checks
    pub const fn status() -> Self {
        Self::new(Duration::from_secs(420), Duration::from_secs(2))
    }

    /// Component commands run on a node or the host
    pub const fn component() -> Self {
        Self::new(Duration::from_secs(420), Duration::from_secs(3))
    }

    /// Workload removal after `kubectl delete`
    pub const fn deletion() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(5))
    }

    /// Generic poller from the configured node timeout and poll interval
    pub fn from_config(config: &Config) -> Self {
        Self::nodes_from(config)
    }

    pub fn nodes_from(config: &Config) -> Self {
        Self::new(
            Duration::from_secs(config.node_timeout_secs),
            Duration::from_secs(config.poll_interval_secs),
        )
    }

    pub fn pods_from(config: &Config) -> Self {
        Self::new(
            Duration::from_secs(config.pod_timeout_secs),
            Duration::from_secs(config.poll_interval_secs),
        )
    }

    pub fn status_from(config: &Config) -> Self {
        Self::new(
            Duration::from_secs(config.status_timeout_secs),
            Duration::from_secs(config.status_interval_secs),
        )
    }

    /// Run `check` until it returns `Ok`, returning the produced value.
    ///
    /// An `Err` from the check means "not converged yet"; the latest one is
    /// reported if the deadline passes.
    pub async fn eventually<F, Fut, T, E>(&self, description: &str, check: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        self.eventually_with_outcome(description, check)
            .await
            .map(|outcome| outcome.value)
    }

    /// Like [`Poller::eventually`] but also reports attempts and elapsed time.
    ///
    /// The check always runs at least once and is never started after the
    /// deadline.
    pub async fn eventually_with_outcome<F, Fut, T, E>(
        &self,
        description: &str,
        mut check: F,
    ) -> Result<PollOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let last = match check().await {
                Ok(value) => {
                    debug!(description, attempts, "Condition met");
                    return Ok(PollOutcome {
                        value,
                        attempts,
                        elapsed: start.elapsed(),
                    });
                }
                Err(e) => e.to_string(),
            };

            debug!(description, attempts, last = %last, "Condition not met yet");

            tokio::time::sleep(self.interval).await;
            if Instant::now() >= deadline {
                warn!(description, attempts, last = %last, "Gave up waiting");
                return Err(Error::Timeout {
                    description: description.to_string(),
                    timeout: self.timeout,
                    attempts,
                    last,
                });
            }
        }
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::component()
    }
}
