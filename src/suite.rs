//! Ordered suite execution and per-spec reporting
//!
//! Specs run one after another. Once one fails the rest are skipped, and
//! the cluster is left standing for inspection unless running in CI.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use strum::{Display, EnumString};
use tracing::{error, info, warn};

use crate::cluster::{dump_pod_logs, dump_service_logs, TestConfig};
use crate::config::Config;
use crate::error::Result;

/// Outcome of one spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SpecState {
    Passed,
    Failed,
    Skipped,
}

/// One JSON line per finished spec
#[derive(Debug, Clone, Serialize)]
pub struct SpecReport {
    pub state: SpecState,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Run time in nanoseconds
    #[serde(serialize_with = "as_nanos")]
    pub time: Duration,
    /// Wall clock time the spec finished, RFC 3339
    pub finished_at: DateTime<Utc>,
}

fn as_nanos<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

impl SpecReport {
    pub const KIND: &'static str = "rke2 test";

    pub fn new(state: SpecState, name: impl Into<String>, time: Duration) -> Self {
        Self {
            state,
            name: name.into(),
            kind: Self::KIND,
            time,
            finished_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Failure bookkeeping across the suite
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuiteState {
    failed: bool,
    pub ci: bool,
}

impl SuiteState {
    pub fn new(ci: bool) -> Self {
        Self { failed: false, ci }
    }

    /// Latch a spec failure; a later success does not clear it
    pub fn record(&mut self, spec_failed: bool) {
        self.failed |= spec_failed;
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Tear the cluster down unless a failure should be kept for debugging
    pub fn should_teardown(&self) -> bool {
        !self.failed || self.ci
    }
}

/// Runs specs in order and collects their reports
#[derive(Debug, Default)]
pub struct Suite {
    state: SuiteState,
    reports: Vec<SpecReport>,
}

impl Suite {
    pub fn new(ci: bool) -> Self {
        Self {
            state: SuiteState::new(ci),
            reports: Vec::new(),
        }
    }

    pub fn state(&self) -> SuiteState {
        self.state
    }

    pub fn reports(&self) -> &[SpecReport] {
        &self.reports
    }

    /// Run `spec` unless an earlier one failed, and print its report line
    pub async fn spec<F, Fut>(&mut self, name: &str, spec: F) -> SpecState
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let started = Instant::now();
        let state = if self.state.failed() {
            info!(spec = name, "Skipping after earlier failure");
            SpecState::Skipped
        } else {
            match spec().await {
                Ok(()) => SpecState::Passed,
                Err(e) => {
                    error!(spec = name, error = %e, "Spec failed");
                    SpecState::Failed
                }
            }
        };
        self.state.record(state == SpecState::Failed);

        let report = SpecReport::new(state, name, started.elapsed());
        match report.to_json() {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(spec = name, error = %e, "Failed to encode spec report"),
        }
        self.reports.push(report);
        state
    }
}

/// Dump diagnostics when something failed, then tear down or preserve
pub async fn after_suite(state: SuiteState, config: &Config, cluster: &mut TestConfig) -> Result<()> {
    if state.failed() {
        let nodes = cluster.all_nodes();
        if let Ok(kubectl) = cluster.kubectl() {
            println!("{}", kubectl.dump_resources().await);
        }
        println!("{}", dump_pod_logs(&nodes, config.log_lines).await);
        println!("{}", dump_service_logs(&nodes, config.log_lines).await);
    }

    if state.should_teardown() {
        cluster.cleanup().await
    } else {
        println!("FAILED!");
        warn!(dir = %cluster.test_dir.display(), "Preserving cluster for inspection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_suite_state_latches_failure() {
        let mut state = SuiteState::new(false);
        assert!(state.should_teardown());
        state.record(true);
        state.record(false);
        assert!(state.failed());
        assert!(!state.should_teardown());

        let mut ci = SuiteState::new(true);
        ci.record(true);
        assert!(ci.should_teardown());
    }

    #[test]
    fn test_report_json_line() {
        let report = SpecReport::new(SpecState::Passed, "Verifies node status", Duration::from_millis(1500));
        let value: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(value["state"], "passed");
        assert_eq!(value["name"], "Verifies node status");
        assert_eq!(value["type"], "rke2 test");
        assert_eq!(value["time"], 1_500_000_000u64);
        let finished = value["finished_at"].as_str().unwrap();
        let finished: DateTime<Utc> = finished.parse().unwrap();
        assert_eq!(finished, report.finished_at);
    }

    #[tokio::test]
    async fn test_specs_after_failure_are_skipped() {
        let mut suite = Suite::new(false);
        assert_eq!(suite.spec("first", || async { Ok(()) }).await, SpecState::Passed);
        assert_eq!(
            suite.spec("second", || async { Err(Error::assertion("boom")) }).await,
            SpecState::Failed
        );
        assert_eq!(suite.spec("third", || async { Ok(()) }).await, SpecState::Skipped);
        assert!(suite.state().failed());
        assert_eq!(suite.reports().len(), 3);
    }
}
