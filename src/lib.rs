//! RKE2 Test Kit Library
//!
//! Building blocks for black-box validation of an RKE2 cluster: run commands
//! on the host or on nodes, poll until cluster state converges, fan work out
//! across nodes, and assert on what `kubectl` and `rke2` report.

pub mod checks;
pub mod cluster;
pub mod config;
pub mod error;
pub mod exec;
pub mod fanout;
pub mod kubectl;
pub mod logging;
pub mod poll;
pub mod secrets;
pub mod suite;
pub mod testcase;
pub mod upgrade;
pub mod version;
pub mod workload;

pub use error::{Error, Result};
