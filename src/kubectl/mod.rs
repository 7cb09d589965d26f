//! Typed view over `kubectl` output
//!
//! Records are snapshots: every call re-runs kubectl and parses fresh rows.
//! Lines are tokenized on whitespace with an explicit minimum field count, so
//! a truncated row yields [`crate::Error::Parse`] instead of a bad index.

mod client;
mod parse;
mod types;

pub use client::Kubectl;
pub use parse::{
    count_pods_containing, fields, parse_nodes, parse_object_ips, parse_pods, parse_schedulable,
};
pub use types::{Node, ObjectIps, Pod, ReadyCount};
