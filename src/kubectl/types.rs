use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::parse::{fields, fold_restart_annotation};
use crate::error::{Error, Result};

/// One row of `kubectl get nodes -o wide --no-headers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub status: String,
    pub roles: String,
    pub version: String,
    pub internal_ip: String,
    pub external_ip: String,
}

impl Node {
    pub const MIN_FIELDS: usize = 7;

    pub fn is_ready(&self) -> bool {
        self.status == "Ready"
    }
}

impl FromStr for Node {
    type Err = Error;

    /// `name status roles age version internal-ip external-ip [os kernel runtime]`
    fn from_str(line: &str) -> Result<Self> {
        let f = fields(line, "node", Self::MIN_FIELDS)?;
        Ok(Self {
            name: f[0].to_string(),
            status: f[1].to_string(),
            roles: f[2].to_string(),
            version: f[4].to_string(),
            internal_ip: f[5].to_string(),
            external_ip: f[6].to_string(),
        })
    }
}

/// One row of `kubectl get pods -A -o wide --no-headers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    /// `ready/total` containers, e.g. `1/1`
    pub ready: String,
    pub status: String,
    /// Restart count, possibly followed by `(5m ago)`
    pub restarts: String,
    pub node_ip: String,
    pub node: String,
}

impl Pod {
    pub const MIN_FIELDS: usize = 8;

    /// Parsed container readiness
    pub fn ready_count(&self) -> Result<ReadyCount> {
        self.ready.parse()
    }

    /// Numeric part of the restarts column
    pub fn restart_count(&self) -> Option<u32> {
        self.restarts.split_whitespace().next()?.parse().ok()
    }
}

impl FromStr for Pod {
    type Err = Error;

    /// `namespace name ready status restarts age ip node [nominated gates]`
    fn from_str(line: &str) -> Result<Self> {
        let f = fold_restart_annotation(fields(line, "pod", 5)?);
        if f.len() < Self::MIN_FIELDS {
            return Err(Error::Parse {
                what: "pod",
                expected: Self::MIN_FIELDS,
                found: f.len(),
                line: line.to_string(),
            });
        }

        Ok(Self {
            namespace: f[0].clone(),
            name: f[1].clone(),
            ready: f[2].clone(),
            status: f[3].clone(),
            restarts: f[4].clone(),
            node_ip: f[6].clone(),
            node: f[7].clone(),
        })
    }
}

/// An object name with the addresses kubectl reported for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIps {
    pub name: String,
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
}

impl FromStr for ObjectIps {
    type Err = Error;

    /// `name [ipv4] [ipv6]`
    fn from_str(line: &str) -> Result<Self> {
        let mut f = fields(line, "object ips", 1)?.into_iter();
        let name = f.next().unwrap_or_default().to_string();
        Ok(Self {
            name,
            ipv4: f.next().map(str::to_string),
            ipv6: f.next().map(str::to_string),
        })
    }
}

/// Parsed `n/m` readiness column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyCount {
    pub ready: u32,
    pub total: u32,
}

impl ReadyCount {
    /// Every container of the pod is ready
    pub fn is_balanced(&self) -> bool {
        self.ready == self.total
    }
}

impl FromStr for ReadyCount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || Error::Parse {
            what: "ready count",
            expected: 2,
            found: s.split('/').count(),
            line: s.to_string(),
        };

        let (ready, total) = s.trim().split_once('/').ok_or_else(malformed)?;
        Ok(Self {
            ready: ready.parse().map_err(|_| malformed())?,
            total: total.parse().map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for ReadyCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ready, self.total)
    }
}
