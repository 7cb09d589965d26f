//! Whitespace tokenizer for kubectl table output

use super::types::{Node, ObjectIps, Pod};
use crate::error::{Error, Result};

/// Split `line` on whitespace, requiring at least `expected` fields
pub fn fields<'a>(line: &'a str, what: &'static str, expected: usize) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < expected {
        return Err(Error::Parse {
            what,
            expected,
            found: fields.len(),
            line: line.to_string(),
        });
    }
    Ok(fields)
}

/// Merge a `2 (5m ago)` restarts column back into one field.
///
/// Newer kubectl prints the time since the last restart after the count,
/// which shifts every later column by two.
pub(crate) fn fold_restart_annotation(fields: Vec<&str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(fields.len());
    let mut i = 0;
    while i < fields.len() {
        if i == 4 && fields.get(5).is_some_and(|f| f.starts_with('(')) {
            let end = fields[5..]
                .iter()
                .position(|f| f.ends_with(')'))
                .map(|p| 5 + p)
                .unwrap_or(5);
            out.push(fields[4..=end].join(" "));
            i = end + 1;
        } else {
            out.push(fields[i].to_string());
            i += 1;
        }
    }
    out
}

fn parse_lines<T>(output: &str) -> Result<Vec<T>>
where
    T: std::str::FromStr<Err = Error>,
{
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::parse)
        .collect()
}

/// Parse `kubectl get nodes -o wide --no-headers`
pub fn parse_nodes(output: &str) -> Result<Vec<Node>> {
    parse_lines(output)
}

/// Parse `kubectl get pods -A -o wide --no-headers`
pub fn parse_pods(output: &str) -> Result<Vec<Pod>> {
    parse_lines(output)
}

/// Parse `name ip [ip]` jsonpath listings
pub fn parse_object_ips(output: &str) -> Result<Vec<ObjectIps>> {
    parse_lines(output)
}

/// Names of nodes without a `NoSchedule` or `NoExecute` taint, from
/// `name effect...` lines
pub fn parse_schedulable(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let name = tokens.next()?;
            let tainted = tokens.any(|effect| effect == "NoSchedule" || effect == "NoExecute");
            (!tainted).then(|| name.to_string())
        })
        .collect()
}

/// Number of pods whose name contains `fragment`
pub fn count_pods_containing(fragment: &str, pods: &[Pod]) -> usize {
    pods.iter().filter(|pod| pod.name.contains(fragment)).count()
}
