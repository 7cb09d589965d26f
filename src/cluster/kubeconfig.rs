//! Kubeconfig retrieval from a server node

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_yaml::Value;
use tracing::info;

use crate::error::{Error, Result};
use crate::exec::CommandRunner;

/// Where RKE2 writes the admin kubeconfig on servers
pub const RKE2_KUBECONFIG: &str = "/etc/rancher/rke2/rke2.yaml";

const LOOPBACK: &str = "127.0.0.1";
const APISERVER_PORT: &str = ":6443";

/// Point every cluster `server:` URL at `host`, and at `port` when the
/// apiserver is published on a different host port
pub fn rewrite_server(raw: &str, host: &str, port: Option<u16>) -> Result<String> {
    let mut doc: Value = serde_yaml::from_str(raw)?;

    let clusters = doc
        .get_mut("clusters")
        .and_then(Value::as_sequence_mut)
        .ok_or_else(|| Error::invalid("kubeconfig has no clusters"))?;

    for entry in clusters.iter_mut() {
        let Some(server) = entry
            .get_mut("cluster")
            .and_then(|c| c.get_mut("server"))
        else {
            continue;
        };
        let Some(url) = server.as_str() else {
            continue;
        };

        let mut url = url.replacen(LOOPBACK, host, 1);
        if let Some(port) = port {
            url = url.replace(APISERVER_PORT, &format!(":{}", port));
        }
        *server = Value::String(url);
    }

    Ok(serde_yaml::to_string(&doc)?)
}

/// Copy the kubeconfig off `server`, rewrite it for `host`, and save it as
/// `kubeconfig-<server name>` in `dir`
pub async fn fetch_kubeconfig<R: CommandRunner>(
    server: &R,
    host: &str,
    port: Option<u16>,
    dir: &Path,
) -> Result<PathBuf> {
    let raw = server.run(&format!("cat {}", RKE2_KUBECONFIG)).await?;
    let rewritten = rewrite_server(&raw, host, port)?;

    let path = dir.join(format!("kubeconfig-{}", server.name()));
    tokio::fs::write(&path, rewritten).await?;
    info!(path = %path.display(), "Kubeconfig written");
    Ok(path)
}

/// Base64 of the kubeconfig file, for handing to CI jobs
pub async fn encode_base64(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(STANDARD.encode(bytes))
}
