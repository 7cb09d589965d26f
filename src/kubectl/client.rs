use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, instrument};

use super::parse::{parse_nodes, parse_object_ips, parse_pods, parse_schedulable};
use super::types::{Node, ObjectIps, Pod};
use crate::error::Result;
use crate::exec::{run_command_with, DEFAULT_COMMAND_TIMEOUT};

/// `kubectl` bound to one kubeconfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kubectl {
    kubeconfig: PathBuf,
    program: String,
    timeout: Duration,
}

impl Kubectl {
    pub fn new(kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            program: "kubectl".to_string(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Use another kubectl binary, e.g. the one shipped under
    /// `/var/lib/rancher/rke2/bin`
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    /// The kubectl binary, shell-quoted
    pub fn program(&self) -> String {
        shell_words::quote(&self.program).into_owned()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// ` --kubeconfig=<path>`, with the path shell-quoted
    pub fn kubeconfig_flag(&self) -> String {
        let path = self.kubeconfig.to_string_lossy();
        format!(" --kubeconfig={}", shell_words::quote(&path))
    }

    /// Full shell command line for `kubectl <args>`
    pub fn command(&self, args: &str) -> String {
        format!("{} {}{}", self.program(), args, self.kubeconfig_flag())
    }

    /// Run `kubectl <args>` on the host
    pub async fn run(&self, args: &str) -> Result<String> {
        run_command_with(&self.command(args), &[], self.timeout).await
    }

    #[instrument(skip(self))]
    pub async fn nodes(&self) -> Result<Vec<Node>> {
        let out = self.run("get nodes --no-headers -o wide").await?;
        debug!(output = %out.trim(), "kubectl get nodes");
        parse_nodes(&out)
    }

    #[instrument(skip(self))]
    pub async fn pods(&self) -> Result<Vec<Pod>> {
        let out = self.run("get pods -o wide --no-headers -A").await?;
        debug!(output = %out.trim(), "kubectl get pods");
        parse_pods(&out)
    }

    /// Nodes regular workloads can land on
    pub async fn schedulable_nodes(&self) -> Result<Vec<String>> {
        let out = self
            .run("get nodes -o jsonpath='{range .items[*]}{.metadata.name} {.spec.taints[*].effect}{\"\\n\"}{end}'")
            .await?;
        Ok(parse_schedulable(&out))
    }

    pub async fn apply(&self, manifest: &Path) -> Result<String> {
        let path = manifest.to_string_lossy();
        self.run(&format!("apply -f {}", shell_words::quote(&path))).await
    }

    pub async fn delete(&self, manifest: &Path) -> Result<String> {
        let path = manifest.to_string_lossy();
        self.run(&format!("delete -f {}", shell_words::quote(&path))).await
    }

    /// `kubectl get all -A`
    pub async fn get_all(&self) -> Result<String> {
        self.run("get all -A").await
    }

    /// ClusterIP of a service in the default namespace.
    ///
    /// With `dual_stack` every cluster IP is returned, comma separated.
    pub async fn cluster_ip(&self, service: &str, dual_stack: bool) -> Result<String> {
        if dual_stack {
            let out = self
                .run(&format!("get svc {} -o jsonpath='{{.spec.clusterIPs}}'", service))
                .await?;
            return Ok(out.replace('"', "").trim().trim_matches(['[', ']']).to_string());
        }
        let out = self
            .run(&format!("get svc {} -o jsonpath='{{.spec.clusterIP}}'", service))
            .await?;
        Ok(out.trim().to_string())
    }

    /// ClusterIP and first port of a service
    pub async fn cluster_ip_and_port(&self, namespace: &str, service: &str) -> Result<(String, String)> {
        let ip = self
            .run(&format!(
                "get svc {} -n {} -o jsonpath='{{.spec.clusterIP}}'",
                service, namespace
            ))
            .await?;
        let port = self
            .run(&format!(
                "get svc {} -n {} -o jsonpath='{{.spec.ports[0].port}}'",
                service, namespace
            ))
            .await?;
        Ok((ip.trim().to_string(), port.trim().to_string()))
    }

    /// Load balancer IPs of the first ingress in `namespace`; empty if none yet
    pub async fn ingress_ips(&self, namespace: &str) -> Result<Vec<String>> {
        let out = self
            .run(&format!(
                "get ingress -n {} -o jsonpath='{{.items[0].status.loadBalancer.ingress[*].ip}}'",
                namespace
            ))
            .await?;
        Ok(split_ips(&out))
    }

    pub async fn node_external_ips(&self) -> Result<Vec<String>> {
        let out = self
            .run(
                "get nodes --output=jsonpath='{.items[*].status.addresses[?(@.type==\"ExternalIP\")].address}'",
            )
            .await?;
        Ok(split_ips(&out))
    }

    pub async fn pod_ips_by_label(&self, label: &str) -> Result<Vec<ObjectIps>> {
        let out = self
            .run(&format!(
                "get pods -l {} -o=jsonpath='{{range .items[*]}}{{.metadata.name}}{{\" \"}}{{.status.podIPs[*].ip}}{{\"\\n\"}}{{end}}'",
                label
            ))
            .await?;
        parse_object_ips(&out)
    }

    pub async fn pod_ips(&self) -> Result<Vec<ObjectIps>> {
        let out = self
            .run("get pods -A -o=jsonpath='{range .items[*]}{.metadata.name}{\" \"}{.status.podIPs[*].ip}{\"\\n\"}{end}'")
            .await?;
        parse_object_ips(&out)
    }

    pub async fn node_ips(&self) -> Result<Vec<ObjectIps>> {
        let out = self
            .run("get nodes -o jsonpath='{range .items[*]}{.metadata.name}{\" \"}{.status.addresses[?(@.type == \"ExternalIP\")].address}{\"\\n\"}{end}'")
            .await?;
        parse_object_ips(&out)
    }

    pub async fn node_port(&self, namespace: &str, service: &str) -> Result<String> {
        let out = self
            .run(&format!(
                "get service {} -n {} -o jsonpath='{{.spec.ports[0].nodePort}}'",
                service, namespace
            ))
            .await?;
        Ok(out.trim().to_string())
    }

    /// Pods and nodes in wide format; a failure is reported inline
    pub async fn dump_resources(&self) -> String {
        let cmd = self.command("get pod,node -A -o wide");
        match run_command_with(&cmd, &[], self.timeout).await {
            Ok(out) => out,
            Err(e) => format!("Failed to run command {:?}: {}", cmd, e),
        }
    }
}

fn split_ips(out: &str) -> Vec<String> {
    out.split_whitespace().map(str::to_string).collect()
}
