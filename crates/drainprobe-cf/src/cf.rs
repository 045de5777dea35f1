//! Platform control and instance metadata through the `cf` CLI.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use drainprobe_harness::config::HarnessConfig;
use drainprobe_harness::platform::{AppSpec, InstanceMetadata, PlatformControl};
use drainprobe_harness::ClientCredentials;

use crate::exec;

/// Drives a logged-in `cf` CLI. Calls are sequential and each one is
/// bounded by its own timeout.
#[derive(Debug, Clone)]
pub struct CfCli {
    bin: String,
    default_timeout: Duration,
    push_timeout: Duration,
}

impl CfCli {
    pub fn new(bin: impl Into<String>, default_timeout: Duration, push_timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            default_timeout,
            push_timeout,
        }
    }

    pub fn from_config(config: &HarnessConfig) -> Self {
        Self::new(
            config.cf_bin.clone(),
            config.timeouts.default_timeout,
            config.timeouts.push_timeout,
        )
    }

    async fn cf(&self, args: Vec<String>) -> anyhow::Result<String> {
        exec::run(&self.bin, &args, self.default_timeout).await
    }

    async fn cf_slow(&self, args: Vec<String>) -> anyhow::Result<String> {
        exec::run(&self.bin, &args, self.push_timeout).await
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn push_args(app: &AppSpec) -> Vec<String> {
    let mut args = strings([
        "push",
        app.name.as_str(),
        "-b",
        app.buildpack.as_str(),
        "-m",
        app.memory_limit.as_str(),
        "-p",
        app.path.as_str(),
    ]);
    if let Some(manifest) = &app.manifest {
        args.extend(strings(["-f", manifest.as_str()]));
    }
    if app.instances != 1 {
        args.extend(strings(["-i", app.instances.to_string().as_str()]));
    }
    if app.port_health_check {
        args.extend(strings(["--health-check-type", "port"]));
    }
    args
}

pub(crate) fn cups_args(
    name: &str,
    drain_url: &str,
    credentials: Option<&ClientCredentials>,
) -> Vec<String> {
    let mut args = strings(["cups", name, "-l", drain_url]);
    if let Some(creds) = credentials {
        args.extend(strings(["-p", creds.to_json().as_str()]));
    }
    args
}

/// Whether `cf router-groups` output lists `name` with type `kind`.
pub(crate) fn router_group_listed(output: &str, name: &str, kind: &str) -> bool {
    output.lines().any(|line| {
        let mut cols = line.split_whitespace();
        cols.next() == Some(name) && cols.next() == Some(kind)
    })
}

/// Port of the first `domain:<port>` mention in `cf map-route` output.
pub(crate) fn mapped_port(output: &str, domain: &str) -> Option<u16> {
    let needle = format!("{domain}:");
    output.match_indices(&needle).find_map(|(at, _)| {
        let digits: String = output[at + needle.len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    })
}

#[async_trait]
impl PlatformControl for CfCli {
    async fn push(&self, app: &AppSpec) -> anyhow::Result<()> {
        self.cf_slow(push_args(app)).await.map(drop)
    }

    async fn create_user_provided_service(
        &self,
        name: &str,
        drain_url: &str,
        credentials: Option<&ClientCredentials>,
    ) -> anyhow::Result<()> {
        self.cf(cups_args(name, drain_url, credentials))
            .await
            .map(drop)
    }

    async fn bind_service(&self, app: &str, service: &str) -> anyhow::Result<()> {
        self.cf(strings(["bind-service", app, service])).await.map(drop)
    }

    async fn router_group_exists(&self, name: &str, kind: &str) -> anyhow::Result<bool> {
        let output = self.cf(strings(["router-groups"])).await?;
        Ok(router_group_listed(&output, name, kind))
    }

    async fn create_shared_domain(&self, domain: &str, router_group: &str) -> anyhow::Result<()> {
        self.cf(strings([
            "create-shared-domain",
            domain,
            "--router-group",
            router_group,
        ]))
        .await
        .map(drop)
    }

    async fn map_tcp_route(&self, app: &str, domain: &str) -> anyhow::Result<u16> {
        let output = self.cf(strings(["map-route", app, domain])).await?;
        mapped_port(&output, domain)
            .ok_or_else(|| anyhow!("no port for {domain} in map-route output: {}", output.trim()))
    }

    async fn app_report(&self, app: &str) -> anyhow::Result<String> {
        self.cf(strings(["app", app])).await
    }

    async fn delete_app(&self, app: &str) -> anyhow::Result<()> {
        self.cf(strings(["delete", app, "-f", "-r"])).await.map(drop)
    }

    async fn delete_service(&self, service: &str) -> anyhow::Result<()> {
        self.cf(strings(["delete-service", service, "-f"]))
            .await
            .map(drop)
    }

    async fn delete_orphaned_routes(&self) -> anyhow::Result<()> {
        self.cf_slow(strings(["delete-orphaned-routes", "-f"]))
            .await
            .map(drop)
    }
}

#[async_trait]
impl InstanceMetadata for CfCli {
    async fn environment_text(&self, app: &str, index: u32) -> anyhow::Result<String> {
        self.cf(strings(["ssh", app, "-c", "env", "-i", index.to_string().as_str()]))
            .await
    }
}
