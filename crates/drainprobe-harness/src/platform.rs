//! Interfaces of the external collaborators the harness drives.
//!
//! Every call is fallible; the scenario treats a failure as fatal for the
//! step that made it.

use std::time::Duration;

use async_trait::async_trait;

use crate::address::ClientCredentials;
use crate::stream::LogStream;

/// What to push for one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSpec {
    pub name: String,
    pub buildpack: String,
    pub memory_limit: String,
    pub path: String,
    pub manifest: Option<String>,
    pub instances: u32,
    /// Use a port health check instead of the platform default.
    pub port_health_check: bool,
}

impl AppSpec {
    pub fn new(name: impl Into<String>, buildpack: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            buildpack: buildpack.into(),
            memory_limit: "256M".into(),
            path: path.into(),
            manifest: None,
            instances: 1,
            port_health_check: false,
        }
    }
}

/// Application, service and routing management.
#[async_trait]
pub trait PlatformControl: Send + Sync {
    async fn push(&self, app: &AppSpec) -> anyhow::Result<()>;

    async fn create_user_provided_service(
        &self,
        name: &str,
        drain_url: &str,
        credentials: Option<&ClientCredentials>,
    ) -> anyhow::Result<()>;

    async fn bind_service(&self, app: &str, service: &str) -> anyhow::Result<()>;

    /// Whether a router group of the given type (e.g. `tcp`) exists.
    async fn router_group_exists(&self, name: &str, kind: &str) -> anyhow::Result<bool>;

    async fn create_shared_domain(&self, domain: &str, router_group: &str) -> anyhow::Result<()>;

    /// Map a TCP route on `domain` to `app`, returning the assigned port.
    async fn map_tcp_route(&self, app: &str, domain: &str) -> anyhow::Result<u16>;

    /// Dump diagnostics for an app. Only ever logged.
    async fn app_report(&self, app: &str) -> anyhow::Result<String>;

    async fn delete_app(&self, app: &str) -> anyhow::Result<()>;

    async fn delete_service(&self, service: &str) -> anyhow::Result<()>;

    async fn delete_orphaned_routes(&self) -> anyhow::Result<()>;
}

/// Access to the environment of a running app instance.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    /// Raw `env` output of instance `index` of `app`.
    async fn environment_text(&self, app: &str, index: u32) -> anyhow::Result<String>;
}

/// Makes a producer app emit a log line.
#[async_trait]
pub trait ProducerDriver: Send + Sync {
    /// Request `path` from `producer`; the producer logs the path fragment.
    async fn trigger_log_line(
        &self,
        producer: &str,
        path: &str,
        timeout: Duration,
    ) -> anyhow::Result<()>;
}

/// Opens a live log stream of an app.
#[async_trait]
pub trait LogFollower: Send + Sync {
    async fn follow(&self, app: &str) -> anyhow::Result<LogStream>;
}
