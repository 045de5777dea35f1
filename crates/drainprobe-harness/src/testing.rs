//! In-memory collaborators for exercising the harness without a platform.
//!
//! [`FakeCloud`] models just enough of a platform to route drain traffic:
//! producers that are bound to a drain service pointing at a listener
//! address get their log lines copied into that listener's log buffer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;

use crate::address::ClientCredentials;
use crate::platform::{AppSpec, InstanceMetadata, LogFollower, PlatformControl, ProducerDriver};
use crate::stream::{LogBuffer, LogStream};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ── Instance metadata ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct MetadataEntry {
    text: String,
    failures_left: u32,
    calls: u32,
}

/// Environment text per `(app, instance)`, optionally failing a number of
/// times before answering.
#[derive(Debug, Default)]
pub struct FakeInstanceMetadata {
    entries: Mutex<HashMap<(String, u32), MetadataEntry>>,
}

impl FakeInstanceMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, app: &str, index: u32, text: String) {
        self.set_after(app, index, 0, text);
    }

    /// Answer with `text` only after `failures` failed calls.
    pub fn set_after(&self, app: &str, index: u32, failures: u32, text: String) {
        let mut entries = lock(&self.entries);
        let entry = entries.entry((app.to_string(), index)).or_default();
        entry.text = text;
        entry.failures_left = failures;
    }

    pub fn calls(&self, app: &str, index: u32) -> u32 {
        lock(&self.entries)
            .get(&(app.to_string(), index))
            .map(|e| e.calls)
            .unwrap_or(0)
    }
}

#[async_trait]
impl InstanceMetadata for FakeInstanceMetadata {
    async fn environment_text(&self, app: &str, index: u32) -> anyhow::Result<String> {
        let mut entries = lock(&self.entries);
        let entry = entries
            .get_mut(&(app.to_string(), index))
            .ok_or_else(|| anyhow!("instance {index} of {app} is not running"))?;
        entry.calls += 1;
        if entry.failures_left > 0 {
            entry.failures_left -= 1;
            bail!("ssh to instance {index} of {app} refused");
        }
        Ok(entry.text.clone())
    }
}

// ── Producer driver ─────────────────────────────────────────────────

/// Records every log request; can be told to fail, stall or panic per
/// producer.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    calls: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, producer: &str) {
        lock(&self.failing).insert(producer.to_string());
    }

    pub fn panic_for(&self, producer: &str) {
        lock(&self.panicking).insert(producer.to_string());
    }

    pub fn delay_for(&self, producer: &str, delay: Duration) {
        lock(&self.delays).insert(producer.to_string(), delay);
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ProducerDriver for RecordingDriver {
    async fn trigger_log_line(
        &self,
        producer: &str,
        path: &str,
        _timeout: Duration,
    ) -> anyhow::Result<()> {
        lock(&self.calls).push((producer.to_string(), path.to_string()));
        if lock(&self.panicking).contains(producer) {
            panic!("driver exploded for {producer}");
        }
        let delay = lock(&self.delays).get(producer).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing).contains(producer) {
            bail!("{producer} answered 502");
        }
        Ok(())
    }
}

// ── Fake platform ───────────────────────────────────────────────────

#[derive(Debug)]
struct FakeApp {
    /// Push order, which decides the instance IPs.
    index: usize,
    spec: AppSpec,
    logs: LogBuffer,
    /// `host:port` strings this app accepts drain traffic on.
    listens_on: Vec<String>,
}

#[derive(Debug, Clone)]
struct FakeService {
    url: String,
    credentials: Option<ClientCredentials>,
}

#[derive(Debug, Default)]
struct CloudState {
    apps: BTreeMap<String, FakeApp>,
    services: BTreeMap<String, FakeService>,
    bindings: Vec<(String, String)>,
    domains: Vec<(String, String)>,
    /// Every platform call, in order, as `"verb target"`.
    journal: Vec<String>,
    fail_steps: HashSet<String>,
    blackholed: HashSet<String>,
    leak_all: bool,
    orphaned_routes_deleted: u32,
}

/// A tiny platform: apps, user-provided drain services, bindings, TCP
/// routes and log streams, all in memory.
#[derive(Debug)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
    router_groups: Vec<(String, String)>,
    next_port: AtomicU16,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            router_groups: vec![("default-tcp".to_string(), "tcp".to_string())],
            next_port: AtomicU16::new(61000),
        }
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named call (`push`, `cups`, `bind-service`, `delete`, ...)
    /// fail every time.
    pub fn fail_step(&self, verb: &str) {
        lock(&self.state).fail_steps.insert(verb.to_string());
    }

    /// Deliver drain traffic to every listener regardless of bindings,
    /// simulating broken selective routing.
    pub fn leak_all_drain_traffic(&self) {
        lock(&self.state).leak_all = true;
    }

    /// Silently discard drain traffic addressed to `host:port`.
    pub fn blackhole(&self, address: &str) {
        lock(&self.state).blackholed.insert(address.to_string());
    }

    pub fn journal(&self) -> Vec<String> {
        lock(&self.state).journal.clone()
    }

    pub fn app_names(&self) -> Vec<String> {
        lock(&self.state).apps.keys().cloned().collect()
    }

    pub fn service_names(&self) -> Vec<String> {
        lock(&self.state).services.keys().cloned().collect()
    }

    pub fn service_url(&self, name: &str) -> Option<String> {
        lock(&self.state).services.get(name).map(|s| s.url.clone())
    }

    pub fn service_has_credentials(&self, name: &str) -> bool {
        lock(&self.state)
            .services
            .get(name)
            .is_some_and(|s| s.credentials.is_some())
    }

    pub fn bindings(&self) -> Vec<(String, String)> {
        lock(&self.state).bindings.clone()
    }

    pub fn shared_domains(&self) -> Vec<(String, String)> {
        lock(&self.state).domains.clone()
    }

    pub fn orphaned_routes_deleted(&self) -> u32 {
        lock(&self.state).orphaned_routes_deleted
    }

    fn record(&self, verb: &str, target: &str) -> anyhow::Result<MutexGuard<'_, CloudState>> {
        let mut state = lock(&self.state);
        state.journal.push(format!("{verb} {target}"));
        if state.fail_steps.contains(verb) {
            bail!("cf {verb} {target} exited with status 1");
        }
        Ok(state)
    }

    fn instance_ips(app_index: usize, instance: u32) -> (String, String) {
        (
            format!("10.255.{app_index}.{}", instance + 1),
            format!("10.0.{app_index}.{}", instance + 1),
        )
    }
}

fn drain_host_port(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

#[async_trait]
impl PlatformControl for FakeCloud {
    async fn push(&self, app: &AppSpec) -> anyhow::Result<()> {
        let mut state = self.record("push", &app.name)?;
        let app_index = state.apps.len();
        let mut listens_on = Vec::new();
        for instance in 0..app.instances {
            let (internal, external) = Self::instance_ips(app_index, instance);
            let port = self.next_port.fetch_add(1, Ordering::Relaxed);
            listens_on.push(format!("{internal}:8080"));
            listens_on.push(format!("{external}:{port}"));
        }
        state.apps.insert(
            app.name.clone(),
            FakeApp {
                index: app_index,
                spec: app.clone(),
                logs: LogBuffer::new(),
                listens_on,
            },
        );
        Ok(())
    }

    async fn create_user_provided_service(
        &self,
        name: &str,
        drain_url: &str,
        credentials: Option<&ClientCredentials>,
    ) -> anyhow::Result<()> {
        let mut state = self.record("cups", name)?;
        state.services.insert(
            name.to_string(),
            FakeService {
                url: drain_url.to_string(),
                credentials: credentials.cloned(),
            },
        );
        Ok(())
    }

    async fn bind_service(&self, app: &str, service: &str) -> anyhow::Result<()> {
        let mut state = self.record("bind-service", &format!("{app} {service}"))?;
        if !state.apps.contains_key(app) {
            bail!("app {app} not found");
        }
        if !state.services.contains_key(service) {
            bail!("service instance {service} not found");
        }
        state.bindings.push((app.to_string(), service.to_string()));
        Ok(())
    }

    async fn router_group_exists(&self, name: &str, kind: &str) -> anyhow::Result<bool> {
        drop(self.record("router-groups", name)?);
        Ok(self
            .router_groups
            .iter()
            .any(|(n, k)| n == name && k == kind))
    }

    async fn create_shared_domain(&self, domain: &str, router_group: &str) -> anyhow::Result<()> {
        let mut state = self.record("create-shared-domain", domain)?;
        state
            .domains
            .push((domain.to_string(), router_group.to_string()));
        Ok(())
    }

    async fn map_tcp_route(&self, app: &str, domain: &str) -> anyhow::Result<u16> {
        let mut state = self.record("map-route", &format!("{app} {domain}"))?;
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let fake = state
            .apps
            .get_mut(app)
            .ok_or_else(|| anyhow!("app {app} not found"))?;
        fake.listens_on.push(format!("{domain}:{port}"));
        Ok(port)
    }

    async fn app_report(&self, app: &str) -> anyhow::Result<String> {
        let state = self.record("app-report", app)?;
        let fake = state
            .apps
            .get(app)
            .ok_or_else(|| anyhow!("app {app} not found"))?;
        Ok(format!(
            "{}: {} instance(s), {} bytes of logs",
            app,
            fake.spec.instances,
            fake.logs.len()
        ))
    }

    async fn delete_app(&self, app: &str) -> anyhow::Result<()> {
        let mut state = self.record("delete", app)?;
        state.apps.remove(app);
        state.bindings.retain(|(a, _)| a != app);
        Ok(())
    }

    async fn delete_service(&self, service: &str) -> anyhow::Result<()> {
        let mut state = self.record("delete-service", service)?;
        state.services.remove(service);
        state.bindings.retain(|(_, s)| s != service);
        Ok(())
    }

    async fn delete_orphaned_routes(&self) -> anyhow::Result<()> {
        let mut state = self.record("delete-orphaned-routes", "-f")?;
        state.orphaned_routes_deleted += 1;
        Ok(())
    }
}

#[async_trait]
impl InstanceMetadata for FakeCloud {
    async fn environment_text(&self, app: &str, index: u32) -> anyhow::Result<String> {
        let state = lock(&self.state);
        let fake = state
            .apps
            .get(app)
            .ok_or_else(|| anyhow!("app {app} not found"))?;
        if index >= fake.spec.instances {
            bail!("instance {index} of {app} does not exist");
        }

        let (internal, external) = Self::instance_ips(fake.index, index);
        let external_port = fake
            .listens_on
            .iter()
            .find_map(|addr| addr.strip_prefix(&format!("{external}:")))
            .ok_or_else(|| anyhow!("no external port for instance {index} of {app}"))?;

        Ok(format!(
            "HOME=/home/vcap/app\n\
             CF_INSTANCE_INDEX={index}\n\
             CF_INSTANCE_INTERNAL_IP={internal}\n\
             CF_INSTANCE_IP={external}\n\
             CF_INSTANCE_PORTS=[{{\"external\":{external_port},\"internal\":8080}}]\n"
        ))
    }
}

#[async_trait]
impl ProducerDriver for FakeCloud {
    async fn trigger_log_line(
        &self,
        producer: &str,
        path: &str,
        _timeout: Duration,
    ) -> anyhow::Result<()> {
        let state = lock(&self.state);
        let app = state
            .apps
            .get(producer)
            .ok_or_else(|| anyhow!("404 Not Found: Requested route does not exist"))?;
        let line = format!("[APP/PROC/WEB/0] OUT GET {path} 200");
        app.logs.append_line(&line);

        let bound: Vec<&FakeService> = state
            .bindings
            .iter()
            .filter(|(a, _)| a == producer)
            .filter_map(|(_, s)| state.services.get(s))
            .collect();

        for listener in state.apps.values() {
            let reachable = bound.iter().any(|svc| {
                let target = drain_host_port(&svc.url);
                !state.blackholed.contains(target) && listener.listens_on.iter().any(|a| a == target)
            });
            if (reachable || (state.leak_all && !listener.listens_on.is_empty()))
                && listener.spec.name != producer
            {
                listener
                    .logs
                    .append_line(&format!("[APP/PROC/WEB/0] OUT received syslog: {line}"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LogFollower for FakeCloud {
    async fn follow(&self, app: &str) -> anyhow::Result<LogStream> {
        let state = self.record("logs", app)?;
        let fake = state
            .apps
            .get(app)
            .ok_or_else(|| anyhow!("app {app} not found"))?;
        Ok(LogStream::detached(app, fake.logs.clone()))
    }
}
