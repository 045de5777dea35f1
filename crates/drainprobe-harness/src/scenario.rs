//! The drain verification scenario.
//!
//! ```text
//! Idle -> Provisioning -> Emitting -> Asserting -> TearingDown -> Done
//! ```
//!
//! Any failure before `TearingDown` skips straight to it; teardown always
//! runs and never overrides the verdict.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::address::{DrainScheme, DrainTarget, ResolvedAddress};
use crate::assertions::{assert_token_absent, await_token};
use crate::config::HarnessConfig;
use crate::emitter::{EmissionController, EmissionSettings};
use crate::error::{panic_message, HarnessError};
use crate::names::NameSource;
use crate::platform::{AppSpec, InstanceMetadata, LogFollower, PlatformControl, ProducerDriver};
use crate::resolver::{resolve_addresses, worst_case_duration};
use crate::stream::LogStream;

// ── Modes ───────────────────────────────────────────────────────────

/// How the listener is reached by the drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    /// Pick from the configuration: TCP routing when it is enabled.
    Auto,
    /// Drains point at the resolved external and internal address of every
    /// listener instance.
    IpBased,
    /// A single drain points at a TCP route on the shared TCP domain.
    TcpRouting,
}

impl RoutingMode {
    /// Resolve `Auto` against `config`; explicit modes are kept.
    pub fn for_config(self, config: &HarnessConfig) -> Self {
        match self {
            Self::Auto if config.include_tcp_routing => Self::TcpRouting,
            Self::Auto => Self::IpBased,
            explicit => explicit,
        }
    }
}

/// Which producers get bound to the drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMode {
    /// Only the first producer; the second must never show up.
    Selective,
    /// Both producers; both must show up.
    AllProducers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioPhase {
    Idle,
    Provisioning,
    Emitting,
    Asserting,
    TearingDown,
    Done,
}

impl BindingMode {
    fn scenario_name(self) -> &'static str {
        match self {
            Self::Selective => "drain receives only the bound producer's messages",
            Self::AllProducers => "drain receives messages from every bound producer",
        }
    }
}

impl fmt::Display for ScenarioPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::Emitting => "emitting",
            Self::Asserting => "asserting",
            Self::TearingDown => "tearing-down",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

// ── Collaborators ───────────────────────────────────────────────────

/// Everything the scenario talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub platform: Arc<dyn PlatformControl>,
    pub metadata: Arc<dyn InstanceMetadata>,
    pub driver: Arc<dyn ProducerDriver>,
    pub logs: Arc<dyn LogFollower>,
    pub names: Arc<dyn NameSource>,
}

impl Collaborators {
    /// Use one object for every platform-facing role.
    pub fn from_platform<P>(platform: Arc<P>, names: Arc<dyn NameSource>) -> Self
    where
        P: PlatformControl + InstanceMetadata + ProducerDriver + LogFollower + 'static,
    {
        Self {
            platform: platform.clone(),
            metadata: platform.clone(),
            driver: platform.clone(),
            logs: platform,
            names,
        }
    }
}

// ── Report ──────────────────────────────────────────────────────────

/// The single verdict of one scenario run.
#[derive(Debug)]
pub struct ScenarioReport {
    pub name: String,
    pub routing: RoutingMode,
    pub binding: BindingMode,
    /// Phase the scenario was in when it stopped verifying.
    pub last_phase: ScenarioPhase,
    pub outcome: Result<(), HarnessError>,
    pub drain_urls: Vec<String>,
    /// Faults of emission workers, also reflected in `outcome`.
    pub worker_faults: Vec<HarnessError>,
    /// Cleanup steps that failed. They never change the verdict.
    pub teardown_issues: Vec<String>,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn verdict(&self) -> String {
        match &self.outcome {
            Ok(()) => format!(
                "PASS [{}] via {} drain(s) ({:?})",
                self.name,
                self.drain_urls.len(),
                self.routing
            ),
            Err(e) => format!("FAIL [{}] during {}: {e}", self.name, self.last_phase),
        }
    }
}

// ── Scenario ────────────────────────────────────────────────────────

struct FixtureNames {
    listener: String,
    bound_writer: String,
    other_writer: String,
}

/// Resources acquired so far; teardown releases whatever is in here.
struct ScenarioState {
    phase: ScenarioPhase,
    apps: Vec<String>,
    services: Vec<String>,
    drain_urls: Vec<String>,
    emission: Option<EmissionController>,
    stream: Option<LogStream>,
}

impl ScenarioState {
    fn new() -> Self {
        Self {
            phase: ScenarioPhase::Idle,
            apps: Vec::new(),
            services: Vec::new(),
            drain_urls: Vec::new(),
            emission: None,
            stream: None,
        }
    }

    fn enter(&mut self, phase: ScenarioPhase) {
        tracing::info!(from = %self.phase, to = %phase, "scenario phase");
        self.phase = phase;
    }
}

pub struct DrainScenario {
    config: HarnessConfig,
    routing: RoutingMode,
    binding: BindingMode,
    collab: Collaborators,
    interrupt: Option<watch::Receiver<bool>>,
}

impl DrainScenario {
    pub fn new(config: HarnessConfig, collab: Collaborators) -> Self {
        let routing = RoutingMode::Auto.for_config(&config);
        Self {
            config,
            routing,
            binding: BindingMode::Selective,
            collab,
            interrupt: None,
        }
    }

    pub fn with_routing(mut self, routing: RoutingMode) -> Self {
        self.routing = routing.for_config(&self.config);
        self
    }

    pub fn with_binding(mut self, binding: BindingMode) -> Self {
        self.binding = binding;
        self
    }

    /// Stop verifying once `interrupt` turns true; teardown still runs.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Run the scenario to completion, including teardown.
    pub async fn run(mut self) -> ScenarioReport {
        let started = Instant::now();
        let mut state = ScenarioState::new();
        let interrupt = self.interrupt.take();

        tracing::info!(routing = ?self.routing, binding = ?self.binding, "drain scenario starting");

        let outcome = {
            let verify = AssertUnwindSafe(self.provision_and_verify(&mut state))
                .catch_unwind()
                .map(|result| {
                    result.unwrap_or_else(|payload| {
                        Err(HarnessError::ScenarioPanicked(panic_message(payload.as_ref())))
                    })
                });
            match interrupt {
                Some(rx) => tokio::select! {
                    outcome = verify => outcome,
                    _ = interrupted(rx) => Err(HarnessError::Interrupted),
                },
                None => verify.await,
            }
        };

        let last_phase = state.phase;
        if let Err(e) = &outcome {
            tracing::error!(phase = %last_phase, error = %e, "drain scenario failed");
        }

        let drain_urls = std::mem::take(&mut state.drain_urls);
        let (worker_faults, teardown_issues) = self.teardown(state).await;

        let outcome = match (outcome, worker_faults.first()) {
            (Ok(()), Some(HarnessError::WorkerFault { producer, message })) => {
                Err(HarnessError::WorkerFault {
                    producer: producer.clone(),
                    message: message.clone(),
                })
            }
            (outcome, _) => outcome,
        };

        let report = ScenarioReport {
            name: self.binding.scenario_name().to_string(),
            routing: self.routing,
            binding: self.binding,
            last_phase,
            outcome,
            drain_urls,
            worker_faults,
            teardown_issues,
            elapsed: started.elapsed(),
        };

        if report.passed() {
            tracing::info!(elapsed_s = report.elapsed.as_secs(), "{}", report.verdict());
        } else {
            tracing::error!(elapsed_s = report.elapsed.as_secs(), "{}", report.verdict());
        }
        report
    }

    /// Run a platform call with an upper bound, tagging failures with `step`.
    async fn step<T>(
        &self,
        step: &str,
        limit: Duration,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T, HarnessError> {
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(HarnessError::provisioning(step, e)),
            Err(_) => Err(HarnessError::provisioning(
                step,
                anyhow::anyhow!("timed out after {limit:?}"),
            )),
        }
    }

    fn app_spec(&self, name: &str, listener: bool, instances: u32) -> AppSpec {
        let assets = &self.config.assets;
        let (buildpack, path) = if listener {
            (&assets.go_buildpack, &assets.listener_path)
        } else {
            (&assets.ruby_buildpack, &assets.writer_path)
        };
        AppSpec {
            name: name.to_string(),
            buildpack: buildpack.clone(),
            memory_limit: assets.memory_limit.clone(),
            path: path.clone(),
            manifest: listener.then(|| format!("{path}/manifest.yml")),
            instances,
            port_health_check: listener,
        }
    }

    async fn push(&self, state: &mut ScenarioState, spec: AppSpec) -> Result<(), HarnessError> {
        // Recorded up front: a failed push can still leave an app behind.
        state.apps.push(spec.name.clone());
        tracing::info!(app = %spec.name, instances = spec.instances, "pushing app");
        self.step(
            &format!("push {}", spec.name),
            self.config.timeouts.push_timeout,
            self.collab.platform.push(&spec),
        )
        .await
    }

    async fn prepare_tcp_domain(&self) -> Result<String, HarnessError> {
        let t = &self.config.timeouts;
        let domain = self.config.tcp_domain().ok_or_else(|| {
            HarnessError::Config(crate::error::ConfigError::MissingAppsDomain)
        })?;
        let group = &self.config.router_group;

        let exists = self
            .step(
                "router-groups",
                t.default_timeout,
                self.collab.platform.router_group_exists(group, "tcp"),
            )
            .await?;
        if !exists {
            return Err(HarnessError::provisioning(
                "router-groups",
                anyhow::anyhow!("router group {group} of type tcp doesn't exist"),
            ));
        }

        // The domain usually survives earlier runs, so failing to create it
        // again is expected.
        if let Err(e) = self
            .step(
                &format!("create-shared-domain {domain}"),
                t.default_timeout,
                self.collab.platform.create_shared_domain(&domain, group),
            )
            .await
        {
            tracing::warn!(domain = %domain, error = %e, "shared domain not created, assuming it exists");
        }
        Ok(domain)
    }

    async fn ip_drain_targets(
        &self,
        listener: &str,
    ) -> Result<Vec<(String, DrainTarget)>, HarnessError> {
        let retry = &self.config.resolve;
        tracing::info!(
            listener,
            instances = self.config.listener_instances,
            max_wait_s = worst_case_duration(self.config.listener_instances, retry).as_secs(),
            "resolving listener addresses"
        );
        let addresses = resolve_addresses(
            self.collab.metadata.as_ref(),
            listener,
            self.config.listener_instances,
            retry,
        )
        .await?;

        let scheme = self.config.drain_scheme();
        let targets = addresses
            .into_iter()
            .enumerate()
            .map(|(i, address)| {
                let instance = i / 2 + 1;
                let kind = if i % 2 == 0 {
                    format!("SVIN{instance}")
                } else {
                    format!("SVIN-INT{instance}")
                };
                let target = DrainTarget {
                    address,
                    scheme,
                    credentials: self.config.credentials.clone(),
                };
                (self.collab.names.unique(&kind), target)
            })
            .collect();
        Ok(targets)
    }

    async fn provision_and_verify(&self, state: &mut ScenarioState) -> Result<(), HarnessError> {
        let t = self.config.timeouts;
        let names = self.collab.names.as_ref();

        state.enter(ScenarioPhase::Provisioning);
        let fixture = FixtureNames {
            listener: names.unique("APP-SYSLOG-LISTENER"),
            bound_writer: names.unique("APP-FIRST-LOG-WRITER"),
            other_writer: names.unique("APP-SECOND-LOG-WRITER"),
        };

        // `routing` never stays `Auto` past construction.
        let tcp_routing = self.routing == RoutingMode::TcpRouting;
        let tcp_domain = if tcp_routing {
            Some(self.prepare_tcp_domain().await?)
        } else {
            None
        };

        let listener_instances = if tcp_routing {
            1
        } else {
            self.config.listener_instances
        };
        self.push(
            state,
            self.app_spec(&fixture.listener, true, listener_instances),
        )
        .await?;

        let tcp_port = match &tcp_domain {
            Some(domain) => Some(
                self.step(
                    &format!("map-route {} {domain}", fixture.listener),
                    t.default_timeout,
                    self.collab.platform.map_tcp_route(&fixture.listener, domain),
                )
                .await?,
            ),
            None => None,
        };

        self.push(state, self.app_spec(&fixture.bound_writer, false, 1))
            .await?;
        self.push(state, self.app_spec(&fixture.other_writer, false, 1))
            .await?;

        let targets = match (tcp_domain, tcp_port) {
            (Some(domain), Some(port)) => vec![(
                names.unique("SVIN1"),
                DrainTarget {
                    address: ResolvedAddress::new(domain, port),
                    scheme: DrainScheme::Syslog,
                    credentials: None,
                },
            )],
            _ => self.ip_drain_targets(&fixture.listener).await?,
        };

        let mut bound = vec![fixture.bound_writer.as_str()];
        if self.binding == BindingMode::AllProducers {
            bound.push(fixture.other_writer.as_str());
        }

        for (service, target) in &targets {
            let url = target.url();
            state.services.push(service.clone());
            tracing::info!(service = %service, url = %url, tls_client_auth = target.credentials.is_some(), "registering drain");
            self.step(
                &format!("create-user-provided-service {service}"),
                t.default_timeout,
                self.collab.platform.create_user_provided_service(
                    service,
                    &url,
                    target.credentials.as_ref(),
                ),
            )
            .await?;
            state.drain_urls.push(url);

            // Syslog bindings do not touch the app environment, so no
            // restage is needed.
            for app in &bound {
                self.step(
                    &format!("bind-service {app} {service}"),
                    t.default_timeout,
                    self.collab.platform.bind_service(app, service),
                )
                .await?;
            }
        }

        state.enter(ScenarioPhase::Emitting);
        let bound_tag = names.unique("RANDOM-MESSAGE-A");
        let other_tag = names.unique("RANDOM-MESSAGE-B");

        let stream = self
            .step(
                &format!("logs {}", fixture.listener),
                t.default_timeout,
                self.collab.logs.follow(&fixture.listener),
            )
            .await?;
        let buffer = stream.buffer().clone();
        state.stream = Some(stream);

        let mut emission = EmissionController::new(
            self.collab.driver.clone(),
            EmissionSettings {
                interval: t.emit_interval,
                request_timeout: t.default_timeout,
            },
        );
        emission.spawn(&fixture.bound_writer, &bound_tag);
        emission.spawn(&fixture.other_writer, &other_tag);
        state.emission = Some(emission);

        state.enter(ScenarioPhase::Asserting);
        let waited = await_token(&buffer, &bound_tag, t.delivery_budget).await?;
        tracing::info!(tag = %bound_tag, waited_s = waited.as_secs_f64(), "bound producer reached the drain");

        match self.binding {
            BindingMode::Selective => {
                assert_token_absent(&buffer, &other_tag, t.absence_window).await?;
                tracing::info!(
                    tag = %other_tag,
                    window_s = t.absence_window.as_secs(),
                    "unbound producer never reached the drain"
                );
            }
            BindingMode::AllProducers => {
                let waited = await_token(&buffer, &other_tag, t.delivery_budget).await?;
                tracing::info!(tag = %other_tag, waited_s = waited.as_secs_f64(), "second producer reached the drain");
            }
        }
        Ok(())
    }

    /// Release everything in `state`. Returns worker faults and cleanup
    /// failures; neither stops the remaining cleanup.
    async fn teardown(&self, mut state: ScenarioState) -> (Vec<HarnessError>, Vec<String>) {
        let t = self.config.timeouts;
        state.enter(ScenarioPhase::TearingDown);

        if let Some(emission) = &state.emission {
            emission.cancel_all();
        }
        if let Some(stream) = state.stream.as_mut() {
            stream.close();
        }
        let worker_faults = match state.emission.take() {
            Some(emission) => {
                let (reports, faults) = emission.shutdown(t.worker_grace).await;
                for report in &reports {
                    tracing::debug!(producer = %report.producer, requests = ?report.requests, "emission summary");
                }
                faults
            }
            None => Vec::new(),
        };

        let mut issues = Vec::new();
        let platform = self.collab.platform.as_ref();

        for app in &state.apps {
            match self
                .step("app report", t.default_timeout, platform.app_report(app))
                .await
            {
                Ok(report) => tracing::info!(app = %app, report = %report, "app report"),
                Err(e) => tracing::warn!(app = %app, error = %e, "app report unavailable"),
            }
        }

        for app in &state.apps {
            if let Err(e) = self
                .step(&format!("delete {app}"), t.default_timeout, platform.delete_app(app))
                .await
            {
                issues.push(e.to_string());
            }
        }
        for service in &state.services {
            if let Err(e) = self
                .step(
                    &format!("delete-service {service}"),
                    t.default_timeout,
                    platform.delete_service(service),
                )
                .await
            {
                issues.push(e.to_string());
            }
        }
        if let Err(e) = self
            .step(
                "delete-orphaned-routes",
                t.push_timeout,
                platform.delete_orphaned_routes(),
            )
            .await
        {
            issues.push(e.to_string());
        }

        for issue in &issues {
            tracing::warn!(issue = %issue, "teardown step failed");
        }
        state.enter(ScenarioPhase::Done);
        (worker_faults, issues)
    }
}

async fn interrupted(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Nobody can interrupt any more.
            std::future::pending::<()>().await;
        }
    }
}
