//! drainprobe
//!
//! Verifies syslog drain delivery on a Cloud Foundry style platform:
//!
//! - Pushes a syslog listener and two log writer apps
//! - Registers the listener as a drain for the first writer only
//! - Checks the first writer's messages arrive and the second's never do
//! - Cleans everything up, whatever happened

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use drainprobe_harness::{BindingMode, DrainScenario, HarnessConfig, RoutingMode};

/// Syslog drain verification.
#[derive(Parser, Debug)]
#[command(name = "drainprobe", about = "Verify syslog drain delivery")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "DRAINPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// How drains reach the listener.
    #[arg(long, value_enum, default_value_t = Mode::Auto)]
    mode: Mode,

    /// Bind both writers and expect both to be delivered.
    #[arg(long, default_value_t = false)]
    bind_all: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Auto,
    Ip,
    Tcp,
}

impl From<Mode> for RoutingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Auto => RoutingMode::Auto,
            Mode::Ip => RoutingMode::IpBased,
            Mode::Tcp => RoutingMode::TcpRouting,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<HarnessConfig, drainprobe_harness::ConfigError> {
    match path {
        Some(path) => HarnessConfig::from_file(path),
        None => HarnessConfig::from_toml_str(""),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::from(drainprobe_cf::EXIT_CONFIG);
        }
    };
    let collab = match drainprobe_cf::collaborators(&config) {
        Ok(collab) => collab,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "cannot set up platform adapters");
            return ExitCode::from(drainprobe_cf::EXIT_CONFIG);
        }
    };

    let binding = if cli.bind_all {
        BindingMode::AllProducers
    } else {
        BindingMode::Selective
    };

    tracing::info!(
        mode = ?cli.mode,
        binding = ?binding,
        apps_domain = config.apps_domain.as_deref().unwrap_or("-"),
        "drainprobe starting"
    );

    // Ctrl-C stops verification; teardown still runs.
    let (interrupt_tx, interrupt_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received SIGINT, tearing down");
            let _ = interrupt_tx.send(true);
        }
    });

    let report = DrainScenario::new(config, collab)
        .with_routing(cli.mode.into())
        .with_binding(binding)
        .with_interrupt(interrupt_rx)
        .run()
        .await;

    println!("{}", report.verdict());
    for issue in &report.teardown_issues {
        println!("  cleanup: {issue}");
    }
    ExitCode::from(drainprobe_cf::exit_code(&report))
}
