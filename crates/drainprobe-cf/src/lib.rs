//! `cf` CLI adapters for the drain verification harness.
//!
//! - [`CfCli`]: app, service and route management plus instance
//!   environments (`cf ssh`)
//! - [`CurlDriver`]: makes log writer apps emit tagged lines
//! - [`CfLogFollower`]: streams `cf logs` into a log buffer

mod cf;
mod curl;
mod exec;
mod logs;

use std::sync::Arc;

use drainprobe_harness::{Collaborators, HarnessConfig, HarnessError, RandomNames, ScenarioReport};

pub use cf::CfCli;
pub use curl::CurlDriver;
pub use logs::CfLogFollower;

// Process exit codes.
pub const EXIT_PASS: u8 = 0;
pub const EXIT_FAIL: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_PORT_METADATA: u8 = 3;

/// Wire the production adapters together.
pub fn collaborators(config: &HarnessConfig) -> anyhow::Result<Collaborators> {
    let cf = Arc::new(CfCli::from_config(config));
    Ok(Collaborators {
        platform: cf.clone(),
        metadata: cf,
        driver: Arc::new(CurlDriver::from_config(config)?),
        logs: Arc::new(CfLogFollower::new(config.cf_bin.clone())),
        names: Arc::new(RandomNames::new(config.name_prefix.clone())),
    })
}

pub fn exit_code(report: &ScenarioReport) -> u8 {
    match &report.outcome {
        Ok(()) => EXIT_PASS,
        Err(HarnessError::PortMetadata(_)) => EXIT_PORT_METADATA,
        Err(HarnessError::Config(_)) => EXIT_CONFIG,
        Err(_) => EXIT_FAIL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drainprobe_harness::testing::FakeCloud;
    use drainprobe_harness::{DrainScenario, PortMetadataError, SequentialNames};

    #[test]
    fn collaborators_need_an_apps_domain() {
        let cfg = HarnessConfig::from_toml_str("").unwrap();
        assert!(collaborators(&cfg).is_err());

        let cfg = HarnessConfig::from_toml_str("apps_domain = \"apps.example.com\"").unwrap();
        assert!(collaborators(&cfg).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn exit_codes_follow_the_outcome() {
        let cloud = std::sync::Arc::new(FakeCloud::new());
        let collab = Collaborators::from_platform(cloud, Arc::new(SequentialNames::new()));
        let cfg = HarnessConfig::from_toml_str("").unwrap();
        let mut report = DrainScenario::new(cfg, collab).run().await;
        assert_eq!(exit_code(&report), EXIT_PASS);

        report.outcome = Err(HarnessError::Interrupted);
        assert_eq!(exit_code(&report), EXIT_FAIL);
        report.outcome = Err(PortMetadataError::Empty.into());
        assert_eq!(exit_code(&report), EXIT_PORT_METADATA);
    }
}
