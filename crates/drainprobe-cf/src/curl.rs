//! Producer driver that hits app routes with `curl`.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use drainprobe_harness::config::HarnessConfig;
use drainprobe_harness::platform::ProducerDriver;

use crate::exec;

#[derive(Debug, Clone)]
pub struct CurlDriver {
    bin: String,
    scheme: &'static str,
    apps_domain: String,
    skip_ssl_validation: bool,
}

impl CurlDriver {
    pub fn from_config(config: &HarnessConfig) -> anyhow::Result<Self> {
        let apps_domain = config
            .apps_domain
            .clone()
            .context("apps_domain must be set to reach the log producers")?;
        Ok(Self {
            bin: config.curl_bin.clone(),
            scheme: if config.use_https { "https" } else { "http" },
            apps_domain,
            skip_ssl_validation: config.skip_ssl_validation,
        })
    }

    pub fn app_url(&self, app: &str, path: &str) -> String {
        format!("{}://{}.{}{}", self.scheme, app, self.apps_domain, path)
    }

    pub(crate) fn args(&self, app: &str, path: &str, timeout: Duration) -> Vec<String> {
        let mut args = vec![
            "-sS".to_string(),
            "--fail".to_string(),
            "-m".to_string(),
            timeout.as_secs().max(1).to_string(),
        ];
        if self.skip_ssl_validation {
            args.push("-k".to_string());
        }
        args.push(self.app_url(app, path));
        args
    }
}

#[async_trait]
impl ProducerDriver for CurlDriver {
    async fn trigger_log_line(
        &self,
        producer: &str,
        path: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        // curl enforces -m itself; the outer bound only catches a hung process.
        let args = self.args(producer, path, timeout);
        exec::run(&self.bin, &args, timeout + Duration::from_secs(1))
            .await
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(extra: &str) -> CurlDriver {
        let cfg = HarnessConfig::from_toml_str(&format!("apps_domain = \"apps.example.com\"\n{extra}"))
            .unwrap();
        CurlDriver::from_config(&cfg).unwrap()
    }

    #[test]
    fn url_targets_the_app_route() {
        let d = driver("");
        assert_eq!(
            d.app_url("writer-1", "/log/RANDOM-MESSAGE-A-1"),
            "https://writer-1.apps.example.com/log/RANDOM-MESSAGE-A-1"
        );
        let plain = driver("use_https = false");
        assert!(plain.app_url("w", "/").starts_with("http://"));
    }

    #[test]
    fn skip_ssl_validation_adds_insecure_flag() {
        let strict = driver("");
        let lax = driver("skip_ssl_validation = true");
        let t = Duration::from_secs(30);
        assert!(!strict.args("w", "/log/x", t).contains(&"-k".to_string()));
        assert!(lax.args("w", "/log/x", t).contains(&"-k".to_string()));
        assert_eq!(strict.args("w", "/log/x", t)[2..4], ["-m", "30"]);
    }

    #[test]
    fn apps_domain_is_required() {
        let cfg = HarnessConfig::from_toml_str("").unwrap();
        assert!(CurlDriver::from_config(&cfg).is_err());
    }
}
