//! Error taxonomy for the harness.
//!
//! Collaborator calls return `anyhow::Result`; everything the harness itself
//! decides about ends up as a [`HarnessError`] on the scenario report.

use std::time::Duration;

use thiserror::Error;

// ── Port metadata ───────────────────────────────────────────────────

/// The instance port metadata could not be interpreted.
///
/// This is the fatal kind: the environment cannot be verified against, so
/// resolution stops immediately instead of retrying.
#[derive(Debug, Error)]
pub enum PortMetadataError {
    #[error("cannot decode CF_INSTANCE_PORTS: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("CF_INSTANCE_PORTS is empty")]
    Empty,
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} = {value} exceeds the maximum of {max}")]
    TooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },
    #[error("absence window ({window:?}) must be shorter than the delivery budget ({budget:?})")]
    WindowExceedsBudget { window: Duration, budget: Duration },
    #[error("client certificate and key must be provided together")]
    IncompleteCredentials,
    #[error("apps_domain is required when tcp routing is enabled")]
    MissingAppsDomain,
}

// ── Scenario ────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("fatal environment error: {0}")]
    PortMetadata(#[from] PortMetadataError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("instance {instance}: {key} not found in environment")]
    MissingEnvironmentKey { instance: u32, key: &'static str },

    #[error("could not resolve addresses of instance {instance} after {attempts} attempts: {last_error}")]
    ResolutionTimedOut {
        instance: u32,
        attempts: u32,
        last_error: String,
    },

    #[error("provisioning failed at {step}: {source:#}")]
    Provisioning {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("drain never received expected message {token:?} within {budget:?}")]
    TokenNotObserved { token: String, budget: Duration },

    #[error("drain received message {token:?} it should not have (after {after:?})")]
    ForbiddenTokenObserved { token: String, after: Duration },

    #[error("emission worker for {producer} faulted: {message}")]
    WorkerFault { producer: String, message: String },

    #[error("scenario panicked: {0}")]
    ScenarioPanicked(String),

    #[error("scenario interrupted")]
    Interrupted,
}

impl HarnessError {
    /// Errors that mean the environment itself is unusable, as opposed to a
    /// failed verification.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, Self::PortMetadata(_) | Self::Config(_))
    }

    pub(crate) fn provisioning(step: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Provisioning {
            step: step.into(),
            source,
        }
    }
}

/// Best-effort rendering of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
