//! Resolution of listener instance addresses from their environment.

use std::time::Duration;

use tokio::time::Instant;

use crate::address::{InstanceAddresses, ResolvedAddress};
use crate::config::RetryPolicy;
use crate::env::InstanceEnvironment;
use crate::error::HarnessError;
use crate::platform::InstanceMetadata;
use crate::ports::parse_instance_ports;

/// Outcome of a single resolution attempt.
enum Attempt {
    Resolved(InstanceAddresses),
    /// Worth retrying: metadata not there yet.
    Pending(String),
}

async fn resolve_once(
    metadata: &dyn InstanceMetadata,
    listener: &str,
    index: u32,
) -> Result<Attempt, HarnessError> {
    let text = match metadata.environment_text(listener, index).await {
        Ok(text) => text,
        Err(e) => return Ok(Attempt::Pending(format!("{e:#}"))),
    };

    let env = match InstanceEnvironment::from_env_text(&text) {
        Ok(env) => env,
        Err(key) => {
            return Ok(Attempt::Pending(
                HarnessError::MissingEnvironmentKey {
                    instance: index,
                    key,
                }
                .to_string(),
            ))
        }
    };

    // Garbage port metadata will not fix itself; give up right away.
    let ports = parse_instance_ports(env.ports.as_bytes())?;

    Ok(Attempt::Resolved(InstanceAddresses {
        index,
        internal: ResolvedAddress::new(env.internal_ip, ports.internal),
        external: ResolvedAddress::new(env.external_ip, ports.external),
    }))
}

/// Resolve the addresses of one listener instance, retrying with
/// exponential backoff until `retry.budget` is spent.
pub async fn resolve_instance(
    metadata: &dyn InstanceMetadata,
    listener: &str,
    index: u32,
    retry: &RetryPolicy,
) -> Result<InstanceAddresses, HarnessError> {
    let deadline = Instant::now() + retry.budget;
    let mut backoff = retry.initial_backoff;
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match resolve_once(metadata, listener, index).await? {
            Attempt::Resolved(addrs) => {
                tracing::info!(
                    listener,
                    instance = index,
                    external = %addrs.external,
                    internal = %addrs.internal,
                    attempts,
                    "resolved listener addresses"
                );
                return Ok(addrs);
            }
            Attempt::Pending(reason) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(HarnessError::ResolutionTimedOut {
                        instance: index,
                        attempts,
                        last_error: reason,
                    });
                }
                tracing::debug!(
                    listener,
                    instance = index,
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    reason = %reason,
                    "instance metadata not ready, retrying"
                );
                tokio::time::sleep_until((now + backoff).min(deadline)).await;
                backoff = (backoff * 2).min(retry.max_backoff.max(retry.initial_backoff));
            }
        }
    }
}

/// Resolve every listener instance in `[0, instance_count)`.
///
/// The result holds `2 * instance_count` addresses ordered
/// `[external_0, internal_0, external_1, internal_1, ...]`.
pub async fn resolve_addresses(
    metadata: &dyn InstanceMetadata,
    listener: &str,
    instance_count: u32,
    retry: &RetryPolicy,
) -> Result<Vec<ResolvedAddress>, HarnessError> {
    let mut addresses = Vec::with_capacity(2 * instance_count as usize);
    for index in 0..instance_count {
        let addrs = resolve_instance(metadata, listener, index, retry).await?;
        addresses.push(addrs.external);
        addresses.push(addrs.internal);
    }
    Ok(addresses)
}

/// Upper bound on how long [`resolve_addresses`] can take, ignoring the time
/// spent inside the metadata collaborator itself.
pub fn worst_case_duration(instance_count: u32, retry: &RetryPolicy) -> Duration {
    retry.budget.saturating_mul(instance_count)
}
