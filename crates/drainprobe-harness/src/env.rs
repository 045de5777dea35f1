//! Lookup of `KEY=value` pairs in remote environment dumps.

/// Environment key holding the container-local IP of an instance.
pub const INTERNAL_IP_KEY: &str = "CF_INSTANCE_INTERNAL_IP";
/// Environment key holding the host IP of an instance.
pub const EXTERNAL_IP_KEY: &str = "CF_INSTANCE_IP";
/// Environment key holding the JSON port-mapping array.
pub const PORTS_KEY: &str = "CF_INSTANCE_PORTS";

/// Find the value of `key` in `env` output.
///
/// The first line of the form `KEY=value` wins; the value is the remainder of
/// that line with a trailing carriage return removed. Returns `None` when no
/// line carries the key.
pub fn env_value<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines().find_map(|line| {
        line.trim_start()
            .strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|value| value.trim_end_matches('\r'))
    })
}

/// The three values needed to address one listener instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEnvironment {
    pub internal_ip: String,
    pub external_ip: String,
    pub ports: String,
}

impl InstanceEnvironment {
    /// Extract all three values, reporting the first missing key.
    pub fn from_env_text(text: &str) -> Result<Self, &'static str> {
        let lookup = |key: &'static str| env_value(text, key).map(str::to_string).ok_or(key);
        Ok(Self {
            internal_ip: lookup(INTERNAL_IP_KEY)?,
            external_ip: lookup(EXTERNAL_IP_KEY)?,
            ports: lookup(PORTS_KEY)?,
        })
    }
}
