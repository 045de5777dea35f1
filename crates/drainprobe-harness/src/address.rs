//! Addresses and drain targets.

use std::fmt;

use crate::error::ConfigError;

/// A `host:port` pair a drain can be pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedAddress {
    pub host: String,
    pub port: u16,
}

impl ResolvedAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Both addresses of one listener instance.
///
/// Apps reach the external address through the host on a plain network; on
/// networks where that path is blocked only the internal (container) address
/// works, so drains are registered for both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceAddresses {
    pub index: u32,
    pub internal: ResolvedAddress,
    pub external: ResolvedAddress,
}

/// Transport scheme of a syslog drain URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainScheme {
    Syslog,
    SyslogTls,
}

impl DrainScheme {
    /// `syslog-tls` is required exactly when app traffic must be proxied.
    pub fn for_environment(require_proxied_app_traffic: bool) -> Self {
        if require_proxied_app_traffic {
            Self::SyslogTls
        } else {
            Self::Syslog
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Syslog => "syslog",
            Self::SyslogTls => "syslog-tls",
        }
    }
}

/// mTLS client credentials attached to a drain service.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub cert: String,
    pub key: String,
}

impl ClientCredentials {
    /// Both or neither: a lone certificate or key is a configuration error.
    pub fn from_parts(
        cert: Option<String>,
        key: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let cert = cert.filter(|c| !c.trim().is_empty());
        let key = key.filter(|k| !k.trim().is_empty());
        match (cert, key) {
            (Some(cert), Some(key)) => Ok(Some(Self { cert, key })),
            (None, None) => Ok(None),
            _ => Err(ConfigError::IncompleteCredentials),
        }
    }

    /// JSON parameters document passed when creating the drain service.
    pub fn to_json(&self) -> String {
        serde_json::json!({ "cert": self.cert, "key": self.key }).to_string()
    }
}

// Keep key material out of logs.
impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("cert", &format_args!("<{} bytes>", self.cert.len()))
            .field("key", &"<redacted>")
            .finish()
    }
}

/// A drain endpoint ready to be registered as a user-provided service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainTarget {
    pub address: ResolvedAddress,
    pub scheme: DrainScheme,
    pub credentials: Option<ClientCredentials>,
}

impl DrainTarget {
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_url_uses_scheme_for_environment() {
        let plain = DrainTarget {
            address: ResolvedAddress::new("10.0.16.5", 61001),
            scheme: DrainScheme::for_environment(false),
            credentials: None,
        };
        assert_eq!(plain.url(), "syslog://10.0.16.5:61001");

        let tls = DrainTarget {
            scheme: DrainScheme::for_environment(true),
            ..plain
        };
        assert_eq!(tls.url(), "syslog-tls://10.0.16.5:61001");
    }

    #[test]
    fn credentials_are_all_or_nothing() {
        assert!(ClientCredentials::from_parts(None, None).unwrap().is_none());
        assert!(ClientCredentials::from_parts(Some("".into()), Some(" ".into()))
            .unwrap()
            .is_none());
        assert!(matches!(
            ClientCredentials::from_parts(Some("CERT".into()), None),
            Err(ConfigError::IncompleteCredentials)
        ));

        let creds = ClientCredentials::from_parts(Some("CERT".into()), Some("KEY".into()))
            .unwrap()
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&creds.to_json()).unwrap();
        assert_eq!(json["cert"], "CERT");
        assert_eq!(json["key"], "KEY");
        assert!(!format!("{creds:?}").contains("KEY"));
    }
}
