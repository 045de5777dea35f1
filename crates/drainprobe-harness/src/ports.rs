//! Decoding of the `CF_INSTANCE_PORTS` port-mapping document.

use serde::Deserialize;

use crate::error::PortMetadataError;

/// Port the listener fixture binds inside its container.
pub const INTERNAL_LISTENER_PORT: u16 = 8080;

/// One entry of the instance port-mapping array.
///
/// Only the externally visible fields are read; anything else the platform
/// includes (`internal`, `internal_tls_proxy`, ...) is ignored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortMapping {
    pub external: u16,
    #[serde(alias = "externalTLSProxy")]
    pub external_tls_proxy: u16,
}

impl PortMapping {
    /// Externally routable port, falling back to the TLS proxy port when the
    /// plain external port is unset.
    pub fn routable_port(&self) -> u16 {
        if self.external == 0 {
            self.external_tls_proxy
        } else {
            self.external
        }
    }
}

/// Ports derived for one listener instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstancePorts {
    pub internal: u16,
    pub external: u16,
}

/// Parse the raw port-mapping payload of a listener instance.
///
/// The first mapping decides the external port; the internal port is always
/// [`INTERNAL_LISTENER_PORT`].
pub fn parse_instance_ports(raw: &[u8]) -> Result<InstancePorts, PortMetadataError> {
    let mappings: Vec<PortMapping> = serde_json::from_slice(raw)?;
    let first = mappings.first().ok_or(PortMetadataError::Empty)?;

    Ok(InstancePorts {
        internal: INTERNAL_LISTENER_PORT,
        external: first.routable_port(),
    })
}
