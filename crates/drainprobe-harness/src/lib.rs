//! Syslog drain verification harness.
//!
//! Proves that log lines emitted by platform applications reach externally
//! registered syslog drains, and that a drain bound to one producer sees
//! nothing from another.
//!
//! The platform itself (pushing apps, registering services, following logs)
//! is reached through the async traits in [`platform`]; [`testing`] provides
//! in-memory versions of all of them.

pub mod address;
pub mod assertions;
pub mod config;
pub mod emitter;
pub mod env;
pub mod error;
pub mod names;
pub mod platform;
pub mod ports;
pub mod resolver;
pub mod scenario;
pub mod stream;
pub mod testing;

pub use address::{ClientCredentials, DrainScheme, DrainTarget, ResolvedAddress};
pub use assertions::{assert_token_absent, await_token};
pub use config::HarnessConfig;
pub use emitter::{CancelHandle, EmissionController, EmissionSettings};
pub use error::{ConfigError, HarnessError, PortMetadataError};
pub use names::{NameSource, RandomNames, SequentialNames};
pub use ports::{parse_instance_ports, InstancePorts};
pub use resolver::resolve_addresses;
pub use scenario::{
    BindingMode, Collaborators, DrainScenario, RoutingMode, ScenarioPhase, ScenarioReport,
};
pub use stream::{LogBuffer, LogStream};
