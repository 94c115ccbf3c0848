//! DHCP backend driver abstraction.
//!
//! # Responsibilities
//! - Define the capability set any backend must implement
//! - Classify backend failures so the reconciler can apply its
//!   swallow-vs-log policy
//! - Construct the concrete backend selected by configuration
//!
//! # Design Decisions
//! - Trait object behind a factory; the reconciler never names a backend
//! - Enumeration of pre-existing networks is optional (`Unsupported` is a
//!   benign answer at startup)

pub mod dnsmasq;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::agent::cache::SharedCache;
use crate::config::AgentConfig;
use crate::model::Network;
use crate::process::{ExecError, PrivilegedExecutor, ProcessMonitor};

/// Errors a backend can signal. The reconciler maps these onto its
/// failure policy; see `DhcpAgent::call_driver`.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Observed state does not match what the caller assumed; a later
    /// notification for the same resource is expected to correct it.
    #[error("conflict with current state: {0}")]
    Conflict(String),

    /// Address pool exhausted; retrying without new capacity would only
    /// repeat the failure.
    #[error("address allocation failed: {0}")]
    AllocationFailure(String),

    /// The backend does not implement this capability.
    #[error("operation not supported by this driver")]
    Unsupported,

    /// Command execution underneath the backend failed.
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("unknown driver backend '{0}'")]
    UnknownBackend(String),
}

/// The per-network action the reconciler selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverAction {
    Enable,
    Disable,
    Restart,
    ReloadAllocations,
}

impl fmt::Display for DriverAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverAction::Enable => "enable",
            DriverAction::Disable => "disable",
            DriverAction::Restart => "restart",
            DriverAction::ReloadAllocations => "reload_allocations",
        };
        f.write_str(name)
    }
}

/// Capability set required of any DHCP backend.
pub trait DhcpDriver: Send + Sync {
    /// Start serving DHCP for the network.
    fn enable(&self, network: &Network) -> Result<(), DriverError>;

    /// Stop serving DHCP for the network and release its resources.
    fn disable(&self, network: &Network) -> Result<(), DriverError>;

    /// Full stop/start cycle; used when the served topology changed.
    fn restart(&self, network: &Network) -> Result<(), DriverError>;

    /// Cheap in-place refresh of served allocations, no process restart.
    fn reload_allocations(&self, network: &Network) -> Result<(), DriverError>;

    /// Network ids the backend is already serving, used to rebuild the
    /// cache at startup. `Err(Unsupported)` when the backend cannot tell.
    fn existing_dhcp_networks(&self) -> Result<Vec<String>, DriverError>;

    /// Backend version token, probed once at startup.
    fn check_version(&self) -> Result<String, DriverError>;
}

/// Build the backend named by `config.driver.backend`.
pub fn build_driver(
    config: Arc<AgentConfig>,
    executor: Arc<PrivilegedExecutor>,
    monitor: Arc<ProcessMonitor>,
    reconcile_lock: SharedCache,
) -> Result<Arc<dyn DhcpDriver>, DriverError> {
    match config.driver.backend.as_str() {
        "dnsmasq" => Ok(Arc::new(dnsmasq::DnsmasqDriver::new(
            config,
            executor,
            monitor,
            reconcile_lock,
        ))),
        other => Err(DriverError::UnknownBackend(other.to_string())),
    }
}
