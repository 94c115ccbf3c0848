//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the agent.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the DHCP agent.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Listener configuration (bind address for the event ingress).
    pub listener: ListenerConfig,

    /// Host identity and local state settings.
    pub agent: AgentSection,

    /// Privilege-escalation settings.
    pub rootwrap: RootwrapConfig,

    /// Child-process liveness policing.
    pub process_monitor: ProcessMonitorConfig,

    /// DHCP backend driver selection.
    pub driver: DriverConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9697").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9697".to_string(),
        }
    }
}

/// Host identity and state-directory settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentSection {
    /// Hostname this agent reports as. Empty means use the OS hostname.
    pub host: String,

    /// Where the agent keeps per-network state (pid files, lease dirs).
    /// Must be writable by the agent.
    pub state_path: String,

    /// Base MAC address used for generated interfaces.
    pub base_mac: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            host: String::new(),
            state_path: "/var/lib/dhcp-agent".to_string(),
            base_mac: "fa:16:3e:00:00:00".to_string(),
        }
    }
}

/// Privilege-escalation settings.
///
/// When `root_helper_daemon` is set, privileged commands are forwarded over
/// a single long-lived connection to the pre-started helper; otherwise each
/// privileged call is prefixed with `root_helper` and spawned fresh.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RootwrapConfig {
    /// Per-call escalation prefix
    /// (e.g., "sudo dhcp-agent-rootwrap /etc/dhcp-agent/rootwrap.conf").
    pub root_helper: Option<String>,

    /// Command line that starts the privileged helper daemon.
    pub root_helper_daemon: Option<String>,
}

/// What the monitor does when a supervised process is found dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MonitorAction {
    /// Re-invoke the owning driver's start path.
    #[default]
    Respawn,
    /// Treat child death as fatal and stop the whole agent.
    Exit,
}

/// Child-process liveness policing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessMonitorConfig {
    /// Seconds between liveness checks. Zero disables checking entirely.
    pub check_interval_secs: u64,

    /// Policy applied when a supervised process has died.
    pub action: MonitorAction,
}

impl Default for ProcessMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            action: MonitorAction::Respawn,
        }
    }
}

/// DHCP backend driver selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Backend name the driver factory resolves ("dnsmasq").
    pub backend: String,

    /// Path to the dnsmasq binary.
    pub dnsmasq_path: String,

    /// DHCP lease duration in seconds. -1 tells dnsmasq to use infinite
    /// lease times.
    pub dhcp_lease_duration: i64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            backend: "dnsmasq".to_string(),
            dnsmasq_path: "dnsmasq".to_string(),
            dhcp_lease_duration: 86_400,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout for the HTTP ingress in seconds. Driver calls carry
    /// no timeout of their own; this bounds only the HTTP layer.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 120 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
