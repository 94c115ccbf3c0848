//! Wire-level data model for networks, subnets, and ports.
//!
//! # Responsibilities
//! - Deserialize lifecycle-event payloads from the control plane
//! - Provide the set views (DHCP-enabled CIDRs, fixed IPs) the
//!   reconciliation diff works on
//!
//! # Design Decisions
//! - Networks own their subnets and ports; nothing else holds them
//! - Unknown payload fields are ignored, missing optional fields default

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// IPv6 address-configuration mode advertised for a subnet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Ipv6Mode {
    #[serde(rename = "slaac")]
    Slaac,
    #[serde(rename = "dhcpv6-stateless")]
    Dhcpv6Stateless,
    #[serde(rename = "none")]
    None,
}

/// A single IP binding of a port into a subnet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

/// An IP prefix within a network, with its DHCP-serving parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
    pub cidr: String,
    #[serde(default = "default_ip_version")]
    pub ip_version: u8,
    #[serde(default)]
    pub enable_dhcp: bool,
    #[serde(default)]
    pub gateway_ip: Option<String>,
    #[serde(default)]
    pub dns_nameservers: Vec<String>,
    #[serde(default)]
    pub ipv6_ra_mode: Option<Ipv6Mode>,
    #[serde(default)]
    pub ipv6_address_mode: Option<Ipv6Mode>,
}

fn default_ip_version() -> u8 {
    4
}

/// A virtual attachment point with one or more fixed-IP bindings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Port {
    pub id: String,
    pub network_id: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub device_owner: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
}

impl Port {
    /// The set of addresses this port is bound to, membership only.
    pub fn fixed_ip_addresses(&self) -> HashSet<&str> {
        self.fixed_ips.iter().map(|f| f.ip_address.as_str()).collect()
    }
}

/// The top-level entity: an isolated L2/L3 domain and everything in it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Network {
    pub id: String,
    #[serde(default = "default_admin_state")]
    pub admin_state_up: bool,
    #[serde(default)]
    pub subnets: Vec<Subnet>,
    #[serde(default)]
    pub ports: Vec<Port>,
}

fn default_admin_state() -> bool {
    true
}

impl Network {
    /// A network known only by id, as reported by driver enumeration at
    /// startup. Subnets and ports are filled in by later events.
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            admin_state_up: true,
            subnets: Vec::new(),
            ports: Vec::new(),
        }
    }

    /// CIDRs of subnets currently eligible for DHCP serving.
    pub fn dhcp_enabled_cidrs(&self) -> HashSet<&str> {
        self.subnets
            .iter()
            .filter(|s| s.enable_dhcp)
            .map(|s| s.cidr.as_str())
            .collect()
    }

    /// Whether any subnet makes this network eligible for DHCP at all.
    pub fn has_dhcp_enabled_subnet(&self) -> bool {
        self.subnets.iter().any(|s| s.enable_dhcp)
    }
}

/// Envelope for network and subnet events: `{"network": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkPayload {
    pub network: Network,
}

/// Envelope for port events: `{"port": {...}}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PortPayload {
    pub port: Port,
}
