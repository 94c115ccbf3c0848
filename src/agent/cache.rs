//! Authoritative cache of the network state configured on this node.
//!
//! # Responsibilities
//! - Own every Network (and through it every Subnet and Port) the agent
//!   currently serves
//! - Keep the subnet-id → network-id and port-id → network-id indexes
//!   exact images of the forward relationships
//! - Cascade subnet removal onto ports left without any fixed IP
//!
//! # Design Decisions
//! - Plain HashMaps, no internal locking: all access is serialized by the
//!   agent's single reconciliation lock
//! - `remove` on an unknown network is a programming error, not a
//!   recoverable condition

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::model::{Network, Port, Subnet};

/// The reconciliation lock. Every event handler and every monitor respawn
/// path goes through this one mutex.
pub type SharedCache = Arc<Mutex<NetworkCache>>;

/// Observability snapshot of cache sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSummary {
    pub networks: usize,
    pub subnets: usize,
    pub ports: usize,
}

/// In-memory model of all networks configured on this node, with O(1)
/// lookup by network, subnet, or port id.
#[derive(Default)]
pub struct NetworkCache {
    networks: HashMap<String, Network>,
    subnet_lookup: HashMap<String, String>,
    port_lookup: HashMap<String, String>,
}

impl NetworkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network_ids(&self) -> Vec<String> {
        self.networks.keys().cloned().collect()
    }

    pub fn get_network_by_id(&self, network_id: &str) -> Option<&Network> {
        self.networks.get(network_id)
    }

    pub fn get_network_by_subnet_id(&self, subnet_id: &str) -> Option<&Network> {
        self.subnet_lookup
            .get(subnet_id)
            .and_then(|net_id| self.networks.get(net_id))
    }

    pub fn get_network_by_port_id(&self, port_id: &str) -> Option<&Network> {
        self.port_lookup
            .get(port_id)
            .and_then(|net_id| self.networks.get(net_id))
    }

    pub fn get_subnet_by_id(&self, subnet_id: &str) -> Option<&Subnet> {
        self.get_network_by_subnet_id(subnet_id)
            .and_then(|net| net.subnets.iter().find(|s| s.id == subnet_id))
    }

    pub fn get_port_by_id(&self, port_id: &str) -> Option<&Port> {
        self.get_network_by_port_id(port_id)
            .and_then(|net| net.ports.iter().find(|p| p.id == port_id))
    }

    /// Upsert a network. An existing entry with the same id is fully
    /// removed, index rows included, before the new entry goes in.
    pub fn put(&mut self, network: Network) {
        if self.networks.contains_key(&network.id) {
            self.remove(&network.id.clone());
        }

        for subnet in &network.subnets {
            self.subnet_lookup
                .insert(subnet.id.clone(), network.id.clone());
        }
        for port in &network.ports {
            self.port_lookup.insert(port.id.clone(), network.id.clone());
        }
        self.networks.insert(network.id.clone(), network);
    }

    /// Delete a network and every index row that referenced it.
    ///
    /// # Panics
    /// Panics if the network is not cached; callers check first.
    pub fn remove(&mut self, network_id: &str) -> Network {
        let network = self
            .networks
            .remove(network_id)
            .unwrap_or_else(|| panic!("network {network_id} not in cache"));

        for subnet in &network.subnets {
            self.subnet_lookup.remove(&subnet.id);
        }
        for port in &network.ports {
            self.port_lookup.remove(&port.id);
        }
        network
    }

    /// Replace the port in place under its network, or append it, and
    /// refresh the port index. A port whose network is not cached is
    /// dropped; the caller has already checked the network exists.
    pub fn put_port(&mut self, port: Port) {
        let Some(network) = self.networks.get_mut(&port.network_id) else {
            tracing::debug!(port_id = %port.id, network_id = %port.network_id,
                "Dropping port for unknown network");
            return;
        };

        self.port_lookup
            .insert(port.id.clone(), network.id.clone());
        if let Some(existing) = network.ports.iter_mut().find(|p| p.id == port.id) {
            *existing = port;
        } else {
            network.ports.push(port);
        }
    }

    /// Remove a port from its network's port list and from the index.
    pub fn remove_port(&mut self, port_id: &str) {
        let Some(net_id) = self.port_lookup.remove(port_id) else {
            return;
        };
        if let Some(network) = self.networks.get_mut(&net_id) {
            network.ports.retain(|p| p.id != port_id);
        }
    }

    /// Remove a subnet, stripping its fixed-IP references from every port
    /// of the owning network and cascading onto ports left with zero
    /// fixed IPs.
    pub fn remove_subnet(&mut self, subnet_id: &str) {
        let Some(net_id) = self.subnet_lookup.remove(subnet_id) else {
            return;
        };
        let Some(network) = self.networks.get_mut(&net_id) else {
            return;
        };

        network.subnets.retain(|s| s.id != subnet_id);

        let mut orphaned = Vec::new();
        for port in &mut network.ports {
            let before = port.fixed_ips.len();
            port.fixed_ips.retain(|f| f.subnet_id != subnet_id);
            if before > port.fixed_ips.len() && port.fixed_ips.is_empty() {
                orphaned.push(port.id.clone());
            }
        }
        for port_id in orphaned {
            tracing::debug!(port_id = %port_id, subnet_id = %subnet_id,
                "Removing port left without fixed IPs");
            network.ports.retain(|p| p.id != port_id);
            self.port_lookup.remove(&port_id);
        }
    }

    /// Counts over all networks, for the startup/debug summary log and
    /// the cache-size gauges.
    pub fn state_summary(&self) -> CacheSummary {
        CacheSummary {
            networks: self.networks.len(),
            subnets: self.networks.values().map(|n| n.subnets.len()).sum(),
            ports: self.networks.values().map(|n| n.ports.len()).sum(),
        }
    }

    #[cfg(test)]
    pub(crate) fn assert_indexes_consistent(&self) {
        let mut subnets = 0;
        let mut ports = 0;
        for network in self.networks.values() {
            for subnet in &network.subnets {
                subnets += 1;
                assert_eq!(
                    self.subnet_lookup.get(&subnet.id),
                    Some(&network.id),
                    "subnet index row missing or wrong for {}",
                    subnet.id
                );
            }
            for port in &network.ports {
                ports += 1;
                assert_eq!(
                    self.port_lookup.get(&port.id),
                    Some(&network.id),
                    "port index row missing or wrong for {}",
                    port.id
                );
            }
        }
        assert_eq!(self.subnet_lookup.len(), subnets, "orphaned subnet index rows");
        assert_eq!(self.port_lookup.len(), ports, "orphaned port index rows");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FixedIp;

    fn subnet(id: &str, net: &str, cidr: &str) -> Subnet {
        Subnet {
            id: id.into(),
            network_id: net.into(),
            cidr: cidr.into(),
            ip_version: 4,
            enable_dhcp: true,
            gateway_ip: None,
            dns_nameservers: vec![],
            ipv6_ra_mode: None,
            ipv6_address_mode: None,
        }
    }

    fn port(id: &str, net: &str, bindings: &[(&str, &str)]) -> Port {
        Port {
            id: id.into(),
            network_id: net.into(),
            mac_address: "fa:16:3e:00:00:01".into(),
            device_owner: "network:dhcp".into(),
            fixed_ips: bindings
                .iter()
                .map(|(subnet_id, ip)| FixedIp {
                    subnet_id: (*subnet_id).into(),
                    ip_address: (*ip).into(),
                })
                .collect(),
        }
    }

    fn network(id: &str, subnets: Vec<Subnet>, ports: Vec<Port>) -> Network {
        Network {
            id: id.into(),
            admin_state_up: true,
            subnets,
            ports,
        }
    }

    #[test]
    fn test_put_indexes_subnets_and_ports() {
        let mut cache = NetworkCache::new();
        cache.put(network(
            "net-1",
            vec![subnet("s1", "net-1", "10.0.0.0/24")],
            vec![port("p1", "net-1", &[("s1", "10.0.0.5")])],
        ));

        assert_eq!(cache.get_network_by_subnet_id("s1").unwrap().id, "net-1");
        assert_eq!(cache.get_network_by_port_id("p1").unwrap().id, "net-1");
        assert_eq!(cache.get_subnet_by_id("s1").unwrap().cidr, "10.0.0.0/24");
        assert_eq!(cache.get_port_by_id("p1").unwrap().id, "p1");
        cache.assert_indexes_consistent();
    }

    #[test]
    fn test_put_replaces_existing_entry_fully() {
        let mut cache = NetworkCache::new();
        cache.put(network(
            "net-1",
            vec![subnet("s1", "net-1", "10.0.0.0/24")],
            vec![port("p1", "net-1", &[("s1", "10.0.0.5")])],
        ));
        // Re-insert with different children: old index rows must be gone.
        cache.put(network(
            "net-1",
            vec![subnet("s2", "net-1", "10.0.1.0/24")],
            vec![],
        ));

        assert!(cache.get_network_by_subnet_id("s1").is_none());
        assert!(cache.get_network_by_port_id("p1").is_none());
        assert_eq!(cache.get_network_by_subnet_id("s2").unwrap().id, "net-1");
        cache.assert_indexes_consistent();
    }

    #[test]
    fn test_remove_clears_index_rows() {
        let mut cache = NetworkCache::new();
        cache.put(network(
            "net-1",
            vec![subnet("s1", "net-1", "10.0.0.0/24")],
            vec![port("p1", "net-1", &[("s1", "10.0.0.5")])],
        ));
        cache.remove("net-1");

        assert!(cache.get_network_by_id("net-1").is_none());
        assert!(cache.get_network_by_subnet_id("s1").is_none());
        assert!(cache.get_network_by_port_id("p1").is_none());
        cache.assert_indexes_consistent();
    }

    #[test]
    #[should_panic(expected = "not in cache")]
    fn test_remove_unknown_network_panics() {
        NetworkCache::new().remove("net-missing");
    }

    #[test]
    fn test_put_port_replaces_in_place() {
        let mut cache = NetworkCache::new();
        cache.put(network(
            "net-1",
            vec![subnet("s1", "net-1", "10.0.0.0/24")],
            vec![port("p1", "net-1", &[("s1", "10.0.0.5")])],
        ));

        cache.put_port(port("p1", "net-1", &[("s1", "10.0.0.6")]));
        let net = cache.get_network_by_id("net-1").unwrap();
        assert_eq!(net.ports.len(), 1);
        assert_eq!(net.ports[0].fixed_ips[0].ip_address, "10.0.0.6");

        cache.put_port(port("p2", "net-1", &[("s1", "10.0.0.7")]));
        assert_eq!(cache.get_network_by_id("net-1").unwrap().ports.len(), 2);
        cache.assert_indexes_consistent();
    }

    #[test]
    fn test_remove_subnet_cascades_onto_orphaned_ports() {
        let mut cache = NetworkCache::new();
        cache.put(network(
            "net-1",
            vec![
                subnet("s1", "net-1", "10.0.0.0/24"),
                subnet("s2", "net-1", "10.0.1.0/24"),
            ],
            vec![
                // Only on s1: must be cascaded away.
                port("p1", "net-1", &[("s1", "10.0.0.5")]),
                // On both subnets: must survive with one binding left.
                port("p2", "net-1", &[("s1", "10.0.0.6"), ("s2", "10.0.1.6")]),
            ],
        ));

        cache.remove_subnet("s1");

        let net = cache.get_network_by_id("net-1").unwrap();
        assert_eq!(net.subnets.len(), 1);
        assert!(cache.get_port_by_id("p1").is_none());
        let p2 = cache.get_port_by_id("p2").unwrap();
        assert_eq!(p2.fixed_ips.len(), 1);
        assert_eq!(p2.fixed_ips[0].subnet_id, "s2");
        cache.assert_indexes_consistent();
    }

    #[test]
    fn test_remove_subnet_unknown_is_noop() {
        let mut cache = NetworkCache::new();
        cache.remove_subnet("s-missing");
        cache.assert_indexes_consistent();
    }

    #[test]
    fn test_state_summary() {
        let mut cache = NetworkCache::new();
        cache.put(network(
            "net-1",
            vec![subnet("s1", "net-1", "10.0.0.0/24")],
            vec![port("p1", "net-1", &[("s1", "10.0.0.5")])],
        ));
        cache.put(network("net-2", vec![], vec![]));

        let summary = cache.state_summary();
        assert_eq!(summary.networks, 2);
        assert_eq!(summary.subnets, 1);
        assert_eq!(summary.ports, 1);
    }

    #[test]
    fn test_mutation_sequence_keeps_indexes_exact() {
        let mut cache = NetworkCache::new();
        cache.put(network(
            "net-1",
            vec![subnet("s1", "net-1", "10.0.0.0/24")],
            vec![],
        ));
        cache.put_port(port("p1", "net-1", &[("s1", "10.0.0.5")]));
        cache.put_port(port("p1", "net-1", &[("s1", "10.0.0.6")]));
        cache.put(network(
            "net-2",
            vec![subnet("s2", "net-2", "10.0.2.0/24")],
            vec![],
        ));
        cache.remove_port("p1");
        cache.remove_subnet("s2");
        cache.remove("net-1");

        cache.assert_indexes_consistent();
        assert_eq!(cache.state_summary().networks, 1);
    }
}
