//! The reconciliation engine.
//!
//! # Responsibilities
//! - Turn lifecycle events into the minimal driver action
//!   (no-op / reload / restart / enable / disable)
//! - Advance the cache only for successfully applied driver actions
//! - Serialize all reconciliation behind one lock
//!
//! # Design Decisions
//! - Handlers are blocking and hold the cache lock for their entire body,
//!   driver invocation included; the HTTP layer runs them on the blocking
//!   pool
//! - Driver failures are absorbed here, not surfaced to the control plane:
//!   redelivery of state-changing events is the recovery path

use std::collections::HashSet;
use std::sync::{Arc, MutexGuard};

use crate::agent::cache::{NetworkCache, SharedCache};
use crate::config::AgentConfig;
use crate::driver::{DhcpDriver, DriverAction, DriverError};
use crate::model::{Network, NetworkPayload, Port};
use crate::observability::metrics;

/// DHCP agent service manager: owns the cache and drives the backend.
pub struct DhcpAgent {
    config: Arc<AgentConfig>,
    driver: Arc<dyn DhcpDriver>,
    cache: SharedCache,
}

impl DhcpAgent {
    pub fn new(config: Arc<AgentConfig>, driver: Arc<dyn DhcpDriver>, cache: SharedCache) -> Self {
        Self {
            config,
            driver,
            cache,
        }
    }

    /// Rebuild the cache from the backend's enumeration of networks it is
    /// already serving. A driver without that capability is not an error.
    pub fn populate_networks_cache(&self) {
        match self.driver.existing_dhcp_networks() {
            Ok(ids) => {
                let mut cache = self.lock_cache();
                for id in ids {
                    cache.put(Network::from_id(id));
                }
                let summary = cache.state_summary();
                tracing::info!(
                    networks = summary.networks,
                    "Populated cache from existing DHCP networks"
                );
            }
            Err(DriverError::Unsupported) => {
                tracing::debug!(
                    backend = %self.config.driver.backend,
                    "Driver does not support enumerating existing networks"
                );
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not enumerate existing DHCP networks");
            }
        }
    }

    /// Handle the network.create.end notification event.
    pub fn network_create_end(&self, payload: NetworkPayload) -> String {
        let mut cache = self.lock_cache();
        self.enable_dhcp_helper(&mut cache, payload.network);
        self.log_cache_state(&cache);
        "SUCCESS".to_string()
    }

    /// Handle the network.update.end notification event.
    pub fn network_update_end(&self, payload: NetworkPayload) -> String {
        let mut cache = self.lock_cache();
        self.enable_dhcp_helper(&mut cache, payload.network);
        self.log_cache_state(&cache);
        "SUCCESS".to_string()
    }

    /// Handle the network.delete.end notification event. Deleting a
    /// network the agent never served is reported as success.
    pub fn network_delete_end(&self, network_id: &str) -> String {
        let mut cache = self.lock_cache();
        if cache.get_network_by_id(network_id).is_none() {
            tracing::debug!(network_id = %network_id, "Network not in cache, nothing to delete");
            return format!("network_id: {network_id}. network does not exist");
        }
        self.disable_dhcp_helper(&mut cache, network_id);
        self.log_cache_state(&cache);
        "SUCCESS".to_string()
    }

    /// Handle the subnet.create.end / subnet.update.end notification
    /// events; both carry the full owning network.
    pub fn subnet_update_end(&self, payload: NetworkPayload) -> String {
        let mut cache = self.lock_cache();
        self.refresh_dhcp_helper(&mut cache, payload.network);
        self.log_cache_state(&cache);
        "SUCCESS".to_string()
    }

    /// Handle the subnet.delete.end notification event.
    pub fn subnet_delete_end(&self, subnet_id: &str) -> String {
        let mut cache = self.lock_cache();
        let Some(network_id) = cache
            .get_network_by_subnet_id(subnet_id)
            .map(|n| n.id.clone())
        else {
            tracing::debug!(subnet_id = %subnet_id, "Subnet not in cache, nothing to delete");
            return format!("subnet_id: {subnet_id}. subnet does not exist");
        };

        cache.remove_subnet(subnet_id);
        // Re-diff against the cached network as it looks after the removal.
        if let Some(updated) = cache.get_network_by_id(&network_id).cloned() {
            self.refresh_dhcp_helper(&mut cache, updated);
        }
        self.log_cache_state(&cache);
        "SUCCESS".to_string()
    }

    /// Handle the port.create.end / port.update.end notification events.
    pub fn port_update_end(&self, port: Port) -> String {
        let mut cache = self.lock_cache();
        let network_id = port.network_id.clone();
        if cache.get_network_by_id(&network_id).is_none() {
            tracing::debug!(network_id = %network_id, port_id = %port.id,
                "Port update for unknown network, ignoring");
            return format!("network_id: {network_id}. network does not exist");
        }

        let mut action = DriverAction::ReloadAllocations;
        if self.port_on_this_host(&port) {
            // A port not previously cached is treated as an IP change.
            let old_ips: HashSet<&str> = cache
                .get_port_by_id(&port.id)
                .map(|orig| orig.fixed_ip_addresses())
                .unwrap_or_default();
            if old_ips != port.fixed_ip_addresses() {
                action = DriverAction::Restart;
            }
        }

        // Cache first: a driver read-back during the call must observe the
        // latest topology.
        cache.put_port(port);
        if let Some(network) = cache.get_network_by_id(&network_id).cloned() {
            self.call_driver(action, &network);
        }
        self.log_cache_state(&cache);
        "SUCCESS".to_string()
    }

    /// Handle the port.delete.end notification event. The fixed-IP pool
    /// only shrank, so a reload suffices.
    pub fn port_delete_end(&self, port_id: &str) -> String {
        let mut cache = self.lock_cache();
        let Some(network_id) = cache.get_network_by_port_id(port_id).map(|n| n.id.clone()) else {
            tracing::debug!(port_id = %port_id, "Port not in cache, nothing to delete");
            return format!("port_id: {port_id}. port does not exist");
        };

        cache.remove_port(port_id);
        if let Some(network) = cache.get_network_by_id(&network_id).cloned() {
            self.call_driver(DriverAction::ReloadAllocations, &network);
        }
        self.log_cache_state(&cache);
        "SUCCESS".to_string()
    }

    /// Enable DHCP for a network that meets the enabling criteria: admin
    /// state up and at least one DHCP-enabled subnet. Networks that fail
    /// the criteria are left alone; only delete/refresh drives disable.
    fn enable_dhcp_helper(&self, cache: &mut MutexGuard<'_, NetworkCache>, network: Network) {
        if !network.admin_state_up {
            tracing::debug!(network_id = %network.id, "Admin state down, not enabling DHCP");
            return;
        }
        if !network.has_dhcp_enabled_subnet() {
            tracing::debug!(network_id = %network.id, "No DHCP-enabled subnet, not enabling");
            return;
        }
        if self.call_driver(DriverAction::Enable, &network) {
            cache.put(network);
        }
    }

    /// Disable DHCP for a network known to the agent.
    fn disable_dhcp_helper(&self, cache: &mut MutexGuard<'_, NetworkCache>, network_id: &str) {
        if let Some(network) = cache.get_network_by_id(network_id).cloned() {
            if self.call_driver(DriverAction::Disable, &network) {
                cache.remove(network_id);
            }
        }
    }

    /// Refresh or disable DHCP for a network depending on how its set of
    /// served prefixes changed. A restart is disruptive, so a reload is
    /// preferred whenever the CIDR set is unchanged even if other subnet
    /// attributes differ.
    fn refresh_dhcp_helper(&self, cache: &mut MutexGuard<'_, NetworkCache>, network: Network) {
        let Some(old_network) = cache.get_network_by_id(&network.id) else {
            // DHCP not currently running for this network.
            return self.enable_dhcp_helper(cache, network);
        };

        let old_cidrs: HashSet<String> = old_network
            .dhcp_enabled_cidrs()
            .into_iter()
            .map(str::to_string)
            .collect();
        let new_cidrs: HashSet<String> = network
            .dhcp_enabled_cidrs()
            .into_iter()
            .map(str::to_string)
            .collect();

        if !new_cidrs.is_empty() && new_cidrs == old_cidrs {
            if self.call_driver(DriverAction::ReloadAllocations, &network) {
                cache.put(network);
            }
        } else if !new_cidrs.is_empty() {
            if self.call_driver(DriverAction::Restart, &network) {
                cache.put(network);
            }
        } else {
            self.disable_dhcp_helper(cache, &network.id);
        }
    }

    /// Host-affinity check for ports. Currently a pass-through: every port
    /// of a cached network is treated as owned by this agent.
    fn port_on_this_host(&self, port: &Port) -> bool {
        tracing::trace!(port_id = %port.id, host = %self.config.agent.host,
            "Host affinity assumed");
        true
    }

    /// Invoke one driver action, mapping failures onto the absorb-or-log
    /// policy. Returns whether the action was applied; callers advance the
    /// cache only on success.
    fn call_driver(&self, action: DriverAction, network: &Network) -> bool {
        tracing::debug!(network_id = %network.id, action = %action, "Calling driver");
        let result = match action {
            DriverAction::Enable => self.driver.enable(network),
            DriverAction::Disable => self.driver.disable(network),
            DriverAction::Restart => self.driver.restart(network),
            DriverAction::ReloadAllocations => self.driver.reload_allocations(network),
        };
        metrics::record_driver_call(action, result.is_ok());

        match result {
            Ok(()) => true,
            Err(DriverError::Conflict(msg)) => {
                // No resync: the agent will receive the event for the
                // network's own status update.
                tracing::warn!(network_id = %network.id, action = %action, conflict = %msg,
                    "Unable to apply action, network state conflicts; check that the \
                     network and its subnets still exist");
                false
            }
            Err(DriverError::AllocationFailure(msg)) => {
                // No resync: retried automatically on the notification that
                // frees an address or expands the pool.
                tracing::warn!(network_id = %network.id, action = %action, error = %msg,
                    "Address allocation failed, waiting for pool change");
                false
            }
            Err(e) => {
                tracing::error!(network_id = %network.id, action = %action, error = %e,
                    "Driver call failed");
                false
            }
        }
    }

    fn log_cache_state(&self, cache: &NetworkCache) {
        let summary = cache.state_summary();
        metrics::record_cache_summary(summary);
        tracing::debug!(
            networks = summary.networks,
            subnets = summary.subnets,
            ports = summary.ports,
            "Cache state"
        );
    }

    fn lock_cache(&self) -> MutexGuard<'_, NetworkCache> {
        self.cache.lock().expect("reconcile lock poisoned")
    }
}
