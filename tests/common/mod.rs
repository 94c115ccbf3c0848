//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use dhcp_agent::agent::{DhcpAgent, NetworkCache, SharedCache};
use dhcp_agent::config::AgentConfig;
use dhcp_agent::driver::{DhcpDriver, DriverError};
use dhcp_agent::http::HttpServer;
use dhcp_agent::lifecycle::Shutdown;
use dhcp_agent::model::Network;

/// Backend double that records every action it is asked to perform.
#[derive(Default)]
pub struct RecordingDriver {
    calls: Mutex<Vec<(String, String)>>,
}

impl RecordingDriver {
    /// Action names in invocation order.
    pub fn actions(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(action, _)| action.clone())
            .collect()
    }

    fn record(&self, action: &str, network: &Network) {
        self.calls
            .lock()
            .unwrap()
            .push((action.to_string(), network.id.clone()));
    }
}

impl DhcpDriver for RecordingDriver {
    fn enable(&self, network: &Network) -> Result<(), DriverError> {
        self.record("enable", network);
        Ok(())
    }
    fn disable(&self, network: &Network) -> Result<(), DriverError> {
        self.record("disable", network);
        Ok(())
    }
    fn restart(&self, network: &Network) -> Result<(), DriverError> {
        self.record("restart", network);
        Ok(())
    }
    fn reload_allocations(&self, network: &Network) -> Result<(), DriverError> {
        self.record("reload_allocations", network);
        Ok(())
    }
    fn existing_dhcp_networks(&self) -> Result<Vec<String>, DriverError> {
        Err(DriverError::Unsupported)
    }
    fn check_version(&self) -> Result<String, DriverError> {
        Ok("recording".to_string())
    }
}

/// Start an agent server on `addr` backed by `driver`. The returned
/// shutdown handle stops the server when triggered.
pub async fn start_agent(addr: SocketAddr, driver: Arc<RecordingDriver>) -> Arc<Shutdown> {
    let mut config = AgentConfig::default();
    config.listener.bind_address = addr.to_string();
    let config = Arc::new(config);

    let cache: SharedCache = Arc::new(Mutex::new(NetworkCache::new()));
    let agent = Arc::new(DhcpAgent::new(config.clone(), driver, cache));

    let shutdown = Arc::new(Shutdown::new());
    let server = HttpServer::new(&config, agent, shutdown.clone());
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        let _ = server.run(listener).await;
    });

    shutdown
}

#[allow(dead_code)]
pub fn network_payload(network_id: &str, subnets: &[(&str, &str, bool)]) -> Value {
    json!({
        "network": {
            "id": network_id,
            "admin_state_up": true,
            "subnets": subnets
                .iter()
                .map(|(id, cidr, enable_dhcp)| {
                    json!({
                        "id": id,
                        "network_id": network_id,
                        "cidr": cidr,
                        "ip_version": 4,
                        "enable_dhcp": enable_dhcp,
                    })
                })
                .collect::<Vec<_>>(),
        }
    })
}

#[allow(dead_code)]
pub fn port_payload(port_id: &str, network_id: &str, ips: &[&str]) -> Value {
    json!({
        "port": {
            "id": port_id,
            "network_id": network_id,
            "mac_address": "fa:16:3e:00:00:01",
            "fixed_ips": ips
                .iter()
                .map(|ip| json!({"subnet_id": "s1", "ip_address": ip}))
                .collect::<Vec<_>>(),
        }
    })
}
