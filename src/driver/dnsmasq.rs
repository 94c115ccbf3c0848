//! dnsmasq backend.
//!
//! Spawns one dnsmasq process per network, rooted in the network's state
//! directory. dnsmasq daemonizes itself and writes a pid file; liveness
//! and respawning are delegated to the process monitor. Lease and host
//! file contents are the address-assignment layer's concern, not ours.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::cache::SharedCache;
use crate::config::AgentConfig;
use crate::model::Network;
use crate::process::monitor::{pid_file_alive, read_pid, MonitorKey};
use crate::process::{PrivilegedExecutor, ProcessMonitor};

use super::{DhcpDriver, DriverError};

pub struct DnsmasqDriver {
    config: Arc<AgentConfig>,
    executor: Arc<PrivilegedExecutor>,
    monitor: Arc<ProcessMonitor>,
    reconcile_lock: SharedCache,
}

impl DnsmasqDriver {
    pub fn new(
        config: Arc<AgentConfig>,
        executor: Arc<PrivilegedExecutor>,
        monitor: Arc<ProcessMonitor>,
        reconcile_lock: SharedCache,
    ) -> Self {
        Self {
            config,
            executor,
            monitor,
            reconcile_lock,
        }
    }

    fn dhcp_root(&self) -> PathBuf {
        PathBuf::from(&self.config.agent.state_path).join("dhcp")
    }

    fn network_dir(&self, network_id: &str) -> PathBuf {
        self.dhcp_root().join(network_id)
    }

    fn pid_path(&self, network_id: &str) -> PathBuf {
        self.network_dir(network_id).join("pid")
    }

    fn lease_time_arg(&self) -> String {
        let duration = self.config.driver.dhcp_lease_duration;
        if duration == -1 {
            "infinite".to_string()
        } else {
            format!("{duration}s")
        }
    }

    /// The dnsmasq invocation for this network: one static dhcp-range per
    /// DHCP-enabled subnet, pid file under the network's state directory.
    fn spawn_command(&self, network: &Network) -> Vec<String> {
        let dir = self.network_dir(&network.id);
        let mut cmd = vec![
            self.config.driver.dnsmasq_path.clone(),
            "--no-hosts".to_string(),
            "--no-resolv".to_string(),
            "--except-interface=lo".to_string(),
            format!("--pid-file={}", self.pid_path(&network.id).display()),
            format!("--dhcp-leasefile={}", dir.join("leases").display()),
        ];
        for (index, subnet) in network.subnets.iter().filter(|s| s.enable_dhcp).enumerate() {
            let prefix = subnet.cidr.split('/').next().unwrap_or(&subnet.cidr);
            cmd.push(format!(
                "--dhcp-range=set:tag{index},{prefix},static,{}",
                self.lease_time_arg()
            ));
        }
        cmd
    }

    fn spawn_process(&self, network: &Network) -> Result<(), DriverError> {
        fs::create_dir_all(self.network_dir(&network.id))
            .map_err(|e| DriverError::Backend(format!("state dir: {e}")))?;
        let cmd = self.spawn_command(network);
        self.executor.execute(&cmd, None, true, &[], true)?;
        tracing::info!(network_id = %network.id, "dnsmasq started");
        Ok(())
    }

    /// Put the freshly spawned process under supervision. The respawn
    /// closure takes the reconciliation lock before re-running the spawn
    /// command, so it serializes with event handling.
    fn register(&self, network: &Network) {
        let key = MonitorKey::dhcp(&network.id);
        let pid_file = self.pid_path(&network.id);
        let respawn = make_respawn(
            self.executor.clone(),
            self.monitor.clone(),
            self.reconcile_lock.clone(),
            self.spawn_command(network),
            key.clone(),
            pid_file.clone(),
        );
        self.monitor.register(key, pid_file, respawn);
    }

    fn kill_process(&self, network_id: &str, signal: &str) -> Result<(), DriverError> {
        let Some(pid) = read_pid(&self.pid_path(network_id)) else {
            tracing::warn!(network_id = %network_id, "No pid file, dnsmasq not running");
            return Ok(());
        };
        let cmd = vec!["kill".to_string(), format!("-{signal}"), pid.to_string()];
        self.executor.execute(&cmd, None, true, &[], true)?;
        Ok(())
    }
}

/// Build the respawn closure for one network's dnsmasq process. The
/// monitor takes the entry out before invoking it, so a successful respawn
/// re-registers itself with a freshly built twin (closures cannot capture
/// themselves).
fn make_respawn(
    executor: Arc<PrivilegedExecutor>,
    monitor: Arc<ProcessMonitor>,
    lock: SharedCache,
    cmd: Vec<String>,
    key: MonitorKey,
    pid_file: PathBuf,
) -> Box<dyn Fn() + Send + Sync> {
    Box::new(move || {
        let _guard = lock.lock().expect("reconcile lock poisoned");
        match executor.execute(&cmd, None, true, &[], true) {
            Ok(_) => {
                tracing::info!(process = %key, "dnsmasq respawned");
                monitor.register(
                    key.clone(),
                    pid_file.clone(),
                    make_respawn(
                        executor.clone(),
                        monitor.clone(),
                        lock.clone(),
                        cmd.clone(),
                        key.clone(),
                        pid_file.clone(),
                    ),
                );
            }
            Err(e) => {
                tracing::error!(process = %key, error = %e, "Failed to respawn dnsmasq");
            }
        }
    })
}

impl DhcpDriver for DnsmasqDriver {
    fn enable(&self, network: &Network) -> Result<(), DriverError> {
        if pid_file_alive(&self.pid_path(&network.id)) {
            // Already serving; topology may have changed underneath it.
            return self.restart(network);
        }
        self.spawn_process(network)?;
        self.register(network);
        Ok(())
    }

    fn disable(&self, network: &Network) -> Result<(), DriverError> {
        self.monitor.unregister(&MonitorKey::dhcp(&network.id));
        self.kill_process(&network.id, "9")?;
        let _ = fs::remove_file(self.pid_path(&network.id));
        tracing::info!(network_id = %network.id, "dnsmasq stopped");
        Ok(())
    }

    fn restart(&self, network: &Network) -> Result<(), DriverError> {
        self.disable(network)?;
        self.spawn_process(network)?;
        self.register(network);
        Ok(())
    }

    fn reload_allocations(&self, network: &Network) -> Result<(), DriverError> {
        // SIGHUP makes dnsmasq re-read its host/opts files in place.
        self.kill_process(&network.id, "HUP")
    }

    fn existing_dhcp_networks(&self) -> Result<Vec<String>, DriverError> {
        let root = self.dhcp_root();
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&root)
            .map_err(|e| DriverError::Backend(format!("read {}: {e}", root.display())))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DriverError::Backend(e.to_string()))?;
            if entry.path().is_dir() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(ids)
    }

    fn check_version(&self) -> Result<String, DriverError> {
        let cmd = vec![
            self.config.driver.dnsmasq_path.clone(),
            "--version".to_string(),
        ];
        let result = self.executor.execute(&cmd, None, true, &[], false)?;
        let version = result
            .stdout
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        if version.is_empty() {
            return Err(DriverError::Backend(
                "could not determine dnsmasq version".to_string(),
            ));
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::cache::NetworkCache;
    use crate::config::schema::RootwrapConfig;
    use crate::lifecycle::Shutdown;
    use crate::model::Subnet;
    use std::sync::Mutex;

    fn driver_with_state_path(state_path: &str) -> DnsmasqDriver {
        let mut config = AgentConfig::default();
        config.agent.state_path = state_path.to_string();
        let config = Arc::new(config);
        DnsmasqDriver::new(
            config.clone(),
            Arc::new(PrivilegedExecutor::new(&RootwrapConfig::default())),
            Arc::new(ProcessMonitor::new(
                config.process_monitor.clone(),
                Arc::new(Shutdown::new()),
            )),
            Arc::new(Mutex::new(NetworkCache::new())),
        )
    }

    fn network_with_subnets(cidrs: &[&str]) -> Network {
        Network {
            id: "net-1".into(),
            admin_state_up: true,
            subnets: cidrs
                .iter()
                .enumerate()
                .map(|(i, cidr)| Subnet {
                    id: format!("s{i}"),
                    network_id: "net-1".into(),
                    cidr: (*cidr).into(),
                    ip_version: 4,
                    enable_dhcp: true,
                    gateway_ip: None,
                    dns_nameservers: vec![],
                    ipv6_ra_mode: None,
                    ipv6_address_mode: None,
                })
                .collect(),
            ports: vec![],
        }
    }

    #[test]
    fn test_spawn_command_shape() {
        let driver = driver_with_state_path("/var/lib/test-agent");
        let cmd = driver.spawn_command(&network_with_subnets(&["10.0.0.0/24", "10.0.1.0/24"]));

        assert_eq!(cmd[0], "dnsmasq");
        assert!(cmd.iter().any(|a| a == "--no-resolv"));
        assert!(cmd
            .iter()
            .any(|a| a == "--pid-file=/var/lib/test-agent/dhcp/net-1/pid"));
        assert!(cmd
            .iter()
            .any(|a| a == "--dhcp-range=set:tag0,10.0.0.0,static,86400s"));
        assert!(cmd
            .iter()
            .any(|a| a == "--dhcp-range=set:tag1,10.0.1.0,static,86400s"));
    }

    #[test]
    fn test_infinite_lease_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::default();
        config.agent.state_path = dir.path().to_string_lossy().into_owned();
        config.driver.dhcp_lease_duration = -1;
        let config = Arc::new(config);
        let driver = DnsmasqDriver::new(
            config.clone(),
            Arc::new(PrivilegedExecutor::new(&RootwrapConfig::default())),
            Arc::new(ProcessMonitor::new(
                config.process_monitor.clone(),
                Arc::new(Shutdown::new()),
            )),
            Arc::new(Mutex::new(NetworkCache::new())),
        );
        let cmd = driver.spawn_command(&network_with_subnets(&["10.0.0.0/24"]));
        assert!(cmd
            .iter()
            .any(|a| a == "--dhcp-range=set:tag0,10.0.0.0,static,infinite"));
    }

    #[test]
    fn test_existing_networks_from_state_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver_with_state_path(&dir.path().to_string_lossy());

        fs::create_dir_all(dir.path().join("dhcp/net-a")).unwrap();
        fs::create_dir_all(dir.path().join("dhcp/net-b")).unwrap();
        fs::write(dir.path().join("dhcp/stray-file"), b"x").unwrap();

        let mut ids = driver.existing_dhcp_networks().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["net-a", "net-b"]);
    }

    #[test]
    fn test_existing_networks_empty_without_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver_with_state_path(&dir.path().join("missing").to_string_lossy());
        assert!(driver.existing_dhcp_networks().unwrap().is_empty());
    }

    #[test]
    fn test_disable_without_pid_file_is_benign() {
        let dir = tempfile::tempdir().unwrap();
        let driver = driver_with_state_path(&dir.path().to_string_lossy());
        driver.disable(&network_with_subnets(&[])).unwrap();
    }
}
