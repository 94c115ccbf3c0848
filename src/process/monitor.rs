//! Liveness policing for driver-spawned processes.
//!
//! # Responsibilities
//! - Track one long-running process per managed network, keyed by
//!   (resource type, network id)
//! - Periodically probe pid-file liveness
//! - On death, either re-invoke the owning driver's start path or treat
//!   child death as fatal for the whole agent
//!
//! # Design Decisions
//! - Probing holds only the registry lock, never the reconciliation lock;
//!   the registered respawn closure acquires the reconciliation lock itself
//! - A zero check interval disables monitoring entirely

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::{MonitorAction, ProcessMonitorConfig};
use crate::lifecycle::Shutdown;

/// Identity of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorKey {
    /// Resource class served by the process (e.g., "dhcp").
    pub resource_type: String,
    /// Network the process serves.
    pub network_id: String,
}

impl MonitorKey {
    pub fn dhcp(network_id: impl Into<String>) -> Self {
        Self {
            resource_type: "dhcp".to_string(),
            network_id: network_id.into(),
        }
    }
}

impl fmt::Display for MonitorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.network_id)
    }
}

/// Callback that restarts a dead process. Registered by the driver; must
/// acquire the reconciliation lock before touching shared state.
pub type RespawnFn = Box<dyn Fn() + Send + Sync>;

struct MonitoredProcess {
    pid_file: PathBuf,
    respawn: RespawnFn,
}

/// Supervises externally spawned long-running processes.
pub struct ProcessMonitor {
    config: ProcessMonitorConfig,
    registry: Mutex<HashMap<MonitorKey, MonitoredProcess>>,
    shutdown: Arc<Shutdown>,
}

impl ProcessMonitor {
    pub fn new(config: ProcessMonitorConfig, shutdown: Arc<Shutdown>) -> Self {
        Self {
            config,
            registry: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Start (or replace) supervision of the process behind `pid_file`.
    pub fn register(&self, key: MonitorKey, pid_file: PathBuf, respawn: RespawnFn) {
        tracing::debug!(process = %key, pid_file = %pid_file.display(), "Monitoring process");
        self.lock_registry()
            .insert(key, MonitoredProcess { pid_file, respawn });
    }

    /// Stop supervising; used when a network is disabled on purpose.
    pub fn unregister(&self, key: &MonitorKey) {
        if self.lock_registry().remove(key).is_some() {
            tracing::debug!(process = %key, "Stopped monitoring process");
        }
    }

    pub fn is_registered(&self, key: &MonitorKey) -> bool {
        self.lock_registry().contains_key(key)
    }

    /// Run the liveness loop until shutdown. A zero interval disables
    /// checking and returns immediately.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        if self.config.check_interval_secs == 0 {
            tracing::info!("Process monitoring disabled (check interval is zero)");
            return;
        }

        tracing::info!(
            interval_secs = self.config.check_interval_secs,
            action = ?self.config.action,
            "Process monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.check_interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let monitor = self.clone();
                    let probe = tokio::task::spawn_blocking(move || monitor.check_all());
                    if let Err(e) = probe.await {
                        tracing::error!(error = %e, "Liveness check task failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Process monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One probe pass over every registered process.
    fn check_all(&self) {
        let dead: Vec<MonitorKey> = {
            let registry = self.lock_registry();
            registry
                .iter()
                .filter(|(_, p)| !pid_file_alive(&p.pid_file))
                .map(|(k, _)| k.clone())
                .collect()
        };

        for key in dead {
            match self.config.action {
                MonitorAction::Respawn => {
                    tracing::warn!(process = %key, "Supervised process died, respawning");
                    // Take the entry out so the respawn path can re-register
                    // without deadlocking on the registry lock.
                    let entry = self.lock_registry().remove(&key);
                    if let Some(entry) = entry {
                        (entry.respawn)();
                    }
                }
                MonitorAction::Exit => {
                    tracing::error!(
                        process = %key,
                        "Supervised process died and the monitor policy is 'exit', stopping agent"
                    );
                    self.shutdown.trigger();
                    return;
                }
            }
        }
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, HashMap<MonitorKey, MonitoredProcess>> {
        self.registry.lock().expect("process registry lock poisoned")
    }
}

/// Read a pid from `path` and check it against /proc.
pub fn pid_file_alive(path: &Path) -> bool {
    match read_pid(path) {
        Some(pid) => Path::new(&format!("/proc/{pid}")).exists(),
        None => false,
    }
}

/// The pid stored in a pid file, if the file exists and parses.
pub fn read_pid(path: &Path) -> Option<u32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monitor(action: MonitorAction) -> ProcessMonitor {
        ProcessMonitor::new(
            ProcessMonitorConfig {
                check_interval_secs: 1,
                action,
            },
            Arc::new(Shutdown::new()),
        )
    }

    fn dead_pid_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("pid");
        // Non-existent pid; far above normal pid ranges on test hosts.
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "4194304").unwrap();
        path
    }

    #[test]
    fn test_register_unregister() {
        let monitor = monitor(MonitorAction::Respawn);
        let key = MonitorKey::dhcp("net-1");
        monitor.register(key.clone(), PathBuf::from("/tmp/pid"), Box::new(|| {}));
        assert!(monitor.is_registered(&key));
        monitor.unregister(&key);
        assert!(!monitor.is_registered(&key));
    }

    #[test]
    fn test_dead_process_triggers_respawn() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = monitor(MonitorAction::Respawn);
        let respawns = Arc::new(AtomicUsize::new(0));

        let counter = respawns.clone();
        monitor.register(
            MonitorKey::dhcp("net-1"),
            dead_pid_file(&dir),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        monitor.check_all();
        assert_eq!(respawns.load(Ordering::SeqCst), 1);
        // The dead entry was taken out; re-registration is the respawn
        // path's job.
        assert!(!monitor.is_registered(&MonitorKey::dhcp("net-1")));
    }

    #[test]
    fn test_live_process_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pid");
        fs::write(&path, format!("{}\n", std::process::id())).unwrap();

        let monitor = monitor(MonitorAction::Respawn);
        let respawns = Arc::new(AtomicUsize::new(0));
        let counter = respawns.clone();
        monitor.register(
            MonitorKey::dhcp("net-1"),
            path,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        monitor.check_all();
        assert_eq!(respawns.load(Ordering::SeqCst), 0);
        assert!(monitor.is_registered(&MonitorKey::dhcp("net-1")));
    }

    #[test]
    fn test_exit_policy_triggers_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let shutdown = Arc::new(Shutdown::new());
        let monitor = ProcessMonitor::new(
            ProcessMonitorConfig {
                check_interval_secs: 1,
                action: MonitorAction::Exit,
            },
            shutdown.clone(),
        );
        let mut rx = shutdown.subscribe();

        monitor.register(MonitorKey::dhcp("net-1"), dead_pid_file(&dir), Box::new(|| {}));
        monitor.check_all();

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_missing_pid_file_counts_as_dead() {
        assert!(!pid_file_alive(Path::new("/nonexistent/pid")));
    }
}
