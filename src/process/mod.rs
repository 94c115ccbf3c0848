//! Child-process execution and supervision.
//!
//! # Responsibilities
//! - Run commands, optionally through the privilege-escalation boundary
//! - Keep a single lazily-created connection to the rootwrap daemon
//! - Police liveness of driver-spawned long-running processes
//!
//! # Design Decisions
//! - Command execution is blocking by design; callers hold the
//!   reconciliation lock across it and bound driver latency accordingly
//! - Liveness probing never holds the reconciliation lock; only the
//!   respawn path does

pub mod daemon;
pub mod executor;
pub mod monitor;

pub use executor::{CommandResult, ExecError, PrivilegedExecutor};
pub use monitor::{MonitorKey, ProcessMonitor};
