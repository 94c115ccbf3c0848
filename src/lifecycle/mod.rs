//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl+C / SIGTERM, or a fatal monitor policy decision
//!     → broadcast to server and monitor loops → drain → exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel shared by every long-running task
//! - The process monitor's 'exit' policy reuses the same channel

pub mod shutdown;

pub use shutdown::Shutdown;
