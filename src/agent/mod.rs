//! Node-local DHCP agent core: network cache and reconciliation engine.

pub mod cache;
pub mod reconciler;

pub use cache::{NetworkCache, SharedCache};
pub use reconciler::DhcpAgent;
