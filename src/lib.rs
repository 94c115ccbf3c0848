//! Node-local DHCP network configuration agent library.

pub mod agent;
pub mod config;
pub mod driver;
pub mod http;
pub mod lifecycle;
pub mod model;
pub mod observability;
pub mod process;

pub use config::AgentConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
