//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges and address formats
//! - Check the base MAC against the locally-administered unicast pattern
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AgentConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AgentConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn push_error(errors: &mut Vec<ValidationError>, field: &str, message: impl Into<String>) {
    errors.push(ValidationError {
        field: field.to_string(),
        message: message.into(),
    });
}

/// Validate a loaded configuration, collecting every problem found.
pub fn validate_config(config: &AgentConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        push_error(
            &mut errors,
            "listener.bind_address",
            format!("'{}' is not a valid socket address", config.listener.bind_address),
        );
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        push_error(
            &mut errors,
            "observability.metrics_address",
            format!(
                "'{}' is not a valid socket address",
                config.observability.metrics_address
            ),
        );
    }

    if config.agent.state_path.is_empty() {
        push_error(&mut errors, "agent.state_path", "must not be empty");
    }

    if !is_valid_base_mac(&config.agent.base_mac) {
        push_error(
            &mut errors,
            "agent.base_mac",
            format!("'{}' is not a valid base MAC address", config.agent.base_mac),
        );
    }

    if config.driver.backend.is_empty() {
        push_error(&mut errors, "driver.backend", "must not be empty");
    }

    if config.driver.dhcp_lease_duration == 0 || config.driver.dhcp_lease_duration < -1 {
        push_error(
            &mut errors,
            "driver.dhcp_lease_duration",
            "must be positive, or -1 for infinite leases",
        );
    }

    if let Some(helper) = &config.rootwrap.root_helper {
        if helper.trim().is_empty() {
            push_error(&mut errors, "rootwrap.root_helper", "must not be blank if set");
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Six colon-separated hex octets with an even (unicast, locally
/// assignable) second digit, e.g. "fa:16:3e:00:00:00".
fn is_valid_base_mac(mac: &str) -> bool {
    let octets: Vec<&str> = mac.split(':').collect();
    if octets.len() != 6 {
        return false;
    }
    if !octets
        .iter()
        .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return false;
    }
    // Multicast bit of the first octet must be clear.
    matches!(
        octets[0].chars().nth(1),
        Some('0' | '2' | '4' | '6' | '8' | 'a' | 'A' | 'c' | 'C' | 'e' | 'E')
    )
}
