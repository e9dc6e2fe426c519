//! Runtime topology configuration.
//!
//! ```rust,no_run
//! use zonal::config::TopologyConfig;
//!
//! // Participant node in zone1 of the "acme" domain
//! let node = TopologyConfig::node("acme", "zone1");
//!
//! // The domain controller
//! let controller = TopologyConfig::controller("acme");
//!
//! // Or everything from the environment
//! let config = TopologyConfig::from_env().expect("invalid configuration");
//! ```

use std::time::Duration;

use crate::constants::{
    CONTROLLER_ZONE_TOKEN, DEFAULT_EVENT_CAPACITY, DEFAULT_RUNTIME_SYNC_TIMEOUT,
    DEFAULT_SYNC_SEND_TIMEOUT, NAME_DELIMITER,
};
use crate::membership::{NodeIdentity, NodeRole, sequence_from_clock};

/// Configuration of one runtime's topology services.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    /// Domain this runtime belongs to.
    pub domain_name: String,
    /// Zone of a participant node. Ignored for the controller.
    pub zone_name: Option<String>,
    pub role: NodeRole,
    /// Orders runtimes inside a zone; the smallest one leads.
    ///
    /// Compared as a string, so generated ids are zero padded.
    pub sequence_id: String,
    /// Timeout of a synchronous send when the caller supplies none.
    pub default_timeout: Duration,
    /// Timeout of the runtime-update request sent while synchronizing.
    pub runtime_sync_timeout: Duration,
    /// Deliver broadcasts and zone fan-out sends back to the sender as well.
    pub local_delivery: bool,
    /// Capacity of the domain event channel.
    pub event_capacity: usize,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            domain_name: "default".to_string(),
            zone_name: Some("default".to_string()),
            role: NodeRole::Node,
            sequence_id: sequence_from_clock(),
            default_timeout: DEFAULT_SYNC_SEND_TIMEOUT,
            runtime_sync_timeout: DEFAULT_RUNTIME_SYNC_TIMEOUT,
            local_delivery: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl TopologyConfig {
    /// A participant node of `zone`.
    pub fn node(domain: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            domain_name: domain.into(),
            zone_name: Some(zone.into()),
            role: NodeRole::Node,
            ..Self::default()
        }
    }

    /// The controller of `domain`.
    pub fn controller(domain: impl Into<String>) -> Self {
        Self {
            domain_name: domain.into(),
            zone_name: None,
            role: NodeRole::Controller,
            ..Self::default()
        }
    }

    pub fn with_sequence_id(mut self, sequence_id: impl Into<String>) -> Self {
        self.sequence_id = sequence_id.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_runtime_sync_timeout(mut self, timeout: Duration) -> Self {
        self.runtime_sync_timeout = timeout;
        self
    }

    pub fn with_local_delivery(mut self, enabled: bool) -> Self {
        self.local_delivery = enabled;
        self
    }

    /// Logical identity this configuration joins with.
    ///
    /// The controller always uses the well-known identity of its domain.
    pub fn identity(&self) -> NodeIdentity {
        match self.role {
            NodeRole::Controller => NodeIdentity::controller(&self.domain_name),
            NodeRole::Node => NodeIdentity {
                domain: self.domain_name.clone(),
                role: NodeRole::Node,
                zone: self.zone_name.clone(),
                sequence_id: self.sequence_id.clone(),
            },
        }
    }

    /// Validate the configuration and return any errors found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.domain_name.is_empty() {
            errors.push("domain_name must not be empty".to_string());
        } else if self.domain_name.contains(NAME_DELIMITER) {
            errors.push(format!(
                "domain_name '{}' must not contain '{}'",
                self.domain_name, NAME_DELIMITER
            ));
        }

        if self.role == NodeRole::Node {
            match self.zone_name.as_deref() {
                None | Some("") => errors.push("zone_name is required for a node".to_string()),
                Some(CONTROLLER_ZONE_TOKEN) => errors.push(format!(
                    "zone_name '{}' is reserved for the controller",
                    CONTROLLER_ZONE_TOKEN
                )),
                Some(zone) if zone.contains(NAME_DELIMITER) => errors.push(format!(
                    "zone_name '{}' must not contain '{}'",
                    zone, NAME_DELIMITER
                )),
                Some(_) => {}
            }

            if self.sequence_id.is_empty() {
                errors.push("sequence_id must not be empty".to_string());
            } else if self.sequence_id.contains(NAME_DELIMITER) {
                errors.push(format!(
                    "sequence_id '{}' must not contain '{}'",
                    self.sequence_id, NAME_DELIMITER
                ));
            }
        }

        if self.default_timeout.is_zero() {
            errors.push("default_timeout must be greater than zero".to_string());
        }

        if self.runtime_sync_timeout.is_zero() {
            errors.push("runtime_sync_timeout must be greater than zero".to_string());
        }

        if self.event_capacity == 0 {
            errors.push("event_capacity must be greater than zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Environment variables:
    /// - `DOMAIN_NAME`: Domain name (default: default)
    /// - `NODE_ROLE`: "controller" or "node" (default: node)
    /// - `ZONE_NAME`: Zone of a node (default: default)
    /// - `RUNTIME_SEQUENCE`: Sequence id (default: generated from the clock)
    /// - `SYNC_SEND_TIMEOUT_MS`: Default synchronous send timeout (default: 5000)
    /// - `RUNTIME_SYNC_TIMEOUT_MS`: Runtime update timeout (default: 30000)
    /// - `LOCAL_DELIVERY`: "true" or "false" (default: false)
    /// - `EVENT_CHANNEL_CAPACITY`: Event channel capacity (default: 256)
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Self::default();

        let domain_name =
            std::env::var("DOMAIN_NAME").unwrap_or_else(|_| defaults.domain_name.clone());

        let role: NodeRole = match std::env::var("NODE_ROLE") {
            Ok(v) => v.parse().map_err(|e| format!("Invalid NODE_ROLE: {}", e))?,
            Err(_) => NodeRole::Node,
        };

        let zone_name = match role {
            NodeRole::Controller => None,
            NodeRole::Node => Some(
                std::env::var("ZONE_NAME").unwrap_or_else(|_| "default".to_string()),
            ),
        };

        let sequence_id = std::env::var("RUNTIME_SEQUENCE").unwrap_or(defaults.sequence_id);

        let default_timeout = match std::env::var("SYNC_SEND_TIMEOUT_MS") {
            Ok(v) => Duration::from_millis(
                v.parse()
                    .map_err(|e| format!("Invalid SYNC_SEND_TIMEOUT_MS: {}", e))?,
            ),
            Err(_) => defaults.default_timeout,
        };

        let runtime_sync_timeout = match std::env::var("RUNTIME_SYNC_TIMEOUT_MS") {
            Ok(v) => Duration::from_millis(
                v.parse()
                    .map_err(|e| format!("Invalid RUNTIME_SYNC_TIMEOUT_MS: {}", e))?,
            ),
            Err(_) => defaults.runtime_sync_timeout,
        };

        let local_delivery = std::env::var("LOCAL_DELIVERY")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(defaults.local_delivery);

        let event_capacity: usize = std::env::var("EVENT_CHANNEL_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.event_capacity);

        let config = Self {
            domain_name,
            zone_name,
            role,
            sequence_id,
            default_timeout,
            runtime_sync_timeout,
            local_delivery,
            event_capacity,
        };

        config
            .validate()
            .map_err(|errors| format!("Invalid configuration: {}", errors.join("; ")))?;

        Ok(config)
    }
}
