//! Logical runtime identity and its transport name encoding.
//!
//! Every member of the group attaches an encoded name when it joins:
//!
//! ```text
//! domain:role:zone:sequence
//!
//! acme:node:zone1:00000000001700000000     participant node
//! acme:controller:-:0                      domain controller
//! ```
//!
//! Decoding is total: anything that does not match the format yields `None`
//! so callers treat it as "no logical identity" instead of failing.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::constants::{
    CONTROLLER_ROLE, CONTROLLER_SEQUENCE, CONTROLLER_ZONE_TOKEN, NAME_DELIMITER,
    NAME_FIELD_COUNT, NODE_ROLE, SEQUENCE_ID_WIDTH,
};

/// Role of a runtime inside a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// The single domain controller. Belongs to no zone.
    Controller,
    /// A participant runtime inside a zone.
    Node,
}

impl NodeRole {
    /// Token used in the encoded runtime name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Controller => CONTROLLER_ROLE,
            NodeRole::Node => NODE_ROLE,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            CONTROLLER_ROLE => Ok(NodeRole::Controller),
            NODE_ROLE | "participant" => Ok(NodeRole::Node),
            _ => Err(format!(
                "Unknown node role '{}'. Valid roles: controller, node",
                s
            )),
        }
    }
}

/// Decoded logical identity of a runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub domain: String,
    pub role: NodeRole,
    /// Zone name. Always `None` for the controller.
    pub zone: Option<String>,
    /// Unique within a zone. Leadership goes to the smallest one.
    pub sequence_id: String,
}

impl NodeIdentity {
    /// Identity of a participant node.
    pub fn node(
        domain: impl Into<String>,
        zone: impl Into<String>,
        sequence_id: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            role: NodeRole::Node,
            zone: Some(zone.into()),
            sequence_id: sequence_id.into(),
        }
    }

    /// The well-known controller identity of a domain.
    pub fn controller(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            role: NodeRole::Controller,
            zone: None,
            sequence_id: CONTROLLER_SEQUENCE.to_string(),
        }
    }

    pub fn is_controller(&self) -> bool {
        self.role == NodeRole::Controller
    }

    /// Zone name, if this identity belongs to a zone.
    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    /// Encode into the transport name format.
    pub fn encode(&self) -> String {
        let zone = match (&self.role, &self.zone) {
            (NodeRole::Node, Some(zone)) => zone.as_str(),
            _ => CONTROLLER_ZONE_TOKEN,
        };
        format!(
            "{domain}{d}{role}{d}{zone}{d}{seq}",
            domain = self.domain,
            role = self.role,
            seq = self.sequence_id,
            d = NAME_DELIMITER,
        )
    }

    /// Decode a transport name. Returns `None` if it is not a runtime name.
    pub fn decode(name: &str) -> Option<Self> {
        let fields: Vec<&str> = name.split(NAME_DELIMITER).collect();
        if fields.len() != NAME_FIELD_COUNT || fields.iter().any(|f| f.is_empty()) {
            return None;
        }
        let role = match fields[1] {
            CONTROLLER_ROLE => NodeRole::Controller,
            NODE_ROLE => NodeRole::Node,
            _ => return None,
        };
        let zone = match role {
            NodeRole::Controller => None,
            NodeRole::Node if fields[2] == CONTROLLER_ZONE_TOKEN => return None,
            NodeRole::Node => Some(fields[2].to_string()),
        };
        Some(Self {
            domain: fields[0].to_string(),
            role,
            zone,
            sequence_id: fields[3].to_string(),
        })
    }

    /// Check that every field can be encoded and decoded back unchanged.
    pub fn validate(&self) -> Result<(), String> {
        let mut fields = vec![
            ("domain", self.domain.as_str()),
            ("sequence_id", self.sequence_id.as_str()),
        ];
        match (&self.role, &self.zone) {
            (NodeRole::Node, Some(zone)) => {
                if zone == CONTROLLER_ZONE_TOKEN {
                    return Err(format!(
                        "zone name '{}' is reserved for the controller",
                        CONTROLLER_ZONE_TOKEN
                    ));
                }
                fields.push(("zone", zone.as_str()));
            }
            (NodeRole::Node, None) => return Err("a node must belong to a zone".to_string()),
            (NodeRole::Controller, _) => {}
        }
        for (label, value) in fields {
            if value.is_empty() {
                return Err(format!("{} must not be empty", label));
            }
            if value.contains(NAME_DELIMITER) {
                return Err(format!(
                    "{} '{}' must not contain '{}'",
                    label, value, NAME_DELIMITER
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Generate a sequence id from the wall clock.
///
/// Fixed-width zero padding makes lexicographic order follow start order,
/// so the earliest started runtime of a zone becomes its leader.
pub fn sequence_from_clock() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    format!("{:0width$}", nanos, width = SEQUENCE_ID_WIDTH)
}
