//! Crate level errors.
//!
//! # Error Taxonomy
//!
//! | Variant | Meaning | Retryable |
//! |---------|---------|-----------|
//! | [`TopologyError::Timeout`] | A synchronous send got no reply before its deadline | yes |
//! | [`TopologyError::ControllerUnavailable`] | No controller member in the current view | yes |
//! | [`TopologyError::ZoneLeaderUnavailable`] | The zone has no members in the current view | yes |
//! | [`TopologyError::SyncUnavailable`] | No runtime-update source reachable | yes |
//! | [`TopologyError::DomainFault`] | Remote command execution failed | no |
//! | [`TopologyError::AggregateSendFailure`] | At least one member of a zone fan-out failed | no |
//! | [`TopologyError::Decode`] | Malformed identity or envelope | no |
//! | [`TopologyError::SyncFailed`] | Backlog replay stopped partway | no |
//!
//! # Propagation
//!
//! Decode and transport errors seen on the delivery path are logged and the
//! offending message is dropped; they never reach application callers. Only the
//! caller-facing operations (`send_synchronous*`, `broadcast*`) return errors.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::membership::Endpoint;

/// Result type for topology operations.
pub type TopologyResult<T> = Result<T, TopologyError>;

/// A single member's failure inside a zone fan-out call.
#[derive(Debug)]
pub struct MemberFailure {
    /// Encoded runtime name of the member.
    pub runtime_name: String,
    /// What went wrong for this member.
    pub error: TopologyError,
}

impl fmt::Display for MemberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.runtime_name, self.error)
    }
}

/// Errors produced by the topology services.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// A synchronous send's deadline elapsed with no response.
    #[error("Timed out after {}ms waiting for a response from {target}", .timeout.as_millis())]
    Timeout { target: Endpoint, timeout: Duration },

    /// No controller member is present in the current view.
    #[error("Domain controller is not available in the current view")]
    ControllerUnavailable,

    /// The zone has no leader in the current view.
    #[error("Zone {zone} has no leader in the current view")]
    ZoneLeaderUnavailable { zone: String },

    /// Neither the controller nor a zone leader can serve a runtime update.
    #[error("No runtime update source is available")]
    SyncUnavailable,

    /// The remote command execution raised an application-level error.
    #[error("Domain fault from {origin}: {}", String::from_utf8_lossy(.fault))]
    DomainFault { origin: Endpoint, fault: Bytes },

    /// One or more members of a zone fan-out call failed.
    #[error(
        "Synchronous send to zone {zone} failed for {} member(s) ({succeeded} succeeded): {}",
        .failures.len(),
        .failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; ")
    )]
    AggregateSendFailure {
        zone: String,
        succeeded: usize,
        failures: Vec<MemberFailure>,
    },

    /// Malformed identity or envelope.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Runtime synchronization replay failed partway.
    #[error(
        "Runtime synchronization failed at backlog index {failed_index} ({command_type}) after {applied} applied: {reason}"
    )]
    SyncFailed {
        /// Zero-based position of the failing command in the backlog.
        failed_index: usize,
        command_type: String,
        applied: usize,
        reason: String,
    },

    /// No member with the given runtime name is in the current view.
    #[error("Runtime {0} is not a member of the current view")]
    RuntimeNotFound(String),

    /// Operation attempted in the wrong lifecycle state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    /// The transport rejected or failed an operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Payload (de)serialization failed on the sending side.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TopologyError {
    /// Returns true if retrying later may succeed without any change on the caller's side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TopologyError::Timeout { .. }
                | TopologyError::ControllerUnavailable
                | TopologyError::ZoneLeaderUnavailable { .. }
                | TopologyError::SyncUnavailable
                | TopologyError::Transport(_)
        )
    }

    /// Short label used for metrics.
    pub fn as_metric_label(&self) -> &'static str {
        match self {
            TopologyError::Timeout { .. } => "timeout",
            TopologyError::ControllerUnavailable => "controller_unavailable",
            TopologyError::ZoneLeaderUnavailable { .. } => "leader_unavailable",
            TopologyError::SyncUnavailable => "sync_unavailable",
            TopologyError::DomainFault { .. } => "fault",
            TopologyError::AggregateSendFailure { .. } => "aggregate",
            TopologyError::Decode(_) => "decode",
            TopologyError::SyncFailed { .. } => "sync_failed",
            TopologyError::RuntimeNotFound(_) => "not_found",
            TopologyError::InvalidState { .. } => "invalid_state",
            TopologyError::Transport(_) => "transport",
            TopologyError::Serialization(_) => "serialization",
            TopologyError::Config(_) => "config",
        }
    }

    /// Fault message carried by a [`TopologyError::DomainFault`].
    pub fn fault_message(&self) -> Option<String> {
        match self {
            TopologyError::DomainFault { fault, .. } => {
                Some(String::from_utf8_lossy(fault).into_owned())
            }
            _ => None,
        }
    }
}

impl From<bincode::Error> for TopologyError {
    fn from(e: bincode::Error) -> Self {
        TopologyError::Serialization(e.to_string())
    }
}
