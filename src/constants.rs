//! Centralized protocol and configuration constants.
//!
//! # Categories
//!
//! - **Identity Encoding**: tokens of the `domain:role:zone:sequence` runtime name
//! - **Command Types**: well-known command type tags handled by this crate
//! - **Timeouts**: defaults for synchronous sends and runtime synchronization

use std::time::Duration;

// =============================================================================
// Identity Encoding
// =============================================================================

/// Field delimiter of an encoded runtime name.
pub const NAME_DELIMITER: char = ':';

/// Number of fields in an encoded runtime name.
pub const NAME_FIELD_COUNT: usize = 4;

/// Role token of the domain controller.
pub const CONTROLLER_ROLE: &str = "controller";

/// Role token of a participant node.
pub const NODE_ROLE: &str = "node";

/// Zone token written in place of a zone name for the controller.
pub const CONTROLLER_ZONE_TOKEN: &str = "-";

/// Sequence id of the well-known controller identity.
pub const CONTROLLER_SEQUENCE: &str = "0";

/// Width of generated sequence ids.
///
/// Zero padding keeps lexicographic order equal to numeric order.
pub const SEQUENCE_ID_WIDTH: usize = 20;

// =============================================================================
// Command Types
// =============================================================================

/// Command type of the runtime-update request a synchronizing node sends.
pub const RUNTIME_UPDATE_COMMAND: &str = "runtime-update";

/// Command type of a live deployment broadcast by the controller.
///
/// The body is a position-stamped [`crate::sync::Deployment`].
pub const DEPLOYMENT_COMMAND: &str = "deployment";

// =============================================================================
// Timeouts
// =============================================================================

/// Default timeout for synchronous sends.
pub const DEFAULT_SYNC_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for the runtime-update request issued by the synchronizer.
pub const DEFAULT_RUNTIME_SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of the domain event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;
