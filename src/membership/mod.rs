//! Group membership: runtime identities, views and zone leadership.
//!
//! - [`identity`]: encodes a runtime's logical identity into the name it
//!   joins the group with, and decodes other members' names
//! - [`view`]: membership snapshots and the differ
//! - [`leader`]: deterministic per-zone leader selection

pub mod identity;
pub mod leader;
pub mod view;

pub use identity::{NodeIdentity, NodeRole, sequence_from_clock};
pub use leader::{controller_of, is_leader, leader_of, new_leaders_since};
pub use view::{Endpoint, Member, MembershipView, ViewDiff, diff};
