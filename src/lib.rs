//! # Zonal
//! Zone-based group membership, leader election and synchronous messaging
//! for a domain of distributed runtimes.
//!
//! A domain is one controller plus any number of participant nodes grouped
//! into named zones. Every runtime joins a reliable group transport under an
//! encoded name (`domain:role:zone:sequence`), receives full membership views
//! and derives from them, without any extra election round:
//!
//! - who leads each zone (smallest sequence id wins)
//! - who joined and who left since the previous view
//! - whether the controller is reachable
//!
//! On top of that the crate provides one-way broadcasts, correlated
//! request/response calls with timeouts and remote faults, and a
//! synchronization protocol that brings a joining node or a new zone leader
//! up to date with the domain's deployment backlog.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use zonal::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = InMemoryNetwork::new();
//!
//!     let controller =
//!         DomainTopologyService::new(TopologyConfig::controller("acme"), network.transport())?;
//!     controller.init().await?;
//!
//!     let node = ZoneTopologyService::new(TopologyConfig::node("acme", "zone1"), network.transport())?;
//!     node.register_handler(
//!         "ping",
//!         handler_fn(|_cmd, _ctx| async { Ok(Bytes::from_static(b"pong")) }),
//!     );
//!     node.init().await?;
//!
//!     let reply = controller
//!         .send_synchronous_message(node.runtime_name(), &Command::new("ping", Bytes::new()), Some(Duration::from_secs(1)))
//!         .await?;
//!     assert_eq!(&reply[..], b"pong");
//!
//!     node.stop().await?;
//!     controller.stop().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//! - [`membership`]: identity codec, views and the differ, zone leader selection
//! - [`messaging`]: commands, the handler registry and the request correlator
//! - [`transport`]: the group transport boundary and an in-process implementation
//! - [`topology`]: the zone (node) and domain (controller) façades
//! - [`sync`]: deployment backlog and runtime synchronization

#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod membership;
pub mod messaging;
pub mod metrics;
pub mod sync;
pub mod telemetry;
pub mod topology;
pub mod transport;

pub mod prelude {
    //! Common imports for building on the topology services.
    pub use crate::config::TopologyConfig;
    pub use crate::error::{MemberFailure, TopologyError, TopologyResult};
    pub use crate::events::{BroadcastEventService, DomainEvent, EventService, NoopEventService};
    pub use crate::membership::{Endpoint, Member, MembershipView, NodeIdentity, NodeRole};
    pub use crate::messaging::{
        Command, CommandFault, CommandHandler, CommandRegistry, ExecutionContext, handler_fn,
    };
    pub use crate::sync::{DeploymentLog, SyncStatus};
    pub use crate::topology::{
        DomainTopologyService, LifecycleState, MemberReply, Topology, ZoneTopologyService,
    };
    pub use crate::transport::{GroupTransport, InMemoryNetwork, InMemoryTransport};

    pub use bytes::{self, Bytes};
}
