//! Domain notifications.
//!
//! The topology services report lifecycle and membership changes through an
//! [`EventService`]. Firing is fire-and-forget: a slow or absent subscriber
//! never blocks view processing.

use tokio::sync::broadcast;
use tracing::trace;

use crate::membership::Endpoint;

/// A notification raised by a topology service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// The local runtime received its first view.
    JoinedDomain { runtime: String, view_id: u64 },
    /// The local runtime left the domain.
    RuntimeStop { runtime: String },
    /// A member appeared in the view.
    NodeJoined { name: String, endpoint: Endpoint },
    /// A member disappeared from the view.
    NodeDeparted { name: String, endpoint: Endpoint },
    /// `zone` has a different leader than in the previous view.
    NewZoneLeader { zone: String, leader: String },
    /// Backlog replay finished.
    RuntimeSynchronized { commands: usize },
    /// Backlog replay could not run or stopped partway.
    RuntimeSyncFailed { reason: String },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::JoinedDomain { .. } => "joined_domain",
            DomainEvent::RuntimeStop { .. } => "runtime_stop",
            DomainEvent::NodeJoined { .. } => "node_joined",
            DomainEvent::NodeDeparted { .. } => "node_departed",
            DomainEvent::NewZoneLeader { .. } => "new_zone_leader",
            DomainEvent::RuntimeSynchronized { .. } => "runtime_synchronized",
            DomainEvent::RuntimeSyncFailed { .. } => "runtime_sync_failed",
        }
    }
}

/// Receives domain notifications.
pub trait EventService: Send + Sync {
    fn fire(&self, event: DomainEvent);
}

/// Fans events out to any number of subscribers over a broadcast channel.
///
/// Subscribers that fall more than `capacity` events behind observe a
/// `Lagged` error and skip ahead.
#[derive(Clone)]
pub struct BroadcastEventService {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventService {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl EventService for BroadcastEventService {
    fn fire(&self, event: DomainEvent) {
        trace!(event_type = event.event_type(), "Firing domain event");
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventService;

impl EventService for NoopEventService {
    fn fire(&self, _event: DomainEvent) {}
}
