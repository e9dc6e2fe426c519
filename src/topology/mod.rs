//! Topology services.
//!
//! Two façades share one capability set, the [`Topology`] trait:
//!
//! | Service | Runs on | Adds |
//! |---------|---------|------|
//! | [`ZoneTopologyService`] | participant nodes | zone leadership, send to leader/controller, runtime synchronization |
//! | [`DomainTopologyService`] | the controller | domain-wide broadcast, deployments, zone leader tracking |
//!
//! Both compose a [`TopologyCore`] that owns the transport subscription,
//! the request correlator, the published view snapshot and the event fan-out.

pub mod domain;
pub mod lifecycle;
pub mod shared;
pub mod zone;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::TopologyResult;
use crate::events::DomainEvent;
use crate::membership::{Endpoint, MembershipView};
use crate::messaging::{Command, CommandHandler};

pub use domain::DomainTopologyService;
pub use lifecycle::LifecycleState;
pub use shared::{MemberReply, TopologyCore, ViewSnapshot};
pub use zone::ZoneTopologyService;

/// Capabilities shared by every topology service.
#[async_trait]
pub trait Topology: Send + Sync {
    /// Shared state backing the default methods.
    fn core(&self) -> &TopologyCore;

    /// Subscribe to the transport and join the group.
    async fn init(&self) -> TopologyResult<()>;

    /// Leave the group. Safe to call more than once.
    async fn stop(&self) -> TopologyResult<()>;

    /// Whether a controller is reachable from this runtime.
    fn is_controller_available(&self) -> bool;

    fn state(&self) -> LifecycleState {
        self.core().state()
    }

    /// Encoded name this runtime joined with.
    fn runtime_name(&self) -> &str {
        self.core().runtime_name()
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.core().local_endpoint()
    }

    /// Current membership view.
    fn view(&self) -> Arc<MembershipView> {
        Arc::clone(&self.core().snapshot().current)
    }

    fn subscribe_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.core().subscribe_events()
    }

    /// Register the handler executed for incoming commands of `command_type`.
    fn register_handler(&self, command_type: &str, handler: Arc<dyn CommandHandler>) {
        self.core().register_handler(command_type, handler);
    }

    /// One-way multicast to every member of `zone`.
    async fn broadcast_to_zone(&self, zone: &str, command: &Command) -> TopologyResult<()> {
        let targets = self.core().zone_targets(zone);
        self.core().multicast(&targets, command, "zone").await
    }

    /// Synchronous send to the runtime that joined as `runtime_name`.
    async fn send_to_runtime(
        &self,
        runtime_name: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Bytes> {
        self.core()
            .send_to_runtime(runtime_name, command, timeout)
            .await
    }

    /// Synchronous fan-out to every member of `zone`; fails if any member fails.
    async fn send_to_zone(
        &self,
        zone: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Vec<MemberReply>> {
        self.core().send_to_zone(zone, command, timeout).await
    }
}
