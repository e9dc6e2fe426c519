//! Participant-node façade.
//!
//! A [`ZoneTopologyService`] runs on every participant node. It tracks its
//! zone's leader, sends commands to the zone leader, to named runtimes, to a
//! whole zone or to the controller, and keeps the node's deployment state in
//! step with the domain through the [`RuntimeSynchronizer`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zonal::config::TopologyConfig;
//! use zonal::topology::{Topology, ZoneTopologyService};
//! use zonal::transport::InMemoryNetwork;
//!
//! # async fn run() -> zonal::error::TopologyResult<()> {
//! let network = InMemoryNetwork::new();
//! let node = ZoneTopologyService::new(TopologyConfig::node("acme", "zone1"), network.transport())?;
//! node.init().await?;
//! if node.is_zone_leader() {
//!     // coordinate the zone
//! }
//! node.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use super::Topology;
use super::shared::{MemberReply, TopologyCore, ViewChange, ViewObserver};
use crate::config::TopologyConfig;
use crate::constants::{DEPLOYMENT_COMMAND, RUNTIME_UPDATE_COMMAND};
use crate::error::{TopologyError, TopologyResult};
use crate::events::{DomainEvent, EventService};
use crate::membership::{NodeRole, leader_of};
use crate::messaging::Command;
use crate::metrics;
use crate::sync::{
    DeploymentHandler, DeploymentLog, RuntimeSynchronizer, RuntimeUpdateHandler, SyncStatus,
};
use crate::transport::GroupTransport;

struct ZoneInner {
    core: Arc<TopologyCore>,
    zone: String,
    log: Arc<DeploymentLog>,
    synchronizer: Arc<RuntimeSynchronizer>,
}

impl ViewObserver for ZoneInner {
    fn core(&self) -> &TopologyCore {
        &self.core
    }

    fn on_view_change(&self, change: ViewChange) {
        let snapshot = &change.snapshot;
        let is_leader = snapshot.is_zone_leader;
        metrics::set_zone_leader(is_leader);

        let leader = leader_of(&self.zone, &snapshot.current);
        let previous_leader = snapshot
            .previous
            .as_deref()
            .and_then(|view| leader_of(&self.zone, view));
        if let Some(leader) = leader
            && previous_leader.map(|p| p.endpoint()) != Some(leader.endpoint())
        {
            info!(
                zone = %self.zone,
                leader = %leader.name(),
                view_id = snapshot.current.view_id(),
                "New zone leader"
            );
            self.core.fire(DomainEvent::NewZoneLeader {
                zone: self.zone.clone(),
                leader: leader.name().to_string(),
            });
        }

        if change.first {
            self.synchronizer.trigger("joined");
        } else if is_leader && !change.was_zone_leader {
            self.synchronizer.trigger("became_leader");
        } else if self.synchronizer.needs_retry() {
            self.synchronizer.trigger("retry");
        }
    }
}

/// Topology service of a participant node.
pub struct ZoneTopologyService {
    inner: Arc<ZoneInner>,
}

impl ZoneTopologyService {
    /// Create a service for a node configuration.
    pub fn new(config: TopologyConfig, transport: Arc<dyn GroupTransport>) -> TopologyResult<Self> {
        Self::build(config, transport, None)
    }

    /// Create a service that also forwards every domain event to `events`.
    pub fn with_event_service(
        config: TopologyConfig,
        transport: Arc<dyn GroupTransport>,
        events: Arc<dyn EventService>,
    ) -> TopologyResult<Self> {
        Self::build(config, transport, Some(events))
    }

    fn build(
        config: TopologyConfig,
        transport: Arc<dyn GroupTransport>,
        events: Option<Arc<dyn EventService>>,
    ) -> TopologyResult<Self> {
        if config.role != NodeRole::Node {
            return Err(TopologyError::Config(
                "a zone topology service requires the node role".to_string(),
            ));
        }
        let core = Arc::new(TopologyCore::new(config, transport, events)?);
        let zone = core
            .identity()
            .zone()
            .map(str::to_string)
            .ok_or_else(|| TopologyError::Config("zone_name is required".to_string()))?;
        let log = Arc::new(DeploymentLog::new());
        core.register_handler(
            RUNTIME_UPDATE_COMMAND,
            Arc::new(RuntimeUpdateHandler::new(Arc::clone(&log))),
        );
        let synchronizer = Arc::new(RuntimeSynchronizer::new(
            Arc::clone(&core),
            Arc::clone(&log),
        ));
        core.register_handler(
            DEPLOYMENT_COMMAND,
            Arc::new(DeploymentHandler::new(&synchronizer)),
        );
        Ok(Self {
            inner: Arc::new(ZoneInner {
                core,
                zone,
                log,
                synchronizer,
            }),
        })
    }

    /// Zone this node belongs to.
    pub fn zone(&self) -> &str {
        &self.inner.zone
    }

    /// Returns true if this node leads its zone in the current view.
    pub fn is_zone_leader(&self) -> bool {
        self.inner.core.snapshot().is_zone_leader
    }

    /// Runtime name of this zone's leader, if the zone has members.
    pub fn zone_leader_name(&self) -> Option<String> {
        let snapshot = self.inner.core.snapshot();
        leader_of(&self.inner.zone, &snapshot.current).map(|m| m.name().to_string())
    }

    /// One-way multicast to `zone`, or to this node's zone when `None`.
    pub async fn broadcast(&self, zone: Option<&str>, command: &Command) -> TopologyResult<()> {
        let zone = zone.unwrap_or(self.inner.zone.as_str());
        let targets = self.inner.core.zone_targets(zone);
        self.inner.core.multicast(&targets, command, "zone").await
    }

    /// Synchronous send to this node's zone leader.
    pub async fn send_synchronous(
        &self,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Bytes> {
        let snapshot = self.inner.core.snapshot();
        let leader = leader_of(&self.inner.zone, &snapshot.current).ok_or_else(|| {
            TopologyError::ZoneLeaderUnavailable {
                zone: self.inner.zone.clone(),
            }
        })?;
        self.inner.core.send_to_member(leader, command, timeout).await
    }

    /// Synchronous send to the runtime that joined as `runtime_name`.
    pub async fn send_synchronous_to(
        &self,
        runtime_name: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Bytes> {
        self.inner
            .core
            .send_to_runtime(runtime_name, command, timeout)
            .await
    }

    /// Synchronous fan-out to every member of `zone`.
    ///
    /// Fails as a whole if any member fails; see [`TopologyError::AggregateSendFailure`].
    pub async fn send_synchronous_to_zone(
        &self,
        zone: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Vec<MemberReply>> {
        self.inner.core.send_to_zone(zone, command, timeout).await
    }

    /// Synchronous send to the domain controller.
    ///
    /// Fails immediately with [`TopologyError::ControllerUnavailable`] when
    /// the current view has no controller.
    pub async fn send_synchronous_to_controller(
        &self,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Bytes> {
        let controller = self
            .inner
            .core
            .controller()
            .ok_or(TopologyError::ControllerUnavailable)?;
        self.inner
            .core
            .send_to_member(&controller, command, timeout)
            .await
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.synchronizer.status()
    }

    pub fn is_synchronized(&self) -> bool {
        self.inner.synchronizer.is_synchronized()
    }

    /// Error message of the last unsuccessful synchronization.
    pub fn last_sync_error(&self) -> Option<String> {
        self.inner.synchronizer.last_error()
    }

    /// Run the synchronizer again, for example after fixing a failed command.
    pub fn resynchronize(&self) {
        self.inner.synchronizer.trigger("manual");
    }

    pub fn deployment_log(&self) -> &Arc<DeploymentLog> {
        &self.inner.log
    }
}

#[async_trait]
impl Topology for ZoneTopologyService {
    fn core(&self) -> &TopologyCore {
        &self.inner.core
    }

    async fn init(&self) -> TopologyResult<()> {
        let observer: Arc<dyn ViewObserver> = self.inner.clone();
        self.inner.core.start(observer).await
    }

    async fn stop(&self) -> TopologyResult<()> {
        self.inner.core.shutdown().await
    }

    fn is_controller_available(&self) -> bool {
        self.inner.core.controller().is_some()
    }
}
