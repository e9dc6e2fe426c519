//! Controller-side façade.
//!
//! The [`DomainTopologyService`] runs on the domain controller. It broadcasts
//! to the whole domain or a single zone, sends synchronously to named runtimes
//! and zones, records deployments in the [`DeploymentLog`] that joining nodes
//! synchronize from, and reports every zone leader change.

use std::collections::BTreeMap;
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
use crate::membership::{NodeRole, leader_of, new_leaders_since};
use crate::messaging::Command;
use crate::sync::{Deployment, DeploymentLog, RuntimeUpdateHandler};
use crate::transport::GroupTransport;

struct DomainInner {
    core: Arc<TopologyCore>,
    log: Arc<DeploymentLog>,
}

impl ViewObserver for DomainInner {
    fn core(&self) -> &TopologyCore {
        &self.core
    }

    fn on_view_change(&self, change: ViewChange) {
        let snapshot = &change.snapshot;
        for (zone, leader) in new_leaders_since(snapshot.previous.as_deref(), &snapshot.current) {
            info!(
                zone = %zone,
                leader = %leader.name(),
                view_id = snapshot.current.view_id(),
                "New zone leader"
            );
            self.core.fire(DomainEvent::NewZoneLeader {
                zone,
                leader: leader.name().to_string(),
            });
        }
    }
}

/// Topology service of the domain controller.
pub struct DomainTopologyService {
    inner: Arc<DomainInner>,
}

impl DomainTopologyService {
    /// Create a service for a controller configuration.
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
        if config.role != NodeRole::Controller {
            return Err(TopologyError::Config(
                "a domain topology service requires the controller role".to_string(),
            ));
        }
        let core = Arc::new(TopologyCore::new(config, transport, events)?);
        let log = Arc::new(DeploymentLog::new());
        core.register_handler(
            RUNTIME_UPDATE_COMMAND,
            Arc::new(RuntimeUpdateHandler::new(Arc::clone(&log))),
        );
        Ok(Self {
            inner: Arc::new(DomainInner { core, log }),
        })
    }

    /// One-way multicast to every node in every zone.
    pub async fn broadcast_message(&self, command: &Command) -> TopologyResult<()> {
        let targets = self.inner.core.domain_targets();
        self.inner.core.multicast(&targets, command, "domain").await
    }

    /// One-way multicast to the nodes of one zone.
    pub async fn broadcast_message_to_zone(
        &self,
        zone: &str,
        command: &Command,
    ) -> TopologyResult<()> {
        let targets = self.inner.core.zone_targets(zone);
        self.inner.core.multicast(&targets, command, "zone").await
    }

    /// Synchronous send to the runtime that joined as `runtime_name`.
    pub async fn send_synchronous_message(
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

    /// Synchronous fan-out to every node of `zone`; fails if any node fails.
    pub async fn send_synchronous_message_to_zone(
        &self,
        zone: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Vec<MemberReply>> {
        self.inner.core.send_to_zone(zone, command, timeout).await
    }

    /// Record a deployment and broadcast it.
    ///
    /// The command is appended to the deployment log first and the broadcast
    /// carries its log position. A node applies it only at that position, so
    /// a node that also finds it in its backlog runs it once. With `zone` set
    /// only that zone receives the broadcast; nodes elsewhere pick the command
    /// up from the backlog on their next synchronization. Returns the new
    /// log marker.
    pub async fn deploy(&self, zone: Option<&str>, command: Command) -> TopologyResult<u64> {
        let marker = self.inner.log.append(command.clone());
        info!(
            command_type = %command.command_type,
            marker,
            zone = zone.unwrap_or("*"),
            "Deploying"
        );
        let stamped = Command::encode_body(
            DEPLOYMENT_COMMAND,
            &Deployment {
                position: marker - 1,
                command,
            },
        )?;
        match zone {
            Some(zone) => self.broadcast_message_to_zone(zone, &stamped).await?,
            None => self.broadcast_message(&stamped).await?,
        }
        Ok(marker)
    }

    pub fn deployment_log(&self) -> &Arc<DeploymentLog> {
        &self.inner.log
    }

    /// Zones with members in the current view.
    pub fn zones(&self) -> Vec<String> {
        self.inner.core.snapshot().current.zones()
    }

    /// Leader runtime name of every zone in the current view.
    pub fn zone_leaders(&self) -> BTreeMap<String, String> {
        let snapshot = self.inner.core.snapshot();
        snapshot
            .current
            .zones()
            .into_iter()
            .filter_map(|zone| {
                let leader = leader_of(&zone, &snapshot.current)?.name().to_string();
                Some((zone, leader))
            })
            .collect()
    }
}

#[async_trait]
impl Topology for DomainTopologyService {
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

    /// Always true: this runtime is the controller.
    fn is_controller_available(&self) -> bool {
        true
    }
}
