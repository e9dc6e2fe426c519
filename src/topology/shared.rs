//! State and plumbing shared by the zone and domain topology services.
//!
//! # Single Writer
//!
//! One delivery task per runtime consumes the transport's event stream.
//! View changes are handled inline on that task, so the current/previous view
//! pair and the zone-leadership flag have exactly one writer. The result is
//! published as an immutable [`ViewSnapshot`] through a `watch` channel;
//! façade operations read the latest snapshot and never lock.
//!
//! Requests and responses are each handled on their own task so a slow
//! command handler never delays view processing or other requests. One-way
//! commands run on a queue per sender, in the order the transport delivered
//! them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::lifecycle::{Lifecycle, LifecycleState};
use crate::config::TopologyConfig;
use crate::error::{MemberFailure, TopologyError, TopologyResult};
use crate::events::{BroadcastEventService, DomainEvent, EventService};
use crate::membership::{
    Endpoint, Member, MembershipView, NodeIdentity, ViewDiff, controller_of, diff, is_leader,
};
use crate::messaging::{Command, CommandEnvelope, CommandHandler, RequestCorrelator};
use crate::metrics;
use crate::transport::{GroupTransport, TransportEvent};

/// Immutable view state published after every view change.
#[derive(Debug, Clone)]
pub struct ViewSnapshot {
    pub current: Arc<MembershipView>,
    /// Absent until the second view.
    pub previous: Option<Arc<MembershipView>>,
    /// This runtime's endpoint, once known.
    pub local: Option<Endpoint>,
    /// True if this runtime leads its zone in `current`.
    pub is_zone_leader: bool,
}

impl ViewSnapshot {
    fn empty() -> Self {
        Self {
            current: Arc::new(MembershipView::empty()),
            previous: None,
            local: None,
            is_zone_leader: false,
        }
    }

    fn is_local(&self, endpoint: &Endpoint) -> bool {
        self.local.as_ref() == Some(endpoint)
    }
}

/// Outcome of installing a view, handed to the service-specific observer.
#[derive(Debug)]
pub(crate) struct ViewChange {
    pub snapshot: Arc<ViewSnapshot>,
    pub diff: ViewDiff,
    /// This is the first view since `init`.
    pub first: bool,
    pub was_zone_leader: bool,
}

/// Service-specific reaction to view changes.
///
/// Runs on the delivery task and must not await remote replies.
pub(crate) trait ViewObserver: Send + Sync + 'static {
    fn core(&self) -> &TopologyCore;
    fn on_view_change(&self, change: ViewChange);
}

/// A successful reply from one member of a zone fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberReply {
    pub runtime_name: String,
    pub payload: Bytes,
}

/// Shared runtime state: identity, transport, correlator, views and events.
pub struct TopologyCore {
    config: TopologyConfig,
    identity: NodeIdentity,
    runtime_name: String,
    transport: Arc<dyn GroupTransport>,
    correlator: Arc<RequestCorrelator>,
    events: BroadcastEventService,
    listener: Option<Arc<dyn EventService>>,
    lifecycle: Lifecycle,
    views: watch::Sender<Arc<ViewSnapshot>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl TopologyCore {
    pub(crate) fn new(
        config: TopologyConfig,
        transport: Arc<dyn GroupTransport>,
        listener: Option<Arc<dyn EventService>>,
    ) -> TopologyResult<Self> {
        config
            .validate()
            .map_err(|errors| TopologyError::Config(errors.join("; ")))?;
        let identity = config.identity();
        let runtime_name = identity.encode();
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&transport),
            Arc::default(),
        ));
        let (views, _) = watch::channel(Arc::new(ViewSnapshot::empty()));
        Ok(Self {
            events: BroadcastEventService::new(config.event_capacity),
            config,
            identity,
            runtime_name,
            transport,
            correlator,
            listener,
            lifecycle: Lifecycle::new(),
            views,
            delivery: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Encoded name this runtime joined with.
    pub fn runtime_name(&self) -> &str {
        &self.runtime_name
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub fn local_endpoint(&self) -> Option<Endpoint> {
        self.transport.local_endpoint()
    }

    /// Latest published view state.
    pub fn snapshot(&self) -> Arc<ViewSnapshot> {
        Arc::clone(&self.views.borrow())
    }

    /// Wait until the published view state satisfies `predicate`.
    pub async fn wait_for_view<F>(&self, mut predicate: F) -> Arc<ViewSnapshot>
    where
        F: FnMut(&ViewSnapshot) -> bool,
    {
        let mut rx = self.views.subscribe();
        match rx.wait_for(|s| predicate(s.as_ref())).await {
            Ok(snapshot) => Arc::clone(&snapshot),
            Err(_) => self.snapshot(),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    pub(crate) fn fire(&self, event: DomainEvent) {
        if let Some(listener) = &self.listener {
            listener.fire(event.clone());
        }
        self.events.fire(event);
    }

    pub fn register_handler(&self, command_type: &str, handler: Arc<dyn CommandHandler>) {
        self.correlator.registry().register(command_type, handler);
    }

    pub fn controller(&self) -> Option<Member> {
        controller_of(&self.identity.domain, &self.snapshot().current).cloned()
    }

    pub(crate) fn timeout_or_default(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.config.default_timeout)
    }

    fn ensure_running(&self, operation: &'static str) -> TopologyResult<()> {
        if self.lifecycle.is_running() {
            Ok(())
        } else {
            Err(TopologyError::InvalidState {
                operation,
                state: self.lifecycle.get().as_str(),
            })
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Subscribe, spawn the delivery task and join the group.
    pub(crate) async fn start(&self, observer: Arc<dyn ViewObserver>) -> TopologyResult<()> {
        if !self
            .lifecycle
            .transition(LifecycleState::Uninitialized, LifecycleState::Joining)
        {
            return Err(TopologyError::InvalidState {
                operation: "init",
                state: self.lifecycle.get().as_str(),
            });
        }

        let rx = match self.transport.subscribe() {
            Ok(rx) => rx,
            Err(e) => {
                self.abort_start();
                return Err(e);
            }
        };
        let handle = tokio::spawn(run_delivery(observer, rx));
        *self.delivery.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        match self.transport.join(&self.runtime_name).await {
            Ok(endpoint) => {
                info!(
                    runtime = %self.runtime_name,
                    %endpoint,
                    "Joined group"
                );
                Ok(())
            }
            Err(e) => {
                warn!(runtime = %self.runtime_name, error = %e, "Failed to join group");
                self.abort_start();
                Err(e)
            }
        }
    }

    fn abort_start(&self) {
        if let Some(handle) = self.delivery.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        if self.lifecycle.begin_leave().is_some() {
            self.lifecycle
                .transition(LifecycleState::Leaving, LifecycleState::Stopped);
        }
    }

    /// Leave the group and stop the delivery task. Idempotent.
    pub(crate) async fn shutdown(&self) -> TopologyResult<()> {
        let Some(left) = self.lifecycle.begin_leave() else {
            debug!(runtime = %self.runtime_name, state = %self.state(), "Stop ignored");
            return Ok(());
        };
        info!(runtime = %self.runtime_name, from = %left, "Leaving domain");

        let result = self.transport.leave().await;
        if let Some(handle) = self.delivery.lock().unwrap_or_else(|e| e.into_inner()).take() {
            handle.abort();
        }
        self.lifecycle
            .transition(LifecycleState::Leaving, LifecycleState::Stopped);
        if self.identity.zone().is_some() {
            metrics::set_zone_leader(false);
        }
        self.fire(DomainEvent::RuntimeStop {
            runtime: self.runtime_name.clone(),
        });
        result
    }

    // =========================================================================
    // View Processing
    // =========================================================================

    fn install_view(&self, view: Arc<MembershipView>) -> ViewChange {
        let prior = self.snapshot();
        let first = self
            .lifecycle
            .transition(LifecycleState::Joining, LifecycleState::Joined);
        let previous = if first {
            None
        } else {
            Some(Arc::clone(&prior.current))
        };

        let local = self.transport.local_endpoint().or_else(|| {
            view.member_by_name(&self.runtime_name)
                .map(|m| m.endpoint().clone())
        });
        let is_zone_leader = match (self.identity.zone(), &local) {
            (Some(zone), Some(endpoint)) => is_leader(zone, &view, endpoint),
            _ => false,
        };
        let diff = diff(previous.as_deref(), &view);

        let controllers = view.members().iter().filter(|m| m.is_controller()).count();
        metrics::record_view(controllers, view.node_members().count());
        info!(
            runtime = %self.runtime_name,
            view_id = view.view_id(),
            members = view.len(),
            joined = diff.joined.len(),
            departed = diff.departed.len(),
            "Installed membership view"
        );

        let snapshot = Arc::new(ViewSnapshot {
            current: Arc::clone(&view),
            previous,
            local,
            is_zone_leader,
        });
        self.views.send_replace(Arc::clone(&snapshot));

        if first {
            self.fire(DomainEvent::JoinedDomain {
                runtime: self.runtime_name.clone(),
                view_id: view.view_id(),
            });
        }
        for member in diff.joined.iter().filter(|m| !snapshot.is_local(m.endpoint())) {
            self.fire(DomainEvent::NodeJoined {
                name: member.name().to_string(),
                endpoint: member.endpoint().clone(),
            });
        }
        for member in &diff.departed {
            self.fire(DomainEvent::NodeDeparted {
                name: member.name().to_string(),
                endpoint: member.endpoint().clone(),
            });
        }

        ViewChange {
            snapshot,
            diff,
            first,
            was_zone_leader: prior.is_zone_leader,
        }
    }

    // =========================================================================
    // Messaging
    // =========================================================================

    /// Synchronous send to one member.
    pub(crate) async fn send_to_member(
        &self,
        member: &Member,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Bytes> {
        self.ensure_running("send")?;
        self.correlator
            .send(member.endpoint(), command, self.timeout_or_default(timeout))
            .await
    }

    /// Synchronous send to the member that joined as `runtime_name`.
    pub(crate) async fn send_to_runtime(
        &self,
        runtime_name: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Bytes> {
        let snapshot = self.snapshot();
        let member = snapshot
            .current
            .member_by_name(runtime_name)
            .ok_or_else(|| TopologyError::RuntimeNotFound(runtime_name.to_string()))?;
        self.send_to_member(member, command, timeout).await
    }

    /// Synchronous fan-out to every member of `zone`.
    ///
    /// All members are contacted concurrently. Any single failure fails the
    /// whole call with [`TopologyError::AggregateSendFailure`]. The sender is
    /// skipped unless local delivery is enabled.
    pub(crate) async fn send_to_zone(
        &self,
        zone: &str,
        command: &Command,
        timeout: Option<Duration>,
    ) -> TopologyResult<Vec<MemberReply>> {
        self.ensure_running("send")?;
        let snapshot = self.snapshot();
        let targets: Vec<&Member> = snapshot
            .current
            .zone_members(zone)
            .filter(|m| self.config.local_delivery || !snapshot.is_local(m.endpoint()))
            .collect();
        let timeout = self.timeout_or_default(timeout);
        debug!(
            zone,
            targets = targets.len(),
            command_type = %command.command_type,
            "Zone fan-out"
        );

        let results = join_all(
            targets
                .iter()
                .map(|m| self.correlator.send(m.endpoint(), command, timeout)),
        )
        .await;

        let mut replies = Vec::with_capacity(targets.len());
        let mut failures = Vec::new();
        for (member, result) in targets.iter().zip(results) {
            match result {
                Ok(payload) => replies.push(MemberReply {
                    runtime_name: member.name().to_string(),
                    payload,
                }),
                Err(error) => failures.push(MemberFailure {
                    runtime_name: member.name().to_string(),
                    error,
                }),
            }
        }

        if failures.is_empty() {
            Ok(replies)
        } else {
            Err(TopologyError::AggregateSendFailure {
                zone: zone.to_string(),
                succeeded: replies.len(),
                failures,
            })
        }
    }

    /// One-way multicast of `command` to `targets`.
    pub(crate) async fn multicast(
        &self,
        targets: &[Endpoint],
        command: &Command,
        scope: &'static str,
    ) -> TopologyResult<()> {
        self.ensure_running("broadcast")?;
        let local = self
            .local_endpoint()
            .ok_or(TopologyError::InvalidState {
                operation: "broadcast",
                state: "not joined",
            })?;
        metrics::record_broadcast(scope);
        if targets.is_empty() {
            debug!(scope, command_type = %command.command_type, "Broadcast has no targets");
            return Ok(());
        }
        let envelope = CommandEnvelope::one_way(local, command.to_bytes()?).encode()?;
        debug!(
            scope,
            targets = targets.len(),
            command_type = %command.command_type,
            "Broadcasting"
        );
        self.transport.multicast(targets, envelope).await
    }

    /// Endpoints of `zone`'s members, minus this runtime unless local delivery is on.
    pub(crate) fn zone_targets(&self, zone: &str) -> Vec<Endpoint> {
        let snapshot = self.snapshot();
        snapshot
            .current
            .zone_members(zone)
            .map(Member::endpoint)
            .filter(|e| self.config.local_delivery || !snapshot.is_local(e))
            .cloned()
            .collect()
    }

    /// Endpoints of every participant node in the domain.
    pub(crate) fn domain_targets(&self) -> Vec<Endpoint> {
        let snapshot = self.snapshot();
        snapshot
            .current
            .node_members()
            .map(Member::endpoint)
            .filter(|e| self.config.local_delivery || !snapshot.is_local(e))
            .cloned()
            .collect()
    }
}

/// Per-sender queues that run one-way commands in arrival order.
#[derive(Default)]
struct OneWayLanes {
    lanes: HashMap<Endpoint, mpsc::UnboundedSender<CommandEnvelope>>,
}

impl OneWayLanes {
    fn push(
        &mut self,
        correlator: &Arc<RequestCorrelator>,
        from: Endpoint,
        envelope: CommandEnvelope,
    ) {
        let lane = self
            .lanes
            .entry(from.clone())
            .or_insert_with(|| spawn_lane(Arc::clone(correlator), from.clone()));
        if lane.send(envelope).is_err() {
            warn!(%from, "One-way lane closed, dropping command");
            metrics::record_dropped_envelope("lane_closed");
            self.lanes.remove(&from);
        }
    }

    /// Drop the lane of a departed sender. Queued commands still run.
    fn close(&mut self, from: &Endpoint) {
        self.lanes.remove(from);
    }
}

fn spawn_lane(
    correlator: Arc<RequestCorrelator>,
    from: Endpoint,
) -> mpsc::UnboundedSender<CommandEnvelope> {
    let (tx, mut rx) = mpsc::unbounded_channel::<CommandEnvelope>();
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            correlator.handle_envelope(&from, envelope).await;
        }
    });
    tx
}

/// Drain the transport's event stream until it closes or the task is aborted.
async fn run_delivery(
    observer: Arc<dyn ViewObserver>,
    mut rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    let mut lanes = OneWayLanes::default();
    while let Some(event) = rx.recv().await {
        match event {
            TransportEvent::ViewChanged(view) => {
                let change = observer.core().install_view(view);
                for member in &change.diff.departed {
                    lanes.close(member.endpoint());
                }
                observer.on_view_change(change);
            }
            TransportEvent::Message { from, payload } => {
                let Some(envelope) = RequestCorrelator::decode_envelope(&from, &payload) else {
                    continue;
                };
                let correlator = observer.core().correlator();
                if envelope.is_one_way() && !envelope.is_response {
                    lanes.push(correlator, from, envelope);
                } else {
                    let correlator = Arc::clone(correlator);
                    tokio::spawn(async move {
                        correlator.handle_envelope(&from, envelope).await;
                    });
                }
            }
        }
    }
    debug!(
        runtime = %observer.core().runtime_name(),
        "Transport event stream closed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{CommandRegistry, handler_fn};
    use crate::transport::InMemoryNetwork;

    #[tokio::test]
    async fn test_one_way_lane_keeps_sender_order() {
        let network = InMemoryNetwork::new();
        let transport: Arc<dyn GroupTransport> = network.transport();
        transport.join("a").await.unwrap();
        let registry = Arc::new(CommandRegistry::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        registry.register(
            "step",
            handler_fn(move |cmd: Command, _| {
                let seen = Arc::clone(&seen);
                async move {
                    if &cmd.body[..] == b"1" {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                    seen.lock().unwrap().push(cmd.body);
                    Ok(Bytes::new())
                }
            }),
        );
        let correlator = Arc::new(RequestCorrelator::new(transport, registry));

        let from = Endpoint::new("mem-9");
        let mut lanes = OneWayLanes::default();
        for body in ["1", "2"] {
            let command = Command::new("step", Bytes::from_static(body.as_bytes()));
            let envelope = CommandEnvelope::one_way(from.clone(), command.to_bytes().unwrap());
            lanes.push(&correlator, from.clone(), envelope);
        }
        assert_eq!(lanes.lanes.len(), 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while order.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*order.lock().unwrap(), vec![Bytes::from("1"), Bytes::from("2")]);

        lanes.close(&from);
        assert!(lanes.lanes.is_empty());
    }
}
