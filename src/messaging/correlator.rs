//! Request/response correlation over the group transport.
//!
//! [`RequestCorrelator::send`] allocates a correlation id, registers a
//! pending request, unicasts the request envelope and awaits the reply.
//! [`RequestCorrelator::on_envelope_received`] is the delivery-side entry
//! point: responses complete pending requests, everything else is executed
//! through the [`CommandRegistry`] and answered when a reply is expected.
//! Callers that route envelopes themselves use
//! [`RequestCorrelator::decode_envelope`] and
//! [`RequestCorrelator::handle_envelope`] separately.
//!
//! # Pending Request Lifecycle
//!
//! ```text
//!                 response/fault            (removed, caller gets reply)
//!   PENDING ───────────────────────▶ COMPLETED
//!      │
//!      │ deadline elapsed
//!      └───────────────────────────▶ TIMED_OUT  (removed, caller gets Timeout)
//! ```
//!
//! Completion and timeout race; each side compare-and-sets the entry's state
//! and only the winner acts. A response that loses the race is counted as
//! late and discarded. Dropping the caller's future removes the entry too.
//!
//! The pending table is a sharded [`DashMap`], so unrelated requests never
//! contend on a single lock.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::envelope::{Command, CommandEnvelope, CorrelationId};
use super::registry::{CommandRegistry, ExecutionContext};
use crate::error::{TopologyError, TopologyResult};
use crate::membership::Endpoint;
use crate::metrics;
use crate::transport::GroupTransport;

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const TIMED_OUT: u8 = 2;

#[derive(Debug)]
enum Reply {
    Response(Bytes),
    Fault(Bytes),
}

struct PendingRequest {
    state: AtomicU8,
    reply: Mutex<Option<oneshot::Sender<Reply>>>,
}

impl PendingRequest {
    fn new(reply: oneshot::Sender<Reply>) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            reply: Mutex::new(Some(reply)),
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn take_sender(&self) -> Option<oneshot::Sender<Reply>> {
        self.reply.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

type PendingTable = DashMap<CorrelationId, Arc<PendingRequest>>;

fn remove_pending(table: &PendingTable, id: CorrelationId) {
    if table.remove(&id).is_some() {
        metrics::PENDING_REQUESTS.dec();
    }
}

/// Removes the pending entry when the awaiting future completes or is dropped.
struct PendingGuard {
    table: Arc<PendingTable>,
    id: CorrelationId,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        remove_pending(&self.table, self.id);
    }
}

/// Correlates synchronous requests with their replies and dispatches
/// incoming commands.
pub struct RequestCorrelator {
    transport: Arc<dyn GroupTransport>,
    registry: Arc<CommandRegistry>,
    next_id: AtomicU64,
    pending: Arc<PendingTable>,
}

impl RequestCorrelator {
    pub fn new(transport: Arc<dyn GroupTransport>, registry: Arc<CommandRegistry>) -> Self {
        Self {
            transport,
            registry,
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<CommandRegistry> {
        &self.registry
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn local_endpoint(&self) -> TopologyResult<Endpoint> {
        self.transport
            .local_endpoint()
            .ok_or(TopologyError::InvalidState {
                operation: "send",
                state: "not joined",
            })
    }

    /// Send `command` to `target` and wait up to `timeout` for the reply.
    ///
    /// Returns the handler's response bytes, [`TopologyError::DomainFault`]
    /// when the remote handler failed, or [`TopologyError::Timeout`].
    pub async fn send(
        &self,
        target: &Endpoint,
        command: &Command,
        timeout: Duration,
    ) -> TopologyResult<Bytes> {
        let started = Instant::now();
        let result = self.send_inner(target, command, timeout).await;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.as_metric_label(),
        };
        metrics::record_sync_send(outcome, started.elapsed().as_secs_f64());
        result
    }

    async fn send_inner(
        &self,
        target: &Endpoint,
        command: &Command,
        timeout: Duration,
    ) -> TopologyResult<Bytes> {
        let local = self.local_endpoint()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = CommandEnvelope::request(local, id, command.to_bytes()?).encode()?;

        let (tx, mut rx) = oneshot::channel();
        let entry = Arc::new(PendingRequest::new(tx));
        self.pending.insert(id, Arc::clone(&entry));
        metrics::PENDING_REQUESTS.inc();
        let _guard = PendingGuard {
            table: Arc::clone(&self.pending),
            id,
        };

        debug!(
            correlation_id = id,
            %target,
            command_type = %command.command_type,
            "Sending synchronous request"
        );
        self.transport.unicast(target, envelope).await?;

        let reply = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(TopologyError::Transport(format!(
                    "request {} abandoned without a reply",
                    id
                )));
            }
            Err(_) => {
                if entry.transition(TIMED_OUT) {
                    debug!(correlation_id = id, %target, "Synchronous request timed out");
                    return Err(TopologyError::Timeout {
                        target: target.clone(),
                        timeout,
                    });
                }
                // a reply won the race and is already on its way
                rx.await.map_err(|_| {
                    TopologyError::Transport(format!("request {} abandoned without a reply", id))
                })?
            }
        };

        match reply {
            Reply::Response(payload) => Ok(payload),
            Reply::Fault(fault) => Err(TopologyError::DomainFault {
                origin: target.clone(),
                fault,
            }),
        }
    }

    fn complete(&self, id: CorrelationId, reply: Reply) {
        let entry = self.pending.get(&id).map(|e| Arc::clone(e.value()));
        match entry {
            Some(entry) if entry.transition(COMPLETED) => {
                if let Some(sender) = entry.take_sender() {
                    let _ = sender.send(reply);
                }
                remove_pending(&self.pending, id);
            }
            _ => {
                debug!(correlation_id = id, "Discarding late response");
                metrics::record_late_response();
            }
        }
    }

    /// Handle an envelope delivered by the transport.
    ///
    /// Never fails: malformed envelopes and failed replies are logged and dropped.
    pub async fn on_envelope_received(&self, from: &Endpoint, payload: &[u8]) {
        if let Some(envelope) = Self::decode_envelope(from, payload) {
            self.handle_envelope(from, envelope).await;
        }
    }

    /// Decode a delivered envelope, logging and counting it when malformed.
    pub fn decode_envelope(from: &Endpoint, payload: &[u8]) -> Option<CommandEnvelope> {
        match CommandEnvelope::decode(payload) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                warn!(%from, error = %e, "Dropping undecodable envelope");
                metrics::record_dropped_envelope("decode");
                None
            }
        }
    }

    /// Complete a pending request, or execute a command and reply if asked.
    pub async fn handle_envelope(&self, from: &Endpoint, envelope: CommandEnvelope) {
        if envelope.is_response {
            let Some(id) = envelope.correlation_id else {
                warn!(%from, "Dropping response without correlation id");
                metrics::record_dropped_envelope("uncorrelated");
                return;
            };
            let reply = match envelope.fault {
                Some(fault) => Reply::Fault(fault),
                None => Reply::Response(envelope.payload),
            };
            self.complete(id, reply);
            return;
        }

        let command = match Command::from_bytes(&envelope.payload) {
            Ok(command) => command,
            Err(e) => {
                warn!(%from, error = %e, "Dropping envelope with undecodable command");
                metrics::record_dropped_envelope("decode");
                return;
            }
        };

        let Ok(local) = self.local_endpoint() else {
            debug!(%from, "Dropping command received while not joined");
            metrics::record_dropped_envelope("not_joined");
            return;
        };
        let ctx = ExecutionContext {
            origin: envelope.origin.clone(),
            local: local.clone(),
            expects_reply: !envelope.is_one_way(),
        };
        let command_type = command.command_type.clone();
        let result = self.registry.execute(command, &ctx).await;

        let Some(id) = envelope.correlation_id else {
            if let Err(fault) = result {
                warn!(
                    origin = %envelope.origin,
                    command_type = %command_type,
                    fault = %fault,
                    "One-way command failed"
                );
                metrics::record_dropped_envelope("one_way_fault");
            }
            return;
        };

        let reply = match result {
            Ok(payload) => CommandEnvelope::response(local, id, payload),
            Err(fault) => {
                debug!(
                    correlation_id = id,
                    command_type = %command_type,
                    fault = %fault,
                    "Replying with fault"
                );
                CommandEnvelope::fault(local, id, fault.to_bytes())
            }
        };
        let sent = match reply.encode() {
            Ok(bytes) => self.transport.unicast(&envelope.origin, bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(
                correlation_id = id,
                origin = %envelope.origin,
                error = %e,
                "Failed to send reply"
            );
        }
    }
}
