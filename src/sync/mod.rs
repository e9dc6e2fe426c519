//! Runtime synchronization.
//!
//! A node runs the synchronizer when it joins the domain and when it becomes
//! leader of its zone. One run:
//!
//! 1. picks a source: the controller if present, else the zone leader
//!    (never this node), else fails with `SyncUnavailable`
//! 2. sends a `runtime-update` request carrying its log marker
//! 3. replays the returned commands in order through the local registry,
//!    appending each applied command to the local [`DeploymentLog`]
//! 4. stops at the first failing command with `SyncFailed`; applied commands
//!    stay applied
//!
//! Live deployments from the controller carry their log position and go
//! through [`RuntimeSynchronizer::apply_deployment`]. Replay and live
//! application share one gate, and both only apply a command whose position
//! equals the local marker. A command already held is skipped, so nothing is
//! applied twice. A live deployment past the marker triggers a run that
//! fetches the missing commands.
//!
//! A trigger that arrives while a run is in progress is queued and runs
//! once the current run finishes. An unavailable source or a retryable
//! transport error leaves the node in [`SyncStatus::Unavailable`], and the
//! next view change retries.

pub mod handler;
pub mod log;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::constants::RUNTIME_UPDATE_COMMAND;
use crate::error::{TopologyError, TopologyResult};
use crate::events::DomainEvent;
use crate::membership::{Endpoint, Member, controller_of, leader_of};
use crate::messaging::{Command, CommandFault, CommandRegistry, ExecutionContext};
use crate::metrics;
use crate::topology::shared::{TopologyCore, ViewSnapshot};

pub use handler::{
    Deployment, DeploymentHandler, RuntimeUpdateHandler, RuntimeUpdateRequest,
    RuntimeUpdateResponse,
};
pub use log::DeploymentLog;

/// Synchronization state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SyncStatus {
    /// Never ran.
    Idle = 0,
    Running = 1,
    /// Last run replayed the whole backlog.
    Synchronized = 2,
    /// No source was reachable. Retried on the next view change.
    Unavailable = 3,
    /// Last run stopped partway or the source answered with a fault.
    Failed = 4,
}

impl SyncStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SyncStatus::Idle,
            1 => SyncStatus::Running,
            2 => SyncStatus::Synchronized,
            3 => SyncStatus::Unavailable,
            _ => SyncStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Running => "running",
            SyncStatus::Synchronized => "synchronized",
            SyncStatus::Unavailable => "unavailable",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replay `commands`, the first of which sits at log position `start`.
///
/// Commands at positions `log` already holds are skipped. Each applied
/// command is appended to `log`. Returns the number of commands applied, or
/// [`TopologyError::SyncFailed`] for the first command whose handler fails.
/// Later commands are not run.
pub async fn replay_commands(
    registry: &CommandRegistry,
    log: &DeploymentLog,
    ctx: &ExecutionContext,
    start: u64,
    commands: Vec<Command>,
) -> TopologyResult<usize> {
    let total = commands.len();
    let mut applied = 0;
    for (index, command) in commands.into_iter().enumerate() {
        let position = start + index as u64;
        let marker = log.marker();
        if position < marker {
            debug!(position, marker, "Skipping command already in the log");
            continue;
        }
        let command_type = command.command_type.clone();
        if position > marker {
            return Err(TopologyError::SyncFailed {
                failed_index: index,
                command_type,
                applied,
                reason: format!("backlog gap: log ends at {}, command at {}", marker, position),
            });
        }
        match registry.execute(command.clone(), ctx).await {
            Ok(_) => {
                log.append(command);
                applied += 1;
            }
            Err(fault) => {
                warn!(
                    index,
                    total,
                    command_type = %command_type,
                    fault = %fault,
                    "Replay stopped at failing command"
                );
                return Err(TopologyError::SyncFailed {
                    failed_index: index,
                    command_type,
                    applied,
                    reason: fault.to_string(),
                });
            }
        }
    }
    Ok(applied)
}

/// Pulls and replays the deployment backlog for a participant node.
pub struct RuntimeSynchronizer {
    core: Arc<TopologyCore>,
    log: Arc<DeploymentLog>,
    /// Held while commands are applied to `log`.
    apply_gate: AsyncMutex<()>,
    running: AtomicBool,
    queued: AtomicBool,
    status: AtomicU8,
    last_error: Mutex<Option<String>>,
}

impl RuntimeSynchronizer {
    pub(crate) fn new(core: Arc<TopologyCore>, log: Arc<DeploymentLog>) -> Self {
        Self {
            core,
            log,
            apply_gate: AsyncMutex::new(()),
            running: AtomicBool::new(false),
            queued: AtomicBool::new(false),
            status: AtomicU8::new(SyncStatus::Idle as u8),
            last_error: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn is_synchronized(&self) -> bool {
        self.status() == SyncStatus::Synchronized
    }

    /// True if the last run found no source and should run again.
    pub fn needs_retry(&self) -> bool {
        self.status() == SyncStatus::Unavailable
    }

    /// Error message of the last unsuccessful run.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.store(status as u8, Ordering::SeqCst);
    }

    fn set_last_error(&self, reason: Option<String>) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = reason;
    }

    /// Request a run. Queued if one is already in progress.
    pub fn trigger(self: &Arc<Self>, reason: &'static str) {
        self.queued.store(true, Ordering::SeqCst);
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(
                runtime = %self.core.runtime_name(),
                reason,
                "Synchronization already running, queued"
            );
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.drain(reason).await });
    }

    async fn drain(&self, reason: &'static str) {
        loop {
            self.queued.store(false, Ordering::SeqCst);
            let result = self.run_once(reason).await;
            self.record_outcome(result);
            self.running.store(false, Ordering::SeqCst);

            // a trigger that lost the race for `running` left `queued` set
            if !self.queued.load(Ordering::SeqCst)
                || self
                    .running
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
            {
                break;
            }
        }
    }

    fn resolve_source(&self, snapshot: &ViewSnapshot) -> TopologyResult<Member> {
        let identity = self.core.identity();
        if let Some(controller) = controller_of(&identity.domain, &snapshot.current) {
            return Ok(controller.clone());
        }
        let leader = identity
            .zone()
            .and_then(|zone| leader_of(zone, &snapshot.current));
        match leader {
            Some(leader) if snapshot.local.as_ref() != Some(leader.endpoint()) => {
                Ok(leader.clone())
            }
            _ => Err(TopologyError::SyncUnavailable),
        }
    }

    async fn run_once(&self, reason: &'static str) -> TopologyResult<usize> {
        self.set_status(SyncStatus::Running);
        let snapshot = self.core.snapshot();
        let source = self.resolve_source(&snapshot)?;
        let local = snapshot
            .local
            .clone()
            .or_else(|| self.core.local_endpoint())
            .ok_or(TopologyError::InvalidState {
                operation: "synchronize",
                state: "not joined",
            })?;

        let marker = self.log.marker();
        info!(
            runtime = %self.core.runtime_name(),
            source = %source,
            marker,
            reason,
            "Synchronizing runtime"
        );
        let request = Command::encode_body(
            RUNTIME_UPDATE_COMMAND,
            &RuntimeUpdateRequest {
                runtime_name: self.core.runtime_name().to_string(),
                marker,
            },
        )?;
        let reply = self
            .core
            .correlator()
            .send(
                source.endpoint(),
                &request,
                self.core.config().runtime_sync_timeout,
            )
            .await?;
        let response: RuntimeUpdateResponse = bincode::deserialize(&reply)
            .map_err(|e| TopologyError::Decode(format!("invalid runtime update: {}", e)))?;

        debug!(
            commands = response.commands.len(),
            to_marker = response.marker,
            "Replaying runtime update"
        );
        let ctx = replay_context(source.endpoint(), local);
        let _gate = self.apply_gate.lock().await;
        replay_commands(
            self.core.correlator().registry(),
            &self.log,
            &ctx,
            response.start,
            response.commands,
        )
        .await
    }

    /// Apply a live deployment if it lands exactly at the local marker.
    ///
    /// A position already held is skipped. A position past the marker means
    /// earlier deployments were missed; the command is left to the backlog
    /// and a run is triggered.
    pub(crate) async fn apply_deployment(
        self: &Arc<Self>,
        deployment: Deployment,
        ctx: &ExecutionContext,
    ) -> Result<Bytes, CommandFault> {
        let _gate = self.apply_gate.lock().await;
        let marker = self.log.marker();
        let position = deployment.position;
        if position < marker {
            debug!(position, marker, "Deployment already applied");
            return Ok(Bytes::new());
        }
        if position > marker {
            info!(
                runtime = %self.core.runtime_name(),
                position,
                marker,
                "Missed deployments, synchronizing"
            );
            self.trigger("deployment_gap");
            return Ok(Bytes::new());
        }

        let command_type = deployment.command.command_type.clone();
        let registry = self.core.correlator().registry();
        match registry.execute(deployment.command.clone(), ctx).await {
            Ok(reply) => {
                self.log.append(deployment.command);
                Ok(reply)
            }
            Err(fault) => {
                let reason = format!(
                    "deployment at {} ({}) failed: {}",
                    position, command_type, fault
                );
                warn!(runtime = %self.core.runtime_name(), reason = %reason, "Live deployment failed");
                self.set_status(SyncStatus::Failed);
                self.set_last_error(Some(reason));
                metrics::record_runtime_sync(SyncStatus::Failed.as_str());
                Err(fault)
            }
        }
    }

    fn record_outcome(&self, result: TopologyResult<usize>) {
        let runtime = self.core.runtime_name();
        match result {
            Ok(commands) => {
                info!(runtime = %runtime, commands, "Runtime synchronized");
                self.set_status(SyncStatus::Synchronized);
                self.set_last_error(None);
                metrics::record_runtime_sync("synchronized");
                self.core
                    .fire(DomainEvent::RuntimeSynchronized { commands });
            }
            Err(e) => {
                let status = if e.is_retryable() {
                    SyncStatus::Unavailable
                } else {
                    SyncStatus::Failed
                };
                warn!(
                    runtime = %runtime,
                    status = %status,
                    error = %e,
                    "Runtime synchronization did not complete"
                );
                self.set_status(status);
                let reason = e.to_string();
                self.set_last_error(Some(reason.clone()));
                metrics::record_runtime_sync(status.as_str());
                self.core.fire(DomainEvent::RuntimeSyncFailed { reason });
            }
        }
    }
}

fn replay_context(source: &Endpoint, local: Endpoint) -> ExecutionContext {
    ExecutionContext {
        origin: source.clone(),
        local,
        expects_reply: false,
    }
}
