//! Serving side of the runtime-update exchange, and the receiving side of
//! live deployments.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::RuntimeSynchronizer;
use super::log::DeploymentLog;
use crate::messaging::{Command, CommandFault, CommandHandler, ExecutionContext};

/// Body of a `runtime-update` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeUpdateRequest {
    /// Encoded name of the requesting runtime.
    pub runtime_name: String,
    /// Requester's deployment log marker.
    pub marker: u64,
}

/// Reply to a `runtime-update` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeUpdateResponse {
    /// Log position of the first command.
    pub start: u64,
    /// Commands the requester is missing, in order.
    pub commands: Vec<Command>,
    /// Marker the requester reaches after applying every command.
    pub marker: u64,
}

/// Answers `runtime-update` requests from a [`DeploymentLog`].
///
/// Registered on the controller and on every node, so a zone leader can
/// serve its peers when the controller is gone.
pub struct RuntimeUpdateHandler {
    log: Arc<DeploymentLog>,
}

impl RuntimeUpdateHandler {
    pub fn new(log: Arc<DeploymentLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl CommandHandler for RuntimeUpdateHandler {
    async fn execute(
        &self,
        command: Command,
        ctx: &ExecutionContext,
    ) -> Result<Bytes, CommandFault> {
        let request: RuntimeUpdateRequest = command
            .decode_body()
            .map_err(|e| CommandFault::new(e.to_string()))?;
        let (commands, marker) = self.log.delta(request.marker);
        debug!(
            requester = %request.runtime_name,
            origin = %ctx.origin,
            from_marker = request.marker,
            to_marker = marker,
            commands = commands.len(),
            "Serving runtime update"
        );
        let response = RuntimeUpdateResponse {
            start: marker - commands.len() as u64,
            commands,
            marker,
        };
        bincode::serialize(&response)
            .map(Bytes::from)
            .map_err(|e| CommandFault::new(format!("failed to encode runtime update: {}", e)))
    }
}

/// Body of a `deployment` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Position of `command` in the controller's deployment log.
    pub position: u64,
    pub command: Command,
}

/// Applies live deployments on a participant node.
///
/// Holds the synchronizer weakly; the registry this handler lives in is owned
/// by the synchronizer's core.
pub struct DeploymentHandler {
    synchronizer: Weak<RuntimeSynchronizer>,
}

impl DeploymentHandler {
    pub fn new(synchronizer: &Arc<RuntimeSynchronizer>) -> Self {
        Self {
            synchronizer: Arc::downgrade(synchronizer),
        }
    }
}

#[async_trait]
impl CommandHandler for DeploymentHandler {
    async fn execute(
        &self,
        command: Command,
        ctx: &ExecutionContext,
    ) -> Result<Bytes, CommandFault> {
        let deployment: Deployment = command
            .decode_body()
            .map_err(|e| CommandFault::new(e.to_string()))?;
        let synchronizer = self
            .synchronizer
            .upgrade()
            .ok_or_else(|| CommandFault::new("runtime is shutting down"))?;
        synchronizer.apply_deployment(deployment, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::RUNTIME_UPDATE_COMMAND;
    use crate::membership::Endpoint;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            origin: Endpoint::new("mem-2"),
            local: Endpoint::new("mem-1"),
            expects_reply: true,
        }
    }

    #[tokio::test]
    async fn test_serves_delta_after_marker() {
        let log = Arc::new(DeploymentLog::new());
        log.append(Command::new("deploy", Bytes::from_static(b"a")));
        log.append(Command::new("deploy", Bytes::from_static(b"b")));
        let handler = RuntimeUpdateHandler::new(Arc::clone(&log));

        let request = Command::encode_body(
            RUNTIME_UPDATE_COMMAND,
            &RuntimeUpdateRequest {
                runtime_name: "acme:node:z:1".to_string(),
                marker: 1,
            },
        )
        .unwrap();
        let bytes = handler.execute(request, &ctx()).await.unwrap();
        let response: RuntimeUpdateResponse = bincode::deserialize(&bytes).unwrap();
        assert_eq!(response.marker, 2);
        assert_eq!(response.start, 1);
        assert_eq!(response.commands.len(), 1);
        assert_eq!(&response.commands[0].body[..], b"b");
    }

    #[tokio::test]
    async fn test_malformed_request_is_fault() {
        let handler = RuntimeUpdateHandler::new(Arc::new(DeploymentLog::new()));
        let fault = handler
            .execute(
                Command::new(RUNTIME_UPDATE_COMMAND, Bytes::from_static(b"?")),
                &ctx(),
            )
            .await
            .unwrap_err();
        assert!(fault.message().contains(RUNTIME_UPDATE_COMMAND));
    }
}
