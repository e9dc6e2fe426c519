//! Typed command registry.
//!
//! Incoming commands are dispatched by their `command_type` tag to a
//! registered [`CommandHandler`]. Handlers return response bytes, or a
//! [`CommandFault`] that travels back to a synchronous caller as fault bytes.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tracing::debug;

use super::envelope::Command;
use crate::membership::Endpoint;

/// Application-level failure raised by a command handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CommandFault(pub String);

impl CommandFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }

    /// Wire form of the fault.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.0.clone().into_bytes())
    }
}

/// Where a command came from.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Sender of the command. Equal to `local` for local replay.
    pub origin: Endpoint,
    /// Endpoint of the executing node.
    pub local: Endpoint,
    /// False for one-way commands.
    pub expects_reply: bool,
}

/// Executes one command type.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn execute(
        &self,
        command: Command,
        ctx: &ExecutionContext,
    ) -> Result<Bytes, CommandFault>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> CommandHandler for FnHandler<F>
where
    F: Fn(Command, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, CommandFault>> + Send + 'static,
{
    async fn execute(
        &self,
        command: Command,
        ctx: &ExecutionContext,
    ) -> Result<Bytes, CommandFault> {
        (self.0)(command, ctx.clone()).await
    }
}

/// Wrap an async closure as a [`CommandHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn CommandHandler>
where
    F: Fn(Command, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Bytes, CommandFault>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Maps command type tags to handlers.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: DashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one for the same type.
    pub fn register(&self, command_type: impl Into<String>, handler: Arc<dyn CommandHandler>) {
        let command_type = command_type.into();
        debug!(command_type = %command_type, "Registering command handler");
        self.handlers.insert(command_type, handler);
    }

    pub fn unregister(&self, command_type: &str) -> bool {
        self.handlers.remove(command_type).is_some()
    }

    pub fn contains(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Execute a command through its registered handler.
    pub async fn execute(
        &self,
        command: Command,
        ctx: &ExecutionContext,
    ) -> Result<Bytes, CommandFault> {
        // clone out of the map so no shard lock is held across the await
        let handler = self
            .handlers
            .get(&command.command_type)
            .map(|entry| Arc::clone(entry.value()));
        match handler {
            Some(handler) => handler.execute(command, ctx).await,
            None => Err(CommandFault::new(format!(
                "no handler registered for command type {}",
                command.command_type
            ))),
        }
    }
}
