//! Group-communication transport boundary.
//!
//! The topology services sit on top of a reliable group transport that
//! delivers full membership views and unicast/multicast messages, preserving
//! per-sender order. This module defines that boundary; [`memory`] provides
//! an in-process implementation.
//!
//! # Contract
//!
//! - `subscribe` before `join` so the first view is not missed
//! - views arrive in increasing `view_id` order and are never skipped
//! - a member's messages arrive in the order it sent them
//! - delivery is not exactly-once; duplicates are tolerated by command handlers

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::TopologyResult;
use crate::membership::{Endpoint, MembershipView};

pub use memory::{InMemoryNetwork, InMemoryTransport};

/// Event delivered by the transport to a subscribed node.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A new full membership view.
    ViewChanged(Arc<MembershipView>),
    /// An opaque message from another member (or from this member to itself).
    Message { from: Endpoint, payload: Bytes },
}

/// A reliable group-communication channel.
#[async_trait]
pub trait GroupTransport: Send + Sync {
    /// Join the group under `local_name` and return the assigned endpoint.
    async fn join(&self, local_name: &str) -> TopologyResult<Endpoint>;

    /// Leave the group. Remaining members receive a view without this node.
    async fn leave(&self) -> TopologyResult<()>;

    /// Endpoint assigned by the last successful `join`.
    fn local_endpoint(&self) -> Option<Endpoint>;

    /// Take the event stream. Can be called once.
    fn subscribe(&self) -> TopologyResult<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Send to a single member.
    async fn unicast(&self, target: &Endpoint, payload: Bytes) -> TopologyResult<()>;

    /// Send to every member in `targets`. Including the local endpoint
    /// delivers the message back to this node.
    async fn multicast(&self, targets: &[Endpoint], payload: Bytes) -> TopologyResult<()>;
}
