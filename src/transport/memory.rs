//! In-process group transport.
//!
//! [`InMemoryNetwork`] is a shared hub; each node gets its own
//! [`InMemoryTransport`] from [`InMemoryNetwork::transport`]. Every join and
//! leave installs a new view with the next `view_id` and delivers it to all
//! members of that view. Messages go through per-member unbounded channels,
//! so messages from one sender arrive in send order.
//!
//! [`InMemoryNetwork::isolate`] silently drops all traffic to and from a
//! member while keeping it in the view, which simulates a hung peer.
//! [`InMemoryNetwork::crash`] removes a member from the view without it
//! calling `leave`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{GroupTransport, TransportEvent};
use crate::error::{TopologyError, TopologyResult};
use crate::membership::{Endpoint, Member, MembershipView};

#[derive(Default)]
struct GroupState {
    view_id: u64,
    members: Vec<Member>,
}

#[derive(Default)]
struct NetworkInner {
    next_address: AtomicU64,
    /// Serializes view installation so every member sees views in order.
    group: Mutex<GroupState>,
    mailboxes: DashMap<Endpoint, mpsc::UnboundedSender<TransportEvent>>,
    isolated: Mutex<HashSet<Endpoint>>,
}

impl NetworkInner {
    fn group(&self) -> MutexGuard<'_, GroupState> {
        self.group.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn isolated(&self) -> MutexGuard<'_, HashSet<Endpoint>> {
        self.isolated.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Install the next view and deliver it. Caller holds the group lock.
    fn install_view(&self, group: &mut GroupState) -> Arc<MembershipView> {
        group.view_id += 1;
        let view = Arc::new(MembershipView::new(group.view_id, group.members.clone()));
        debug!(
            view_id = view.view_id(),
            members = view.len(),
            "Installing membership view"
        );
        for member in view.members() {
            if let Some(mailbox) = self.mailboxes.get(member.endpoint()) {
                let _ = mailbox.send(TransportEvent::ViewChanged(Arc::clone(&view)));
            }
        }
        view
    }

    fn remove_member(&self, endpoint: &Endpoint) -> bool {
        let mut group = self.group();
        let before = group.members.len();
        group.members.retain(|m| m.endpoint() != endpoint);
        let removed = group.members.len() != before;
        // drop the mailbox first so the departed node's event stream ends
        self.mailboxes.remove(endpoint);
        if removed {
            self.install_view(&mut group);
        }
        removed
    }

    fn deliver(&self, from: &Endpoint, target: &Endpoint, payload: Bytes) -> TopologyResult<()> {
        {
            let isolated = self.isolated();
            if isolated.contains(from) || isolated.contains(target) {
                trace!(%from, %target, "Dropping message for isolated member");
                return Ok(());
            }
        }
        let mailbox = self
            .mailboxes
            .get(target)
            .ok_or_else(|| TopologyError::Transport(format!("unknown endpoint {}", target)))?;
        mailbox
            .send(TransportEvent::Message {
                from: from.clone(),
                payload,
            })
            .map_err(|_| TopologyError::Transport(format!("endpoint {} is closed", target)))
    }
}

/// Shared in-process group. Cloning yields another handle to the same group.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport handle for a new node.
    pub fn transport(&self) -> Arc<InMemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(InMemoryTransport {
            network: Arc::clone(&self.inner),
            sender: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            local: Mutex::new(None),
        })
    }

    /// Snapshot of the current view.
    pub fn current_view(&self) -> MembershipView {
        let group = self.inner.group();
        MembershipView::new(group.view_id, group.members.clone())
    }

    /// Drop all traffic to and from `endpoint` without changing the view.
    pub fn isolate(&self, endpoint: &Endpoint) {
        debug!(%endpoint, "Isolating member");
        self.inner.isolated().insert(endpoint.clone());
    }

    /// Undo [`isolate`](Self::isolate).
    pub fn heal(&self, endpoint: &Endpoint) {
        debug!(%endpoint, "Healing member");
        self.inner.isolated().remove(endpoint);
    }

    /// Remove `endpoint` from the group as if failure detection evicted it.
    pub fn crash(&self, endpoint: &Endpoint) -> bool {
        debug!(%endpoint, "Evicting member");
        self.inner.remove_member(endpoint)
    }
}

/// One node's handle onto an [`InMemoryNetwork`].
pub struct InMemoryTransport {
    network: Arc<NetworkInner>,
    /// Moved into the network's mailbox table on join.
    sender: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    local: Mutex<Option<Endpoint>>,
}

impl InMemoryTransport {
    fn local(&self) -> MutexGuard<'_, Option<Endpoint>> {
        self.local.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn require_local(&self) -> TopologyResult<Endpoint> {
        self.local().clone().ok_or(TopologyError::InvalidState {
            operation: "send",
            state: "not joined",
        })
    }
}

#[async_trait]
impl GroupTransport for InMemoryTransport {
    async fn join(&self, local_name: &str) -> TopologyResult<Endpoint> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(TopologyError::InvalidState {
                operation: "join",
                state: "already joined or left",
            })?;
        let n = self.network.next_address.fetch_add(1, Ordering::Relaxed) + 1;
        let endpoint = Endpoint::new(format!("mem-{}", n));

        let mut group = self.network.group();
        self.network
            .mailboxes
            .insert(endpoint.clone(), sender);
        group
            .members
            .push(Member::new(endpoint.clone(), local_name));
        *self.local() = Some(endpoint.clone());
        self.network.install_view(&mut group);
        debug!(%endpoint, name = local_name, "Joined in-memory group");
        Ok(endpoint)
    }

    async fn leave(&self) -> TopologyResult<()> {
        let Some(endpoint) = self.local().take() else {
            return Ok(());
        };
        self.network.remove_member(&endpoint);
        debug!(%endpoint, "Left in-memory group");
        Ok(())
    }

    fn local_endpoint(&self) -> Option<Endpoint> {
        self.local().clone()
    }

    fn subscribe(&self) -> TopologyResult<mpsc::UnboundedReceiver<TransportEvent>> {
        self.receiver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| TopologyError::Transport("event stream already taken".to_string()))
    }

    async fn unicast(&self, target: &Endpoint, payload: Bytes) -> TopologyResult<()> {
        let from = self.require_local()?;
        self.network.deliver(&from, target, payload)
    }

    async fn multicast(&self, targets: &[Endpoint], payload: Bytes) -> TopologyResult<()> {
        let from = self.require_local()?;
        for target in targets {
            // a member that left between view and send is not an error for a broadcast
            if let Err(e) = self.network.deliver(&from, target, payload.clone()) {
                debug!(%target, error = %e, "Skipping multicast target");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_view(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Arc<MembershipView> {
        loop {
            match rx.recv().await.expect("stream open") {
                TransportEvent::ViewChanged(view) => return view,
                TransportEvent::Message { .. } => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_join_installs_increasing_views() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let b = net.transport();
        let mut rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();

        a.join("a").await.unwrap();
        let v1 = next_view(&mut rx_a).await;
        assert_eq!(v1.len(), 1);

        b.join("b").await.unwrap();
        let v2a = next_view(&mut rx_a).await;
        let v2b = next_view(&mut rx_b).await;
        assert!(v2a.view_id() > v1.view_id());
        assert_eq!(v2a.view_id(), v2b.view_id());
        assert_eq!(v2a.len(), 2);
    }

    #[tokio::test]
    async fn test_unicast_preserves_order() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let b = net.transport();
        let _rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();
        a.join("a").await.unwrap();
        let eb = b.join("b").await.unwrap();

        for i in 0..10u8 {
            a.unicast(&eb, Bytes::from(vec![i])).await.unwrap();
        }
        let mut seen = Vec::new();
        while seen.len() < 10 {
            if let Some(TransportEvent::Message { payload, .. }) = rx_b.recv().await {
                seen.push(payload[0]);
            }
        }
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_multicast_to_self() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let mut rx = a.subscribe().unwrap();
        let ea = a.join("a").await.unwrap();
        a.multicast(&[ea.clone()], Bytes::from_static(b"hi"))
            .await
            .unwrap();
        next_view(&mut rx).await;
        match rx.recv().await.unwrap() {
            TransportEvent::Message { from, payload } => {
                assert_eq!(from, ea);
                assert_eq!(&payload[..], b"hi");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_leave_publishes_view_and_closes_stream() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let b = net.transport();
        let mut rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();
        a.join("a").await.unwrap();
        let eb = b.join("b").await.unwrap();
        next_view(&mut rx_a).await;
        next_view(&mut rx_a).await;

        b.leave().await.unwrap();
        let view = next_view(&mut rx_a).await;
        assert!(!view.contains(&eb));
        assert!(b.local_endpoint().is_none());

        // the departed node drains its queue then sees the end of the stream
        while rx_b.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_isolate_drops_traffic() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let b = net.transport();
        let _rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();
        a.join("a").await.unwrap();
        let eb = b.join("b").await.unwrap();
        next_view(&mut rx_b).await;

        net.isolate(&eb);
        a.unicast(&eb, Bytes::from_static(b"lost")).await.unwrap();
        net.heal(&eb);
        a.unicast(&eb, Bytes::from_static(b"kept")).await.unwrap();

        match rx_b.recv().await.unwrap() {
            TransportEvent::Message { payload, .. } => assert_eq!(&payload[..], b"kept"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unicast_unknown_endpoint_errors() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let _rx = a.subscribe().unwrap();
        a.join("a").await.unwrap();
        let err = a
            .unicast(&Endpoint::new("mem-99"), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TopologyError::Transport(_)));
    }

    #[tokio::test]
    async fn test_crash_removes_member() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let b = net.transport();
        let mut rx_a = a.subscribe().unwrap();
        let _rx_b = b.subscribe().unwrap();
        a.join("a").await.unwrap();
        let eb = b.join("b").await.unwrap();
        assert!(net.crash(&eb));
        assert!(!net.crash(&eb));
        next_view(&mut rx_a).await;
        next_view(&mut rx_a).await;
        let view = next_view(&mut rx_a).await;
        assert_eq!(view.len(), 1);
        assert_eq!(net.current_view().len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_once() {
        let net = InMemoryNetwork::new();
        let a = net.transport();
        let _rx = a.subscribe().unwrap();
        assert!(a.subscribe().is_err());
    }
}
