//! Membership views and the membership differ.
//!
//! The transport delivers a full [`MembershipView`] on every change. A node
//! only keeps the current and the previous view; [`diff`] turns the pair
//! into joined and departed members.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::identity::{NodeIdentity, NodeRole};

/// Opaque transport-level address of a group member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint(Arc<str>);

impl Endpoint {
    pub fn new(address: impl AsRef<str>) -> Self {
        Self(Arc::from(address.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A member of a view: transport address plus the name it joined with.
///
/// The logical identity is decoded once when the member is constructed and
/// never changes afterwards. Names that do not decode leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    endpoint: Endpoint,
    name: Arc<str>,
    identity: Option<Arc<NodeIdentity>>,
}

impl Member {
    pub fn new(endpoint: Endpoint, name: impl AsRef<str>) -> Self {
        let name: Arc<str> = Arc::from(name.as_ref());
        let identity = NodeIdentity::decode(&name).map(Arc::new);
        Self {
            endpoint,
            name,
            identity,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Name the member joined with (an encoded runtime name for runtimes).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decoded logical identity, if the name is a runtime name.
    pub fn identity(&self) -> Option<&NodeIdentity> {
        self.identity.as_deref()
    }

    pub fn is_controller(&self) -> bool {
        self.identity().is_some_and(NodeIdentity::is_controller)
    }

    /// Returns true if this member is a participant node of `zone`.
    pub fn in_zone(&self, zone: &str) -> bool {
        self.identity()
            .is_some_and(|id| id.role == NodeRole::Node && id.zone() == Some(zone))
    }

    /// Returns true if this member is a participant node of any zone.
    pub fn is_node(&self) -> bool {
        self.identity().is_some_and(|id| id.role == NodeRole::Node)
    }
}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.endpoint)
    }
}

/// Immutable snapshot of the group membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipView {
    view_id: u64,
    members: Vec<Member>,
}

impl MembershipView {
    /// Build a view. Duplicate endpoints keep their first occurrence.
    pub fn new(view_id: u64, members: Vec<Member>) -> Self {
        let mut seen = HashSet::with_capacity(members.len());
        let members = members
            .into_iter()
            .filter(|m| seen.insert(m.endpoint.clone()))
            .collect();
        Self { view_id, members }
    }

    /// The empty view a node starts from before the first delivery.
    pub fn empty() -> Self {
        Self {
            view_id: 0,
            members: Vec::new(),
        }
    }

    pub fn view_id(&self) -> u64 {
        self.view_id
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.members.iter().any(|m| &m.endpoint == endpoint)
    }

    pub fn member(&self, endpoint: &Endpoint) -> Option<&Member> {
        self.members.iter().find(|m| &m.endpoint == endpoint)
    }

    /// Find a member by the name it joined with.
    pub fn member_by_name(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name() == name)
    }

    /// Participant nodes of `zone`, in view order.
    pub fn zone_members<'a, 'z>(
        &'a self,
        zone: &'z str,
    ) -> impl Iterator<Item = &'a Member> + use<'a, 'z> {
        self.members.iter().filter(move |m| m.in_zone(zone))
    }

    /// Participant nodes of every zone, in view order.
    pub fn node_members(&self) -> impl Iterator<Item = &Member> {
        self.members.iter().filter(|m| m.is_node())
    }

    /// Distinct zone names present in the view, sorted.
    pub fn zones(&self) -> Vec<String> {
        let mut zones: Vec<String> = self
            .node_members()
            .filter_map(|m| m.identity().and_then(|id| id.zone.clone()))
            .collect();
        zones.sort();
        zones.dedup();
        zones
    }
}

/// Members that joined and departed between two views.
///
/// The two lists are disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewDiff {
    pub joined: Vec<Member>,
    pub departed: Vec<Member>,
}

impl ViewDiff {
    pub fn is_empty(&self) -> bool {
        self.joined.is_empty() && self.departed.is_empty()
    }
}

/// Compute the joined and departed members between `previous` and `current`.
///
/// Members are compared by endpoint address, not by decoded identity.
/// Without a previous view every current member counts as joined.
pub fn diff(previous: Option<&MembershipView>, current: &MembershipView) -> ViewDiff {
    let Some(previous) = previous else {
        return ViewDiff {
            joined: current.members.clone(),
            departed: Vec::new(),
        };
    };

    let before: HashSet<&Endpoint> = previous.members.iter().map(|m| &m.endpoint).collect();
    let after: HashSet<&Endpoint> = current.members.iter().map(|m| &m.endpoint).collect();

    let joined = current
        .members
        .iter()
        .filter(|m| !before.contains(&m.endpoint))
        .cloned()
        .collect();
    let departed = previous
        .members
        .iter()
        .filter(|m| !after.contains(&m.endpoint))
        .cloned()
        .collect();

    ViewDiff { joined, departed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(addr: &str, name: &str) -> Member {
        Member::new(Endpoint::new(addr), name)
    }

    fn view(id: u64, members: &[(&str, &str)]) -> MembershipView {
        MembershipView::new(id, members.iter().map(|(a, n)| member(a, n)).collect())
    }

    #[test]
    fn test_member_decodes_identity_once() {
        let m = member("mem-1", "acme:node:zone1:1");
        let id = m.identity().unwrap();
        assert_eq!(id.zone(), Some("zone1"));
        assert!(m.in_zone("zone1"));
        assert!(!m.in_zone("zone2"));
        assert!(m.is_node());
        assert!(!m.is_controller());
    }

    #[test]
    fn test_member_without_identity() {
        let m = member("mem-1", "monitoring-agent");
        assert!(m.identity().is_none());
        assert!(!m.is_node());
        assert!(!m.is_controller());
    }

    #[test]
    fn test_view_deduplicates_endpoints() {
        let v = view(1, &[("a", "d:node:z:1"), ("a", "d:node:z:2")]);
        assert_eq!(v.len(), 1);
        assert_eq!(v.members()[0].name(), "d:node:z:1");
    }

    #[test]
    fn test_zone_members_and_zones() {
        let v = view(
            3,
            &[
                ("c", "d:controller:-:0"),
                ("a", "d:node:z2:1"),
                ("b", "d:node:z1:1"),
                ("x", "garbage"),
            ],
        );
        assert_eq!(v.zone_members("z1").count(), 1);
        assert_eq!(v.node_members().count(), 2);
        assert_eq!(v.zones(), vec!["z1".to_string(), "z2".to_string()]);
        assert!(v.member_by_name("d:controller:-:0").is_some());
    }

    #[test]
    fn test_diff_bootstrap() {
        let cur = view(1, &[("a", "d:node:z:1"), ("b", "d:node:z:2")]);
        let d = diff(None, &cur);
        assert_eq!(d.joined, cur.members().to_vec());
        assert!(d.departed.is_empty());
    }

    #[test]
    fn test_diff_join_and_leave() {
        let prev = view(1, &[("a", "d:node:z:1"), ("b", "d:node:z:2")]);
        let cur = view(2, &[("b", "d:node:z:2"), ("c", "d:node:z:3")]);
        let d = diff(Some(&prev), &cur);
        assert_eq!(d.joined.len(), 1);
        assert_eq!(d.joined[0].endpoint().as_str(), "c");
        assert_eq!(d.departed.len(), 1);
        assert_eq!(d.departed[0].endpoint().as_str(), "a");
    }

    #[test]
    fn test_diff_compares_by_address_not_identity() {
        // same decoded identity behind two addresses must not be merged
        let prev = view(1, &[("a", "d:node:z:1")]);
        let cur = view(2, &[("b", "d:node:z:1")]);
        let d = diff(Some(&prev), &cur);
        assert_eq!(d.joined.len(), 1);
        assert_eq!(d.departed.len(), 1);
    }

    #[test]
    fn test_diff_identical_views_is_empty() {
        let prev = view(1, &[("a", "d:node:z:1")]);
        let cur = view(2, &[("a", "d:node:z:1")]);
        assert!(diff(Some(&prev), &cur).is_empty());
    }
}
