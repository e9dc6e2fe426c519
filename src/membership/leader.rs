//! Zone leader selection.
//!
//! Leadership is a pure projection of a view: the participant node of a zone
//! with the lexicographically smallest sequence id leads it. Every node
//! computes the same answer from the same view, so no election round is
//! needed. Leaders are recomputed on every view and never cached.

use super::identity::NodeIdentity;
use super::view::{Endpoint, Member, MembershipView};

/// Select the leader of `zone` in `view`.
///
/// Returns `None` if the zone has no participant nodes.
pub fn leader_of<'a>(zone: &str, view: &'a MembershipView) -> Option<&'a Member> {
    view.zone_members(zone).min_by(|a, b| {
        sequence_of(a)
            .cmp(sequence_of(b))
            .then_with(|| a.endpoint().cmp(b.endpoint()))
    })
}

/// Returns true if `endpoint` leads `zone` in `view`.
pub fn is_leader(zone: &str, view: &MembershipView, endpoint: &Endpoint) -> bool {
    leader_of(zone, view).is_some_and(|leader| leader.endpoint() == endpoint)
}

/// Zones whose leader in `current` differs from, or did not exist in, `previous`.
///
/// Results are ordered by zone name.
pub fn new_leaders_since(
    previous: Option<&MembershipView>,
    current: &MembershipView,
) -> Vec<(String, Member)> {
    current
        .zones()
        .into_iter()
        .filter_map(|zone| {
            let leader = leader_of(&zone, current)?;
            let before = previous.and_then(|p| leader_of(&zone, p));
            match before {
                Some(prev) if prev.endpoint() == leader.endpoint() => None,
                _ => Some((zone, leader.clone())),
            }
        })
        .collect()
}

/// Resolve the domain controller from a view.
///
/// The controller is the member carrying the well-known controller identity
/// of `domain`. No network call is involved.
pub fn controller_of<'a>(domain: &str, view: &'a MembershipView) -> Option<&'a Member> {
    let expected = NodeIdentity::controller(domain).encode();
    view.members()
        .iter()
        .find(|m| m.name() == expected)
        .or_else(|| {
            view.members()
                .iter()
                .find(|m| m.identity().is_some_and(|id| id.is_controller() && id.domain == domain))
        })
}

fn sequence_of(member: &Member) -> &str {
    member
        .identity()
        .map(|id| id.sequence_id.as_str())
        .unwrap_or_default()
}
