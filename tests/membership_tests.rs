//! Integration tests for membership views, the differ and zone leader selection.
//!
//! Views are built by hand here; the services derive the same answers from
//! transport views in topology_tests.rs.

use zonal::membership::{
    Endpoint, Member, MembershipView, NodeIdentity, NodeRole, controller_of, diff, is_leader,
    leader_of, new_leaders_since,
};

fn member(addr: &str, name: &str) -> Member {
    Member::new(Endpoint::new(addr), name)
}

fn view(id: u64, members: &[(&str, &str)]) -> MembershipView {
    MembershipView::new(id, members.iter().map(|(a, n)| member(a, n)).collect())
}

fn endpoints(members: &[Member]) -> Vec<&str> {
    let mut out: Vec<&str> = members.iter().map(|m| m.endpoint().as_str()).collect();
    out.sort();
    out
}

// ============================================================================
// Identity Codec
// ============================================================================

#[test]
fn test_identity_roundtrip_for_every_role() {
    let identities = [
        NodeIdentity::node("acme", "zone1", "00000000000000000001"),
        NodeIdentity::node("acme", "eu-west", "7"),
        NodeIdentity::controller("acme"),
    ];
    for identity in identities {
        let decoded = NodeIdentity::decode(&identity.encode()).expect("should decode");
        assert_eq!(decoded, identity);
    }
}

#[test]
fn test_decode_rejects_foreign_names() {
    for name in ["", "acme", "acme:node:zone1", "acme:node:zone1:1:extra", "acme:admin:z:1"] {
        assert!(NodeIdentity::decode(name).is_none(), "{name:?} should not decode");
    }
}

#[test]
fn test_member_without_identity_is_ignored_by_zone_queries() {
    let v = view(1, &[("mem-1", "not-a-runtime"), ("mem-2", "acme:node:z:1")]);
    assert!(v.member(&Endpoint::new("mem-1")).unwrap().identity().is_none());
    assert_eq!(v.zones(), vec!["z".to_string()]);
    assert_eq!(leader_of("z", &v).unwrap().endpoint().as_str(), "mem-2");
}

// ============================================================================
// Differ
// ============================================================================

#[test]
fn test_scenario_node_joins_zone() {
    // V1 = {C, A(zone1, 0001)}, V2 = V1 + {B(zone1, 0002)}
    let v1 = view(1, &[("mem-c", "acme:controller:-:0"), ("mem-a", "acme:node:zone1:0001")]);
    let v2 = view(
        2,
        &[
            ("mem-c", "acme:controller:-:0"),
            ("mem-a", "acme:node:zone1:0001"),
            ("mem-b", "acme:node:zone1:0002"),
        ],
    );

    let d = diff(Some(&v1), &v2);
    assert_eq!(endpoints(&d.joined), vec!["mem-b"]);
    assert!(d.departed.is_empty());

    // A keeps leading zone1, no leader change is reported
    assert!(is_leader("zone1", &v2, &Endpoint::new("mem-a")));
    assert!(new_leaders_since(Some(&v1), &v2).is_empty());
}

#[test]
fn test_scenario_leader_departs() {
    // V2 -> V3 where A left: B takes over zone1
    let v2 = view(
        2,
        &[
            ("mem-c", "acme:controller:-:0"),
            ("mem-a", "acme:node:zone1:0001"),
            ("mem-b", "acme:node:zone1:0002"),
        ],
    );
    let v3 = view(3, &[("mem-c", "acme:controller:-:0"), ("mem-b", "acme:node:zone1:0002")]);

    let d = diff(Some(&v2), &v3);
    assert!(d.joined.is_empty());
    assert_eq!(endpoints(&d.departed), vec!["mem-a"]);

    let changes = new_leaders_since(Some(&v2), &v3);
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].0, "zone1");
    assert_eq!(changes[0].1.endpoint().as_str(), "mem-b");
}

#[test]
fn test_diff_is_disjoint_and_complete() {
    let before = view(4, &[("a", "d:node:z:1"), ("b", "d:node:z:2"), ("c", "d:node:y:1")]);
    let after = view(5, &[("b", "d:node:z:2"), ("c", "d:node:y:1"), ("e", "d:node:y:0")]);

    let d = diff(Some(&before), &after);
    assert_eq!(endpoints(&d.joined), vec!["e"]);
    assert_eq!(endpoints(&d.departed), vec!["a"]);

    for m in &d.joined {
        assert!(!d.departed.iter().any(|x| x.endpoint() == m.endpoint()));
        assert!(after.contains(m.endpoint()) && !before.contains(m.endpoint()));
    }
    for m in &d.departed {
        assert!(before.contains(m.endpoint()) && !after.contains(m.endpoint()));
    }
}

#[test]
fn test_diff_identical_views_is_empty() {
    let v = view(9, &[("a", "d:node:z:1"), ("b", "d:controller:-:0")]);
    assert!(diff(Some(&v), &v.clone()).is_empty());
}

#[test]
fn test_diff_from_nothing_joins_everyone() {
    let v = view(1, &[("a", "d:node:z:1"), ("b", "d:controller:-:0")]);
    let d = diff(None, &v);
    assert_eq!(endpoints(&d.joined), vec!["a", "b"]);
    assert!(d.departed.is_empty());
}

#[test]
fn test_diff_compares_by_endpoint() {
    // same name, new endpoint: a restart counts as depart + join
    let before = view(1, &[("mem-1", "d:node:z:1")]);
    let after = view(2, &[("mem-2", "d:node:z:1")]);
    let d = diff(Some(&before), &after);
    assert_eq!(endpoints(&d.joined), vec!["mem-2"]);
    assert_eq!(endpoints(&d.departed), vec!["mem-1"]);
}

// ============================================================================
// Leader Selection
// ============================================================================

#[test]
fn test_leader_per_zone() {
    let v = view(
        1,
        &[("n1", "d:node:zone1:1"), ("n2", "d:node:zone1:2"), ("n3", "d:node:zone2:1")],
    );
    assert_eq!(leader_of("zone1", &v).unwrap().endpoint().as_str(), "n1");
    assert_eq!(leader_of("zone2", &v).unwrap().endpoint().as_str(), "n3");
    assert!(leader_of("zone3", &v).is_none());
    // same view, same answer
    assert_eq!(leader_of("zone1", &v), leader_of("zone1", &v));
}

#[test]
fn test_leader_is_smallest_sequence_regardless_of_view_order() {
    let orders: [&[(&str, &str)]; 3] = [
        &[("a", "d:node:z:0003"), ("b", "d:node:z:0001"), ("c", "d:node:z:0002")],
        &[("c", "d:node:z:0002"), ("a", "d:node:z:0003"), ("b", "d:node:z:0001")],
        &[("b", "d:node:z:0001"), ("c", "d:node:z:0002"), ("a", "d:node:z:0003")],
    ];
    for members in orders {
        let v = view(1, members);
        assert_eq!(leader_of("z", &v).unwrap().endpoint().as_str(), "b");
    }
}

#[test]
fn test_exactly_one_leader_per_zone() {
    let v = view(
        1,
        &[
            ("a", "d:node:east:2"),
            ("b", "d:node:east:1"),
            ("c", "d:node:west:5"),
            ("x", "d:controller:-:0"),
        ],
    );
    for zone in v.zones() {
        let leaders = v
            .members()
            .iter()
            .filter(|m| is_leader(&zone, &v, m.endpoint()))
            .count();
        assert_eq!(leaders, 1, "zone {zone} should have one leader");
    }
}

#[test]
fn test_controller_never_leads_a_zone() {
    let v = view(1, &[("x", "d:controller:-:0")]);
    assert!(v.zones().is_empty());
    assert!(leader_of("-", &v).is_none());
    assert!(leader_of("z", &v).is_none());
}

#[test]
fn test_controller_lookup() {
    let v = view(1, &[("a", "d:node:z:1"), ("x", "d:controller:-:0")]);
    let controller = controller_of("d", &v).unwrap();
    assert_eq!(controller.endpoint().as_str(), "x");
    assert_eq!(controller.identity().unwrap().role, NodeRole::Controller);
    assert!(controller_of("other", &v).is_none());
}
