//! Integration tests for error types.
//!
//! These tests verify error display, classification and metric labels.

use std::time::Duration;

use bytes::Bytes;
use zonal::error::{MemberFailure, TopologyError};
use zonal::membership::Endpoint;

// ============================================================================
// Display
// ============================================================================

#[test]
fn test_controller_unavailable_display() {
    let display = TopologyError::ControllerUnavailable.to_string();
    assert!(display.contains("controller"));
}

#[test]
fn test_zone_leader_unavailable_display() {
    let err = TopologyError::ZoneLeaderUnavailable {
        zone: "zone9".to_string(),
    };
    assert!(err.to_string().contains("zone9"));
}

#[test]
fn test_sync_failed_display() {
    let err = TopologyError::SyncFailed {
        failed_index: 1,
        command_type: "deploy".to_string(),
        applied: 1,
        reason: "contribution not found".to_string(),
    };
    let display = err.to_string();
    assert!(display.contains("index 1"));
    assert!(display.contains("deploy"));
    assert!(display.contains("1 applied"));
    assert!(display.contains("contribution not found"));
}

#[test]
fn test_runtime_not_found_display() {
    let err = TopologyError::RuntimeNotFound("acme:node:z:9".to_string());
    assert!(err.to_string().contains("acme:node:z:9"));
}

#[test]
fn test_invalid_state_display() {
    let err = TopologyError::InvalidState {
        operation: "send",
        state: "stopped",
    };
    assert_eq!(err.to_string(), "Cannot send while stopped");
}

#[test]
fn test_domain_fault_lossy_utf8() {
    let err = TopologyError::DomainFault {
        origin: Endpoint::new("mem-1"),
        fault: Bytes::from_static(&[0x66, 0x6f, 0xff]),
    };
    let message = err.fault_message().unwrap();
    assert!(message.starts_with("fo"));
}

#[test]
fn test_aggregate_failure_lists_every_member() {
    let err = TopologyError::AggregateSendFailure {
        zone: "z".to_string(),
        succeeded: 0,
        failures: vec![
            MemberFailure {
                runtime_name: "acme:node:z:1".to_string(),
                error: TopologyError::Timeout {
                    target: Endpoint::new("mem-1"),
                    timeout: Duration::from_millis(5),
                },
            },
            MemberFailure {
                runtime_name: "acme:node:z:2".to_string(),
                error: TopologyError::DomainFault {
                    origin: Endpoint::new("mem-2"),
                    fault: Bytes::from_static(b"rejected"),
                },
            },
        ],
    };
    let display = err.to_string();
    assert!(display.contains("2 member(s)"));
    assert!(display.contains("acme:node:z:1"));
    assert!(display.contains("rejected"));
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_retryable_errors() {
    let retryable = [
        TopologyError::Timeout {
            target: Endpoint::new("mem-1"),
            timeout: Duration::from_secs(1),
        },
        TopologyError::ControllerUnavailable,
        TopologyError::ZoneLeaderUnavailable {
            zone: "z".to_string(),
        },
        TopologyError::SyncUnavailable,
        TopologyError::Transport("closed".to_string()),
    ];
    for err in &retryable {
        assert!(err.is_retryable(), "{} should be retryable", err);
    }
}

#[test]
fn test_non_retryable_errors() {
    let fatal = [
        TopologyError::Decode("bad".to_string()),
        TopologyError::SyncFailed {
            failed_index: 0,
            command_type: "x".to_string(),
            applied: 0,
            reason: "y".to_string(),
        },
        TopologyError::RuntimeNotFound("r".to_string()),
        TopologyError::Config("c".to_string()),
        TopologyError::AggregateSendFailure {
            zone: "z".to_string(),
            succeeded: 1,
            failures: vec![],
        },
    ];
    for err in &fatal {
        assert!(!err.is_retryable(), "{} should not be retryable", err);
    }
}

#[test]
fn test_metric_labels_are_distinct() {
    let labels = [
        TopologyError::ControllerUnavailable.as_metric_label(),
        TopologyError::SyncUnavailable.as_metric_label(),
        TopologyError::Decode(String::new()).as_metric_label(),
        TopologyError::Transport(String::new()).as_metric_label(),
        TopologyError::Serialization(String::new()).as_metric_label(),
        TopologyError::Config(String::new()).as_metric_label(),
        TopologyError::RuntimeNotFound(String::new()).as_metric_label(),
    ];
    let mut unique = labels.to_vec();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), labels.len());
}

#[test]
fn test_error_is_send_sync() {
    fn assert_send_sync<T: Send + Sync + 'static>() {}
    assert_send_sync::<TopologyError>();
}
