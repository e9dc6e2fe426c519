//! Lifecycle state of a topology service.
//!
//! ```text
//! UNINITIALIZED ──init──▶ JOINING ──first view──▶ JOINED ──stop──▶ LEAVING ──▶ STOPPED
//!                            │                                        ▲
//!                            └────────────────stop────────────────────┘
//! ```
//!
//! Transitions are compare-and-set on a single atomic, so concurrent `init`
//! or `stop` calls resolve to exactly one winner.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle phase of a topology service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Joining = 1,
    Joined = 2,
    Leaving = 3,
    Stopped = 4,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Joining,
            2 => LifecycleState::Joined,
            3 => LifecycleState::Leaving,
            _ => LifecycleState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Joining => "joining",
            LifecycleState::Joined => "joined",
            LifecycleState::Leaving => "leaving",
            LifecycleState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic wrapper around [`LifecycleState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Uninitialized as u8),
        }
    }

    #[inline]
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move `from -> to`. Returns false if the current state is not `from`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Enter `Leaving` from `Joining` or `Joined`.
    ///
    /// Returns the state that was left, or `None` if the service was not running.
    pub fn begin_leave(&self) -> Option<LifecycleState> {
        [LifecycleState::Joined, LifecycleState::Joining]
            .into_iter()
            .find(|&from| self.transition(from, LifecycleState::Leaving))
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self.get(),
            LifecycleState::Joining | LifecycleState::Joined
        )
    }
}
