//! Ordered deployment backlog.
//!
//! The controller appends every deployment it issues and stamps the
//! broadcast with the entry's position. A node appends a command only when
//! its position equals the node's marker, whether the command arrives live or
//! through synchronization, so a node's log is always a prefix of the
//! controller's and positions agree across the domain. The position marker is
//! simply the number of entries.

use std::sync::RwLock;

use crate::messaging::Command;

/// Append-only, in-memory backlog of deployment commands.
#[derive(Debug, Default)]
pub struct DeploymentLog {
    entries: RwLock<Vec<Command>>,
}

impl DeploymentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command and return the new marker.
    pub fn append(&self, command: Command) -> u64 {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(command);
        entries.len() as u64
    }

    /// Position after the last entry.
    pub fn marker(&self) -> u64 {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.marker() == 0
    }

    /// Commands after `marker`, and the marker they bring a reader up to.
    ///
    /// A reader ahead of this log gets nothing back.
    pub fn delta(&self, marker: u64) -> (Vec<Command>, u64) {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let start = usize::try_from(marker).unwrap_or(usize::MAX).min(entries.len());
        (entries[start..].to_vec(), entries.len() as u64)
    }

    /// Copy of every entry.
    pub fn entries(&self) -> Vec<Command> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
