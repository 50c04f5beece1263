//! Low-level coordination-service interface
//!
//! The wire protocol itself is an external concern; the core consumes it
//! through [`CoordinationClient`]. Watches are single-shot, matching
//! ZooKeeper semantics: `children_watch` arms one watch on a node's child
//! list and the returned receiver fires at most once. Re-arming means
//! calling `children_watch` again.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::oneshot;

/// Whether a created node outlives the creating session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Node persists until deleted
    Persistent,
    /// Node is removed when the creating session ends
    Ephemeral,
}

/// Session state carried by a watch event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperState {
    /// Session is healthy
    SyncConnected,
    /// Connection to the service was lost; watches need re-arming
    Disconnected,
    /// Session expired; ephemeral nodes are gone
    Expired,
}

/// A fired watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    /// Path the watch was armed on; empty on pure session events
    pub path: String,
    /// Session state at delivery time
    pub state: KeeperState,
}

impl WatchedEvent {
    /// True for a spurious wake carrying no path and no session change
    pub fn is_empty(&self) -> bool {
        self.path.is_empty() && self.state == KeeperState::SyncConnected
    }
}

/// Node metadata returned by reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    /// Data version, incremented on every set
    pub version: i32,
}

/// The contract the core consumes from the coordination-service library.
///
/// Implementations must provide linearizable create/set/delete and deliver
/// watch events in per-session order. All methods surface service error
/// kinds through the crate error type (`NoNode`, `NodeExists`, `BadVersion`,
/// `Connection`).
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Establish a session against `hosts`
    async fn connect(&self, hosts: &[String], timeout: Duration) -> Result<()>;

    /// Create a node. Fails with `NodeExists` if present, `NoNode` if the
    /// parent is missing.
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<()>;

    /// Read a node's data and stat
    async fn get(&self, path: &str) -> Result<(Vec<u8>, NodeStat)>;

    /// Conditionally overwrite a node's data
    async fn set(&self, path: &str, data: Vec<u8>, version: i32) -> Result<()>;

    /// Conditionally delete a node
    async fn delete(&self, path: &str, version: i32) -> Result<()>;

    /// Child names of a node
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Child names plus a single-shot watch on the child list
    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, oneshot::Receiver<WatchedEvent>)>;
}
