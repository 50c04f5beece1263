//! In-memory coordination service
//!
//! A single-process stand-in for the external coordination-service library:
//! a node tree with versioned data, ephemeral ownership and single-shot
//! child watches. Creates are linearized by the tree lock, which is what
//! makes the claim-contention tests meaningful. The test hooks
//! [`fire_disconnect`](InMemoryCoordination::fire_disconnect) and
//! [`expire_ephemerals`](InMemoryCoordination::expire_ephemerals) simulate
//! session loss and expiry.

use crate::coordinator::client::{
    CoordinationClient, CreateMode, KeeperState, NodeStat, WatchedEvent,
};
use crate::coordinator::paths::parent_path;
use crate::error::{GrouplineError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug)]
struct Node {
    data: Vec<u8>,
    version: i32,
    ephemeral: bool,
}

#[derive(Default)]
struct Tree {
    nodes: HashMap<String, Node>,
    watches: HashMap<String, Vec<oneshot::Sender<WatchedEvent>>>,
    connected: bool,
}

impl Tree {
    fn fire_child_watches(&mut self, parent: &str, state: KeeperState) {
        if let Some(senders) = self.watches.remove(parent) {
            for sender in senders {
                // Receiver may be gone (e.g. a read that armed a watch and
                // dropped it); that is not an error.
                let _ = sender.send(WatchedEvent {
                    path: parent.to_string(),
                    state,
                });
            }
        }
    }
}

/// See the module docs.
pub struct InMemoryCoordination {
    tree: Mutex<Tree>,
}

impl Default for InMemoryCoordination {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                version: 0,
                ephemeral: false,
            },
        );
        Self {
            tree: Mutex::new(Tree {
                nodes,
                ..Default::default()
            }),
        }
    }

    /// Deliver a `Disconnected` event to every armed watch, as a lost
    /// connection would.
    pub fn fire_disconnect(&self) {
        let mut tree = self.tree.lock();
        let watches = std::mem::take(&mut tree.watches);
        for (_, senders) in watches {
            for sender in senders {
                let _ = sender.send(WatchedEvent {
                    path: String::new(),
                    state: KeeperState::Disconnected,
                });
            }
        }
    }

    /// Drop every ephemeral node, firing the child watches of their parents,
    /// as a session expiry would.
    pub fn expire_ephemerals(&self) {
        let mut tree = self.tree.lock();
        let expired: Vec<String> = tree
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &expired {
            tree.nodes.remove(path);
        }
        for path in &expired {
            let parent = parent_path(path).to_string();
            tree.fire_child_watches(&parent, KeeperState::SyncConnected);
        }
    }

    /// Number of nodes currently in the tree (root included)
    pub fn node_count(&self) -> usize {
        self.tree.lock().nodes.len()
    }

    /// True once `connect` has been called
    pub fn is_connected(&self) -> bool {
        self.tree.lock().connected
    }
}

#[async_trait]
impl CoordinationClient for InMemoryCoordination {
    async fn connect(&self, hosts: &[String], _timeout: Duration) -> Result<()> {
        if hosts.is_empty() {
            return Err(GrouplineError::connection("no hosts given"));
        }
        self.tree.lock().connected = true;
        Ok(())
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<()> {
        if !path.starts_with('/') || (path.len() > 1 && path.ends_with('/')) {
            return Err(GrouplineError::invalid_data(format!("bad path: {path}")));
        }
        let mut tree = self.tree.lock();
        if tree.nodes.contains_key(path) {
            return Err(GrouplineError::node_exists(path));
        }
        let parent = parent_path(path).to_string();
        if !tree.nodes.contains_key(&parent) {
            return Err(GrouplineError::no_node(parent));
        }
        tree.nodes.insert(
            path.to_string(),
            Node {
                data,
                version: 0,
                ephemeral: mode == CreateMode::Ephemeral,
            },
        );
        tree.fire_child_watches(&parent, KeeperState::SyncConnected);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, NodeStat)> {
        let tree = self.tree.lock();
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| GrouplineError::no_node(path))?;
        Ok((
            node.data.clone(),
            NodeStat {
                version: node.version,
            },
        ))
    }

    async fn set(&self, path: &str, data: Vec<u8>, version: i32) -> Result<()> {
        let mut tree = self.tree.lock();
        let node = tree
            .nodes
            .get_mut(path)
            .ok_or_else(|| GrouplineError::no_node(path))?;
        if node.version != version {
            return Err(GrouplineError::bad_version(format!(
                "{path}: expected {}, got {version}",
                node.version
            )));
        }
        node.data = data;
        node.version += 1;
        Ok(())
    }

    async fn delete(&self, path: &str, version: i32) -> Result<()> {
        let mut tree = self.tree.lock();
        let node = tree
            .nodes
            .get(path)
            .ok_or_else(|| GrouplineError::no_node(path))?;
        if node.version != version {
            return Err(GrouplineError::bad_version(format!(
                "{path}: expected {}, got {version}",
                node.version
            )));
        }
        tree.nodes.remove(path);
        let parent = parent_path(path).to_string();
        tree.fire_child_watches(&parent, KeeperState::SyncConnected);
        Ok(())
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(GrouplineError::no_node(path));
        }
        let mut names: Vec<String> = tree
            .nodes
            .keys()
            .filter(|candidate| candidate.as_str() != "/" && parent_path(candidate) == path)
            .filter_map(|candidate| candidate.rsplit('/').next().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, oneshot::Receiver<WatchedEvent>)> {
        let (sender, receiver) = oneshot::channel();
        let mut tree = self.tree.lock();
        if !tree.nodes.contains_key(path) {
            return Err(GrouplineError::no_node(path));
        }
        let mut names: Vec<String> = tree
            .nodes
            .keys()
            .filter(|candidate| candidate.as_str() != "/" && parent_path(candidate) == path)
            .filter_map(|candidate| candidate.rsplit('/').next().map(str::to_string))
            .collect();
        names.sort();
        tree.watches.entry(path.to_string()).or_default().push(sender);
        Ok((names, receiver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> InMemoryCoordination {
        InMemoryCoordination::new()
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let zk = service();
        zk.create("/a", b"data".to_vec(), CreateMode::Persistent)
            .await
            .unwrap();
        let (data, stat) = zk.get("/a").await.unwrap();
        assert_eq!(data, b"data");
        assert_eq!(stat.version, 0);
    }

    #[tokio::test]
    async fn test_create_missing_parent_fails() {
        let zk = service();
        let err = zk
            .create("/a/b", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_no_node());
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let zk = service();
        zk.create("/a", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let err = zk
            .create("/a", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_node_exists());
    }

    #[tokio::test]
    async fn test_set_bumps_version_and_checks_it() {
        let zk = service();
        zk.create("/a", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        zk.set("/a", b"v1".to_vec(), 0).await.unwrap();
        let (_, stat) = zk.get("/a").await.unwrap();
        assert_eq!(stat.version, 1);
        assert!(matches!(
            zk.set("/a", b"v2".to_vec(), 0).await,
            Err(GrouplineError::BadVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_children_sorted() {
        let zk = service();
        zk.create("/g", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        for name in ["c", "a", "b"] {
            zk.create(&format!("/g/{name}"), Vec::new(), CreateMode::Persistent)
                .await
                .unwrap();
        }
        assert_eq!(zk.children("/g").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_child_watch_fires_on_create() {
        let zk = service();
        zk.create("/g", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let (children, watch) = zk.children_watch("/g").await.unwrap();
        assert!(children.is_empty());

        zk.create("/g/c1", Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        let event = watch.await.unwrap();
        assert_eq!(event.path, "/g");
        assert_eq!(event.state, KeeperState::SyncConnected);
    }

    #[tokio::test]
    async fn test_watch_is_single_shot() {
        let zk = service();
        zk.create("/g", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let (_, watch) = zk.children_watch("/g").await.unwrap();
        zk.create("/g/c1", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        watch.await.unwrap();
        // A second change finds no armed watch; nothing panics.
        zk.create("/g/c2", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_expire_ephemerals_removes_and_notifies() {
        let zk = service();
        zk.create("/g", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        zk.create("/g/owner", Vec::new(), CreateMode::Ephemeral)
            .await
            .unwrap();
        let (_, watch) = zk.children_watch("/g").await.unwrap();

        zk.expire_ephemerals();
        assert!(zk.get("/g/owner").await.unwrap_err().is_no_node());
        let event = watch.await.unwrap();
        assert_eq!(event.path, "/g");
    }

    #[tokio::test]
    async fn test_fire_disconnect_reaches_all_watches() {
        let zk = service();
        zk.create("/g", Vec::new(), CreateMode::Persistent)
            .await
            .unwrap();
        let (_, w1) = zk.children_watch("/g").await.unwrap();
        let (_, w2) = zk.children_watch("/").await.unwrap();

        zk.fire_disconnect();
        assert_eq!(w1.await.unwrap().state, KeeperState::Disconnected);
        assert_eq!(w2.await.unwrap().state, KeeperState::Disconnected);
    }
}
