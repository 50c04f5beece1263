//! Consumer-group coordination
//!
//! This module is the client side of group membership: it registers the
//! local consumer with the coordination service, reads the cluster view
//! that feeds the [assignment engine](crate::assignment), claims partition
//! ownership, records offsets, and turns coordination-service watches into
//! a single rebalance-trigger stream.
//!
//! [`ConsumerCoordinator`] is the public contract; [`ZookeeperCoordinator`]
//! is the production implementation over a [`CoordinationClient`].
//! [`MockCoordinator`] is a test double for consumers of this crate, and
//! [`InMemoryCoordination`] stands in for the wire library in tests.

pub mod client;
pub mod memory;
pub mod mock;
pub mod paths;
pub(crate) mod retry;
pub mod zookeeper;

pub use client::{CoordinationClient, CreateMode, KeeperState, NodeStat, WatchedEvent};
pub use memory::InMemoryCoordination;
pub use mock::MockCoordinator;
pub use paths::{GroupDirs, GroupTopicDirs, BROKER_IDS_PATH, BROKER_TOPICS_PATH, CONSUMERS_PATH};
pub use zookeeper::ZookeeperCoordinator;

use crate::error::Result;
use crate::types::{BrokerInfo, ConsumerInfo, ConsumerThreadId, DeployedTopics, TopicAndPartition, TopicsToNumStreams};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// An event that should trigger a rebalance in the surrounding consumer loop.
///
/// Duplicates are possible: one membership change may surface as several
/// events in rapid succession, so consumers must be idempotent under
/// repeated [`Regular`](CoordinatorEvent::Regular).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Membership, topic or broker topology changed
    Regular,
    /// A new-topic deployment notification was published for the group
    NewTopicDeployed,
}

/// The coordination contract consumed by the rebalance loop.
///
/// Implementations must be callable from multiple tasks concurrently. All
/// operations except `commit_offset` are retried internally per the
/// configured retry budget.
#[async_trait]
pub trait ConsumerCoordinator: Send + Sync {
    /// Establish a coordination-service session
    async fn connect(&self) -> Result<()>;

    /// Publish the local consumer's ephemeral registration. An existing
    /// registration node is overwritten in place.
    async fn register_consumer(
        &self,
        consumer_id: &str,
        group: &str,
        topic_count: &TopicsToNumStreams,
    ) -> Result<()>;

    /// Remove the local consumer's registration
    async fn deregister_consumer(&self, consumer_id: &str, group: &str) -> Result<()>;

    /// Read one member's registration
    async fn get_consumer_info(&self, consumer_id: &str, group: &str) -> Result<ConsumerInfo>;

    /// Member ids of a group, sorted ascending
    async fn get_consumers_in_group(&self, group: &str) -> Result<Vec<String>>;

    /// All members' thread ids folded per topic, each list sorted by
    /// [`ConsumerThreadId`] order
    async fn get_consumers_per_topic(
        &self,
        group: &str,
        exclude_internal: bool,
    ) -> Result<HashMap<String, Vec<ConsumerThreadId>>>;

    /// All topics known to the cluster (also arms a topic watch)
    async fn get_all_topics(&self) -> Result<Vec<String>>;

    /// Partition ids per topic, sorted ascending
    async fn get_partitions_for_topics(
        &self,
        topics: &[String],
    ) -> Result<HashMap<String, Vec<i32>>>;

    /// All brokers currently registered
    async fn get_all_brokers(&self) -> Result<Vec<BrokerInfo>>;

    /// Last committed offset for a partition, or
    /// [`INVALID_OFFSET`](crate::types::INVALID_OFFSET) when none is stored
    async fn get_offset_for_topic_partition(
        &self,
        group: &str,
        topic_partition: &TopicAndPartition,
    ) -> Result<i64>;

    /// Durably record a consumed offset. Not retried here; the caller owns
    /// the commit retry policy.
    async fn commit_offset(
        &self,
        group: &str,
        topic_partition: &TopicAndPartition,
        offset: i64,
    ) -> Result<()>;

    /// Publish an empty change notification from `consumer_id`
    async fn notify_consumer_group(&self, group: &str, consumer_id: &str) -> Result<()>;

    /// Delete a change notification; a missing notification is a success
    async fn purge_notification_for_group(&self, group: &str, notification_id: &str)
        -> Result<()>;

    /// Publish a deployed-topics notification for the group
    async fn deploy_topics(&self, group: &str, topics: DeployedTopics) -> Result<()>;

    /// All pending deployed-topics notifications, keyed by notification id
    async fn get_new_deployed_topics(&self, group: &str)
        -> Result<HashMap<String, DeployedTopics>>;

    /// Attempt to take exclusive ownership of a partition for `thread_id`.
    /// `Ok(false)` means another thread holds it; wait and retry later.
    async fn claim_partition_ownership(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        thread_id: &ConsumerThreadId,
    ) -> Result<bool>;

    /// Release partition ownership; releasing an unowned partition succeeds
    async fn release_partition_ownership(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<()>;

    /// Subscribe to every change that should trigger a rebalance for the
    /// group. See the module docs for ordering and duplication caveats.
    async fn subscribe_for_changes(
        &self,
        group: &str,
    ) -> Result<mpsc::Receiver<CoordinatorEvent>>;

    /// Cooperatively stop the active subscription task
    async fn unsubscribe(&self);
}
