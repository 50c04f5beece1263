//! Test double for the coordinator contract
//!
//! [`MockCoordinator`] implements [`ConsumerCoordinator`] over plain
//! in-process maps so consumers of this crate can unit-test their rebalance
//! logic without a coordination service. Cluster topology (topics, brokers)
//! is fixed at construction; commit history and ownership are inspectable;
//! events are injected with [`emit`](MockCoordinator::emit).

use crate::coordinator::{ConsumerCoordinator, CoordinatorEvent};
use crate::error::{GrouplineError, Result};
use crate::types::{
    BrokerInfo, ConsumerInfo, ConsumerThreadId, DeployedTopics, TopicAndPartition,
    TopicsToNumStreams, INVALID_OFFSET,
};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

/// See the module docs.
#[derive(Default)]
pub struct MockCoordinator {
    /// (group, consumer id) → registration
    registrations: DashMap<(String, String), ConsumerInfo>,
    /// (group, topic/partition) → last committed offset
    commit_history: DashMap<(String, TopicAndPartition), i64>,
    /// (group, topic/partition) → current owner
    owners: DashMap<(String, TopicAndPartition), ConsumerThreadId>,
    /// (group, notification id) → deployed payload
    deployed: DashMap<(String, String), DeployedTopics>,
    /// topic → sorted partition ids
    topics: DashMap<String, Vec<i32>>,
    brokers: Mutex<Vec<BrokerInfo>>,
    events: Mutex<Option<mpsc::Sender<CoordinatorEvent>>>,
    notification_seq: AtomicU64,
    connected: AtomicBool,
}

impl MockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a topic with the given partition ids
    pub fn with_topic(self, topic: impl Into<String>, mut partitions: Vec<i32>) -> Self {
        partitions.sort_unstable();
        self.topics.insert(topic.into(), partitions);
        self
    }

    /// Declare a broker
    pub fn with_broker(self, broker: BrokerInfo) -> Self {
        self.brokers.lock().push(broker);
        self
    }

    /// Last committed offset for a partition, if any
    pub fn committed(&self, group: &str, topic_partition: &TopicAndPartition) -> Option<i64> {
        self.commit_history
            .get(&(group.to_string(), topic_partition.clone()))
            .map(|entry| *entry)
    }

    /// Current owner of a partition, if any
    pub fn owner_of(
        &self,
        group: &str,
        topic_partition: &TopicAndPartition,
    ) -> Option<ConsumerThreadId> {
        self.owners
            .get(&(group.to_string(), topic_partition.clone()))
            .map(|entry| entry.clone())
    }

    /// Inject an event into the active subscription. Returns false when no
    /// subscriber is listening.
    pub fn emit(&self, event: CoordinatorEvent) -> bool {
        let sender = self.events.lock().clone();
        match sender {
            Some(sender) => sender.try_send(event).is_ok(),
            None => false,
        }
    }

    fn next_notification_id(&self, prefix: &str) -> String {
        let seq = self.notification_seq.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{seq}")
    }
}

#[async_trait]
impl ConsumerCoordinator for MockCoordinator {
    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn register_consumer(
        &self,
        consumer_id: &str,
        group: &str,
        topic_count: &TopicsToNumStreams,
    ) -> Result<()> {
        self.registrations.insert(
            (group.to_string(), consumer_id.to_string()),
            topic_count.to_consumer_info(Utc::now().timestamp()),
        );
        Ok(())
    }

    async fn deregister_consumer(&self, consumer_id: &str, group: &str) -> Result<()> {
        self.registrations
            .remove(&(group.to_string(), consumer_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| GrouplineError::no_node(format!("{group}/{consumer_id}")))
    }

    async fn get_consumer_info(&self, consumer_id: &str, group: &str) -> Result<ConsumerInfo> {
        self.registrations
            .get(&(group.to_string(), consumer_id.to_string()))
            .map(|entry| entry.clone())
            .ok_or_else(|| GrouplineError::no_node(format!("{group}/{consumer_id}")))
    }

    async fn get_consumers_in_group(&self, group: &str) -> Result<Vec<String>> {
        let mut consumers: Vec<String> = self
            .registrations
            .iter()
            .filter(|entry| entry.key().0 == group)
            .map(|entry| entry.key().1.clone())
            .collect();
        consumers.sort();
        Ok(consumers)
    }

    async fn get_consumers_per_topic(
        &self,
        group: &str,
        exclude_internal: bool,
    ) -> Result<HashMap<String, Vec<ConsumerThreadId>>> {
        let all_topics = self.get_all_topics().await?;
        let mut consumers_per_topic: HashMap<String, Vec<ConsumerThreadId>> = HashMap::new();
        for consumer in self.get_consumers_in_group(group).await? {
            let info = self.get_consumer_info(&consumer, group).await?;
            let subscription = TopicsToNumStreams::from_consumer_info(&consumer, &info)?;
            let resolved = subscription.resolve(&all_topics, exclude_internal)?;
            for (topic, threads) in resolved.consumer_thread_ids_per_topic() {
                consumers_per_topic.entry(topic).or_default().extend(threads);
            }
        }
        for threads in consumers_per_topic.values_mut() {
            threads.sort();
        }
        Ok(consumers_per_topic)
    }

    async fn get_all_topics(&self) -> Result<Vec<String>> {
        let mut topics: Vec<String> = self.topics.iter().map(|entry| entry.key().clone()).collect();
        topics.sort();
        Ok(topics)
    }

    async fn get_partitions_for_topics(
        &self,
        topics: &[String],
    ) -> Result<HashMap<String, Vec<i32>>> {
        let mut result = HashMap::with_capacity(topics.len());
        for topic in topics {
            let partitions = self
                .topics
                .get(topic)
                .map(|entry| entry.clone())
                .ok_or_else(|| GrouplineError::no_node(format!("/brokers/topics/{topic}")))?;
            result.insert(topic.clone(), partitions);
        }
        Ok(result)
    }

    async fn get_all_brokers(&self) -> Result<Vec<BrokerInfo>> {
        Ok(self.brokers.lock().clone())
    }

    async fn get_offset_for_topic_partition(
        &self,
        group: &str,
        topic_partition: &TopicAndPartition,
    ) -> Result<i64> {
        Ok(self
            .committed(group, topic_partition)
            .unwrap_or(INVALID_OFFSET))
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic_partition: &TopicAndPartition,
        offset: i64,
    ) -> Result<()> {
        self.commit_history
            .insert((group.to_string(), topic_partition.clone()), offset);
        Ok(())
    }

    async fn notify_consumer_group(&self, group: &str, consumer_id: &str) -> Result<()> {
        let id = self.next_notification_id(consumer_id);
        self.deployed
            .insert((group.to_string(), id), DeployedTopics::default());
        self.emit(CoordinatorEvent::NewTopicDeployed);
        Ok(())
    }

    async fn purge_notification_for_group(
        &self,
        group: &str,
        notification_id: &str,
    ) -> Result<()> {
        self.deployed
            .remove(&(group.to_string(), notification_id.to_string()));
        Ok(())
    }

    async fn deploy_topics(&self, group: &str, topics: DeployedTopics) -> Result<()> {
        let id = self.next_notification_id("deploy");
        self.deployed.insert((group.to_string(), id), topics);
        self.emit(CoordinatorEvent::NewTopicDeployed);
        Ok(())
    }

    async fn get_new_deployed_topics(
        &self,
        group: &str,
    ) -> Result<HashMap<String, DeployedTopics>> {
        Ok(self
            .deployed
            .iter()
            .filter(|entry| entry.key().0 == group)
            .map(|entry| (entry.key().1.clone(), entry.value().clone()))
            .collect())
    }

    async fn claim_partition_ownership(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        thread_id: &ConsumerThreadId,
    ) -> Result<bool> {
        let key = (group.to_string(), TopicAndPartition::new(topic, partition));
        match self.owners.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(thread_id.clone());
                Ok(true)
            }
        }
    }

    async fn release_partition_ownership(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<()> {
        self.owners
            .remove(&(group.to_string(), TopicAndPartition::new(topic, partition)));
        Ok(())
    }

    async fn subscribe_for_changes(
        &self,
        _group: &str,
    ) -> Result<mpsc::Receiver<CoordinatorEvent>> {
        let (sender, receiver) = mpsc::channel(32);
        *self.events.lock() = Some(sender);
        Ok(receiver)
    }

    async fn unsubscribe(&self) {
        self.events.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subscription(consumer_id: &str, topic: &str, streams: usize) -> TopicsToNumStreams {
        let mut counts = HashMap::new();
        counts.insert(topic.to_string(), streams);
        TopicsToNumStreams::static_subscription(consumer_id, counts)
    }

    #[tokio::test]
    async fn test_commit_history_is_inspectable() {
        let mock = MockCoordinator::new();
        let tp = TopicAndPartition::new("orders", 0);
        mock.commit_offset("g", &tp, 7).await.unwrap();
        assert_eq!(mock.committed("g", &tp), Some(7));
        assert_eq!(mock.get_offset_for_topic_partition("g", &tp).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_missing_offset_is_invalid() {
        let mock = MockCoordinator::new();
        let tp = TopicAndPartition::new("orders", 3);
        assert_eq!(
            mock.get_offset_for_topic_partition("g", &tp).await.unwrap(),
            INVALID_OFFSET
        );
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let mock = MockCoordinator::new();
        let first = ConsumerThreadId::new("c1", 0);
        let second = ConsumerThreadId::new("c2", 0);

        assert!(mock.claim_partition_ownership("g", "orders", 0, &first).await.unwrap());
        assert!(!mock.claim_partition_ownership("g", "orders", 0, &second).await.unwrap());
        assert_eq!(
            mock.owner_of("g", &TopicAndPartition::new("orders", 0)),
            Some(first)
        );

        mock.release_partition_ownership("g", "orders", 0).await.unwrap();
        assert!(mock.claim_partition_ownership("g", "orders", 0, &second).await.unwrap());
    }

    #[tokio::test]
    async fn test_membership_and_per_topic_view() {
        let mock = MockCoordinator::new().with_topic("orders", vec![0, 1]);
        mock.register_consumer("c2", "g", &subscription("c2", "orders", 1))
            .await
            .unwrap();
        mock.register_consumer("c1", "g", &subscription("c1", "orders", 2))
            .await
            .unwrap();

        assert_eq!(mock.get_consumers_in_group("g").await.unwrap(), vec!["c1", "c2"]);

        let per_topic = mock.get_consumers_per_topic("g", false).await.unwrap();
        let threads = per_topic.get("orders").unwrap();
        assert_eq!(
            threads.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            vec!["c1-0", "c1-1", "c2-0"]
        );
    }

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let mock = MockCoordinator::new();
        let mut events = mock.subscribe_for_changes("g").await.unwrap();
        assert!(mock.emit(CoordinatorEvent::Regular));
        assert_eq!(events.recv().await, Some(CoordinatorEvent::Regular));

        mock.unsubscribe().await;
        assert!(!mock.emit(CoordinatorEvent::Regular));
    }

    #[tokio::test]
    async fn test_deploy_roundtrip() {
        let mock = MockCoordinator::new();
        let deployed = DeployedTopics {
            topics: "orders".to_string(),
            pattern: "static".to_string(),
        };
        mock.deploy_topics("g", deployed.clone()).await.unwrap();

        let notifications = mock.get_new_deployed_topics("g").await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert!(notifications.values().any(|entry| *entry == deployed));
    }
}
