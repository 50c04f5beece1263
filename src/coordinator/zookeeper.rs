//! ZooKeeper-backed consumer coordinator
//!
//! [`ZookeeperCoordinator`] implements the full [`ConsumerCoordinator`]
//! contract over an injected [`CoordinationClient`]: ephemeral registration,
//! partition ownership claims, offset persistence, broker/topic discovery
//! and deployment notifications, all sharing one retry harness. The watch
//! multiplexer at the bottom of this file merges the four single-shot
//! child watches into the durable event stream handed to the rebalance
//! loop.

use crate::config::ZookeeperConfig;
use crate::coordinator::client::{
    CoordinationClient, CreateMode, KeeperState, WatchedEvent,
};
use crate::coordinator::paths::{
    parent_path, GroupDirs, GroupTopicDirs, BROKER_IDS_PATH, BROKER_TOPICS_PATH, CONSUMERS_PATH,
};
use crate::coordinator::retry::{retry_claim, retry_request, RetryPolicy};
use crate::coordinator::{ConsumerCoordinator, CoordinatorEvent};
use crate::error::{GrouplineError, Result};
use crate::types::{
    BrokerInfo, ConsumerInfo, ConsumerThreadId, DeployedTopics, TopicAndPartition, TopicInfo,
    TopicsToNumStreams, INVALID_OFFSET,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Idle applied when a watch delivers a spurious empty event.
// TODO(config): lift into ZookeeperConfig once the idle is worth tuning.
const WATCH_IDLE: Duration = Duration::from_secs(2);

/// Capacity of the fan-in channel merging the four child watches
const FANIN_CAPACITY: usize = 16;

/// Capacity of the event stream handed to the rebalance loop
const EVENT_CAPACITY: usize = 32;

/// The four watched state directories of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchSource {
    /// `/consumers/<group>/ids` — member join/leave
    Members,
    /// `/consumers/<group>/changes` — deployment notifications
    Changes,
    /// `/brokers/topics` — topic set change
    Topics,
    /// `/brokers/ids` — broker set change
    Brokers,
}

impl WatchSource {
    const ALL: [WatchSource; 4] = [
        WatchSource::Members,
        WatchSource::Changes,
        WatchSource::Topics,
        WatchSource::Brokers,
    ];

    fn path<'a>(&self, dirs: &'a GroupDirs) -> &'a str {
        match self {
            WatchSource::Members => &dirs.registry_dir,
            WatchSource::Changes => &dirs.changes_dir,
            WatchSource::Topics => BROKER_TOPICS_PATH,
            WatchSource::Brokers => BROKER_IDS_PATH,
        }
    }
}

/// Coordinates consumers of one group through a ZooKeeper-like service.
///
/// Safe to call from multiple tasks concurrently; the underlying client is
/// shared and assumed thread-safe. One coordinator carries at most one
/// active change subscription at a time.
pub struct ZookeeperCoordinator {
    config: ZookeeperConfig,
    client: Arc<dyn CoordinationClient>,
    unsubscribe: Mutex<Option<mpsc::Sender<()>>>,
}

impl ZookeeperCoordinator {
    /// Create a coordinator over `client`. Does not connect; call
    /// [`connect`](ConsumerCoordinator::connect) explicitly.
    pub fn new(config: ZookeeperConfig, client: Arc<dyn CoordinationClient>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            client,
            unsubscribe: Mutex::new(None),
        })
    }

    fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    async fn try_connect(&self) -> Result<()> {
        info!(hosts = ?self.config.connect, "connecting to coordination service");
        self.client
            .connect(&self.config.connect, self.config.session_timeout())
            .await
    }

    async fn try_register_consumer(
        &self,
        consumer_id: &str,
        group: &str,
        topic_count: &TopicsToNumStreams,
    ) -> Result<()> {
        let dirs = GroupDirs::new(group);
        let path = dirs.consumer_path(consumer_id);
        let info = topic_count.to_consumer_info(Utc::now().timestamp());
        let data = serde_json::to_vec(&info)?;
        debug!(consumer_id, group, path = %path, "registering consumer");

        match self
            .client
            .create(&path, data.clone(), CreateMode::Ephemeral)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_no_node() => {
                self.create_or_update_path(&dirs.registry_dir, &[]).await?;
                self.client.create(&path, data, CreateMode::Ephemeral).await
            }
            Err(e) if e.is_node_exists() => {
                let (_, stat) = self.client.get(&path).await?;
                self.client.set(&path, data, stat.version).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_deregister_consumer(&self, consumer_id: &str, group: &str) -> Result<()> {
        let path = GroupDirs::new(group).consumer_path(consumer_id);
        debug!(path = %path, "deregistering consumer");
        let (_, stat) = self.client.get(&path).await?;
        self.client.delete(&path, stat.version).await
    }

    async fn try_get_consumer_info(&self, consumer_id: &str, group: &str) -> Result<ConsumerInfo> {
        let path = GroupDirs::new(group).consumer_path(consumer_id);
        let (data, _) = self.client.get(&path).await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn try_get_consumers_in_group(&self, group: &str) -> Result<Vec<String>> {
        let mut consumers = self
            .client
            .children(&GroupDirs::new(group).registry_dir)
            .await?;
        consumers.sort();
        Ok(consumers)
    }

    async fn try_get_consumers_per_topic(
        &self,
        group: &str,
        exclude_internal: bool,
    ) -> Result<HashMap<String, Vec<ConsumerThreadId>>> {
        let consumers = self.try_get_consumers_in_group(group).await?;

        let mut subscriptions = Vec::with_capacity(consumers.len());
        for consumer in &consumers {
            let info = self.try_get_consumer_info(consumer, group).await?;
            subscriptions.push(TopicsToNumStreams::from_consumer_info(consumer, &info)?);
        }

        let all_topics = if subscriptions.iter().any(TopicsToNumStreams::is_wildcard) {
            self.try_get_all_topics().await?
        } else {
            Vec::new()
        };

        let mut consumers_per_topic: HashMap<String, Vec<ConsumerThreadId>> = HashMap::new();
        for subscription in &subscriptions {
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

    async fn try_get_all_topics(&self) -> Result<Vec<String>> {
        // Arms a topic watch as a side effect; the receiver is owned by the
        // active subscription when one exists, otherwise dropped.
        let (topics, _watch) = self.client.children_watch(BROKER_TOPICS_PATH).await?;
        Ok(topics)
    }

    async fn try_get_partitions_for_topics(
        &self,
        topics: &[String],
    ) -> Result<HashMap<String, Vec<i32>>> {
        let mut result = HashMap::with_capacity(topics.len());
        for topic in topics {
            let info = self.try_get_topic_info(topic).await?;
            result.insert(topic.clone(), info.partition_ids()?);
        }
        Ok(result)
    }

    async fn try_get_topic_info(&self, topic: &str) -> Result<TopicInfo> {
        let (data, _) = self
            .client
            .get(&format!("{BROKER_TOPICS_PATH}/{topic}"))
            .await?;
        Ok(serde_json::from_slice(&data)?)
    }

    async fn try_get_all_brokers(&self) -> Result<Vec<BrokerInfo>> {
        debug!("reading broker registry");
        let ids = self.client.children(BROKER_IDS_PATH).await?;
        let mut brokers = Vec::with_capacity(ids.len());
        for id in ids {
            let broker_id = id.parse::<i32>().map_err(|_| {
                GrouplineError::invalid_data(format!("broker id is not a number: {id}"))
            })?;
            let (data, _) = self
                .client
                .get(&format!("{BROKER_IDS_PATH}/{broker_id}"))
                .await?;
            let mut broker: BrokerInfo = serde_json::from_slice(&data)?;
            broker.id = broker_id;
            brokers.push(broker);
        }
        Ok(brokers)
    }

    async fn try_get_offset(&self, group: &str, tp: &TopicAndPartition) -> Result<i64> {
        let dirs = GroupTopicDirs::new(group, &tp.topic);
        match self.client.get(&dirs.offset_path(tp.partition)).await {
            Ok((data, _)) => {
                let text = String::from_utf8(data).map_err(|_| {
                    GrouplineError::invalid_data(format!("offset for {tp} is not UTF-8"))
                })?;
                text.parse::<i64>().map_err(|_| {
                    GrouplineError::invalid_data(format!("offset for {tp} is not a number: {text}"))
                })
            }
            Err(e) if e.is_no_node() => Ok(INVALID_OFFSET),
            Err(e) => Err(e),
        }
    }

    async fn try_notify_consumer_group(&self, group: &str, consumer_id: &str) -> Result<()> {
        let now_nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = GroupDirs::new(group).notification_path(&format!("{consumer_id}-{now_nanos}"));
        debug!(path = %path, "notifying consumer group");
        self.create_or_update_path(&path, &[]).await
    }

    async fn try_purge_notification(&self, group: &str, notification_id: &str) -> Result<()> {
        let path = GroupDirs::new(group).notification_path(notification_id);
        // Delete if present, succeed if not; the delete may also race a
        // concurrent purge.
        match self.client.get(&path).await {
            Ok((_, stat)) => match self.client.delete(&path, stat.version).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_no_node() => Ok(()),
                Err(e) => Err(e),
            },
            Err(e) if e.is_no_node() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn try_deploy_topics(&self, group: &str, topics: &DeployedTopics) -> Result<()> {
        let data = serde_json::to_vec(topics)?;
        let now_seconds = Utc::now().timestamp();
        let path = GroupDirs::new(group).notification_path(&now_seconds.to_string());
        self.create_or_update_path(&path, &data).await
    }

    async fn try_get_new_deployed_topics(
        &self,
        group: &str,
    ) -> Result<HashMap<String, DeployedTopics>> {
        let dirs = GroupDirs::new(group);
        let children = self.client.children(&dirs.changes_dir).await?;

        let mut deployed = HashMap::with_capacity(children.len());
        for child in children {
            let (data, _) = self.client.get(&dirs.notification_path(&child)).await?;
            let entry: DeployedTopics = serde_json::from_slice(&data)?;
            deployed.insert(child, entry);
        }
        Ok(deployed)
    }

    async fn try_claim_partition(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        thread_id: &ConsumerThreadId,
    ) -> Result<bool> {
        let dirs = GroupTopicDirs::new(group, topic);
        let path = dirs.owner_path(partition);
        let data = thread_id.to_string().into_bytes();

        let attempt = self
            .client
            .create(&path, data.clone(), CreateMode::Ephemeral)
            .await;
        let outcome = match attempt {
            Err(e) if e.is_no_node() => {
                self.create_or_update_path(&dirs.owner_dir, &[]).await?;
                self.client.create(&path, data, CreateMode::Ephemeral).await
            }
            other => other,
        };

        match outcome {
            Ok(()) => {
                debug!(topic, partition, owner = %thread_id, "claimed partition");
                Ok(true)
            }
            Err(e) if e.is_node_exists() => {
                debug!(topic, partition, "partition ownership still held, waiting");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn try_release_partition(&self, group: &str, topic: &str, partition: i32) -> Result<()> {
        let path = GroupTopicDirs::new(group, topic).owner_path(partition);
        let released = match self.client.get(&path).await {
            Ok((_, stat)) => self.client.delete(&path, stat.version).await,
            Err(e) => Err(e),
        };
        match released {
            Ok(()) => Ok(()),
            Err(e) if e.is_no_node() => {
                warn!(topic, partition, "released a partition that was not owned");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Create-or-update a persistent node, auto-creating missing ancestors
    /// with empty data. The only writer of non-ephemeral group structure.
    fn create_or_update_path<'a>(
        &'a self,
        path: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            match self
                .client
                .create(path, data.to_vec(), CreateMode::Persistent)
                .await
            {
                Ok(()) => Ok(()),
                Err(e) if e.is_node_exists() => {
                    if data.is_empty() {
                        Ok(())
                    } else {
                        self.update_record(path, data).await
                    }
                }
                Err(e) if e.is_no_node() => {
                    self.create_or_update_path(parent_path(path), &[]).await?;
                    debug!(path, "created missing ancestors, retrying create");
                    match self
                        .client
                        .create(path, data.to_vec(), CreateMode::Persistent)
                        .await
                    {
                        Ok(()) => Ok(()),
                        // A peer won the race to create this node.
                        Err(e) if e.is_node_exists() => {
                            if data.is_empty() {
                                Ok(())
                            } else {
                                self.update_record(path, data).await
                            }
                        }
                        Err(e) => Err(e),
                    }
                }
                Err(e) => Err(e),
            }
        })
    }

    async fn update_record(&self, path: &str, data: &[u8]) -> Result<()> {
        debug!(path, "updating existing node");
        let (_, stat) = self.client.get(path).await?;
        self.client.set(path, data.to_vec(), stat.version).await
    }

    /// Upsert the per-group directories so child watches succeed on a fresh
    /// group.
    async fn ensure_paths_exist(&self, group: &str) -> Result<()> {
        let dirs = GroupDirs::new(group);
        self.create_or_update_path(CONSUMERS_PATH, &[]).await?;
        self.create_or_update_path(&dirs.group_dir, &[]).await?;
        self.create_or_update_path(&dirs.registry_dir, &[]).await?;
        self.create_or_update_path(&dirs.changes_dir, &[]).await?;
        Ok(())
    }

    async fn try_subscribe_for_changes(
        &self,
        group: &str,
    ) -> Result<mpsc::Receiver<CoordinatorEvent>> {
        self.ensure_paths_exist(group).await?;
        info!(group, "subscribing for coordinator changes");

        let dirs = GroupDirs::new(group);
        let (fanin_tx, fanin_rx) = mpsc::channel(FANIN_CAPACITY);
        for source in WatchSource::ALL {
            arm_watch(&self.client, &dirs, source, &fanin_tx).await?;
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::channel(1);
        *self.unsubscribe.lock() = Some(unsubscribe_tx);

        let client = Arc::clone(&self.client);
        tokio::spawn(run_subscription(
            client,
            dirs,
            fanin_tx,
            fanin_rx,
            unsubscribe_rx,
            events_tx,
        ));

        Ok(events_rx)
    }
}

#[async_trait]
impl ConsumerCoordinator for ZookeeperCoordinator {
    async fn connect(&self) -> Result<()> {
        retry_request(self.policy(), "connect", move || self.try_connect()).await
    }

    async fn register_consumer(
        &self,
        consumer_id: &str,
        group: &str,
        topic_count: &TopicsToNumStreams,
    ) -> Result<()> {
        retry_request(self.policy(), "register_consumer", move || {
            self.try_register_consumer(consumer_id, group, topic_count)
        })
        .await
    }

    async fn deregister_consumer(&self, consumer_id: &str, group: &str) -> Result<()> {
        retry_request(self.policy(), "deregister_consumer", move || {
            self.try_deregister_consumer(consumer_id, group)
        })
        .await
    }

    async fn get_consumer_info(&self, consumer_id: &str, group: &str) -> Result<ConsumerInfo> {
        retry_request(self.policy(), "get_consumer_info", move || {
            self.try_get_consumer_info(consumer_id, group)
        })
        .await
    }

    async fn get_consumers_in_group(&self, group: &str) -> Result<Vec<String>> {
        retry_request(self.policy(), "get_consumers_in_group", move || {
            self.try_get_consumers_in_group(group)
        })
        .await
    }

    async fn get_consumers_per_topic(
        &self,
        group: &str,
        exclude_internal: bool,
    ) -> Result<HashMap<String, Vec<ConsumerThreadId>>> {
        retry_request(self.policy(), "get_consumers_per_topic", move || {
            self.try_get_consumers_per_topic(group, exclude_internal)
        })
        .await
    }

    async fn get_all_topics(&self) -> Result<Vec<String>> {
        retry_request(self.policy(), "get_all_topics", move || self.try_get_all_topics()).await
    }

    async fn get_partitions_for_topics(
        &self,
        topics: &[String],
    ) -> Result<HashMap<String, Vec<i32>>> {
        retry_request(self.policy(), "get_partitions_for_topics", move || {
            self.try_get_partitions_for_topics(topics)
        })
        .await
    }

    async fn get_all_brokers(&self) -> Result<Vec<BrokerInfo>> {
        retry_request(self.policy(), "get_all_brokers", move || self.try_get_all_brokers()).await
    }

    async fn get_offset_for_topic_partition(
        &self,
        group: &str,
        topic_partition: &TopicAndPartition,
    ) -> Result<i64> {
        retry_request(self.policy(), "get_offset_for_topic_partition", move || {
            self.try_get_offset(group, topic_partition)
        })
        .await
    }

    async fn commit_offset(
        &self,
        group: &str,
        topic_partition: &TopicAndPartition,
        offset: i64,
    ) -> Result<()> {
        // Deliberately unretried; the consumer's commit policy owns retries.
        let dirs = GroupTopicDirs::new(group, &topic_partition.topic);
        let path = dirs.offset_path(topic_partition.partition);
        self.create_or_update_path(&path, offset.to_string().as_bytes())
            .await
    }

    async fn notify_consumer_group(&self, group: &str, consumer_id: &str) -> Result<()> {
        retry_request(self.policy(), "notify_consumer_group", move || {
            self.try_notify_consumer_group(group, consumer_id)
        })
        .await
    }

    async fn purge_notification_for_group(
        &self,
        group: &str,
        notification_id: &str,
    ) -> Result<()> {
        retry_request(self.policy(), "purge_notification_for_group", move || {
            self.try_purge_notification(group, notification_id)
        })
        .await
    }

    async fn deploy_topics(&self, group: &str, topics: DeployedTopics) -> Result<()> {
        let topics = &topics;
        retry_request(self.policy(), "deploy_topics", move || {
            self.try_deploy_topics(group, topics)
        })
        .await
    }

    async fn get_new_deployed_topics(
        &self,
        group: &str,
    ) -> Result<HashMap<String, DeployedTopics>> {
        retry_request(self.policy(), "get_new_deployed_topics", move || {
            self.try_get_new_deployed_topics(group)
        })
        .await
    }

    async fn claim_partition_ownership(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
        thread_id: &ConsumerThreadId,
    ) -> Result<bool> {
        retry_claim(self.policy(), "claim_partition_ownership", move || {
            self.try_claim_partition(group, topic, partition, thread_id)
        })
        .await
    }

    async fn release_partition_ownership(
        &self,
        group: &str,
        topic: &str,
        partition: i32,
    ) -> Result<()> {
        retry_request(self.policy(), "release_partition_ownership", move || {
            self.try_release_partition(group, topic, partition)
        })
        .await
    }

    async fn subscribe_for_changes(
        &self,
        group: &str,
    ) -> Result<mpsc::Receiver<CoordinatorEvent>> {
        retry_request(self.policy(), "subscribe_for_changes", move || {
            self.try_subscribe_for_changes(group)
        })
        .await
    }

    async fn unsubscribe(&self) {
        let sender = self.unsubscribe.lock().take();
        if let Some(sender) = sender {
            let _ = sender.send(()).await;
        }
    }
}

/// Arm one single-shot child watch and relay its event into the fan-in.
async fn arm_watch(
    client: &Arc<dyn CoordinationClient>,
    dirs: &GroupDirs,
    source: WatchSource,
    fanin: &mpsc::Sender<(WatchSource, WatchedEvent)>,
) -> Result<()> {
    let (_, receiver) = client.children_watch(source.path(dirs)).await?;
    relay(source, receiver, fanin.clone());
    Ok(())
}

fn relay(
    source: WatchSource,
    receiver: oneshot::Receiver<WatchedEvent>,
    fanin: mpsc::Sender<(WatchSource, WatchedEvent)>,
) {
    tokio::spawn(async move {
        // The sender side disappearing just means the service dropped the
        // watch; the subscription task notices through other sources.
        if let Ok(event) = receiver.await {
            let _ = fanin.send((source, event)).await;
        }
    });
}

/// The subscription task: reads the fan-in, classifies events, re-arms
/// watches. Reader and re-armer stay in one task so re-arming cannot race
/// event delivery.
async fn run_subscription(
    client: Arc<dyn CoordinationClient>,
    dirs: GroupDirs,
    fanin_tx: mpsc::Sender<(WatchSource, WatchedEvent)>,
    mut fanin_rx: mpsc::Receiver<(WatchSource, WatchedEvent)>,
    mut unsubscribe_rx: mpsc::Receiver<()>,
    events_tx: mpsc::Sender<CoordinatorEvent>,
) {
    loop {
        tokio::select! {
            received = fanin_rx.recv() => {
                let Some((source, event)) = received else {
                    return;
                };
                match event.state {
                    KeeperState::Disconnected | KeeperState::Expired => {
                        debug!(group = %dirs.group, "watcher session ended, re-arming all watches");
                        for source in WatchSource::ALL {
                            if let Err(e) = arm_watch(&client, &dirs, source, &fanin_tx).await {
                                error!(group = %dirs.group, ?source, error = %e,
                                    "failed to re-arm watch after session loss, ending subscription");
                                return;
                            }
                        }
                    }
                    KeeperState::SyncConnected if event.is_empty() => {
                        sleep(WATCH_IDLE).await;
                        if let Err(e) = arm_watch(&client, &dirs, source, &fanin_tx).await {
                            error!(group = %dirs.group, ?source, error = %e,
                                "failed to re-arm watch, ending subscription");
                            return;
                        }
                    }
                    KeeperState::SyncConnected => {
                        let coordinator_event = if event.path.starts_with(&dirs.changes_dir) {
                            CoordinatorEvent::NewTopicDeployed
                        } else {
                            CoordinatorEvent::Regular
                        };
                        debug!(group = %dirs.group, path = %event.path, ?coordinator_event, "watch fired");
                        if events_tx.send(coordinator_event).await.is_err() {
                            debug!(group = %dirs.group, "event receiver dropped, ending subscription");
                            return;
                        }
                        if let Err(e) = arm_watch(&client, &dirs, source, &fanin_tx).await {
                            error!(group = %dirs.group, ?source, error = %e,
                                "failed to re-arm watch, ending subscription");
                            return;
                        }
                    }
                }
            }
            _ = unsubscribe_rx.recv() => {
                debug!(group = %dirs.group, "unsubscribed from coordinator changes");
                return;
            }
        }
    }
}
