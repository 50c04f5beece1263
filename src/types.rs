//! Domain entities shared across the coordination core
//!
//! The JSON shapes here are wire-compatible with the existing consumer
//! ecosystem: registrations, broker and topic descriptors, and deployed-topic
//! notifications all round-trip through the coordination service unchanged.
//! Unknown fields are ignored on read.

use crate::error::{GrouplineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sentinel offset meaning "no offset stored for this partition"
pub const INVALID_OFFSET: i64 = -1;

/// Topics whose name starts with this prefix are internal to the broker
/// (e.g. `__consumer_offsets`) and excluded from subscription resolution
/// when requested.
const INTERNAL_TOPIC_PREFIX: &str = "__";

/// Consumer registration payload.
///
/// Persisted as an ephemeral node under `/consumers/<group>/ids/<consumerId>`;
/// its lifetime equals the consumer's coordination-service session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    /// Registration format version
    pub version: i16,

    /// Subscribed topics (or wildcard patterns) mapped to stream counts
    pub subscription: HashMap<String, usize>,

    /// Subscription pattern: `"static"`, `"white_list"` or `"black_list"`
    pub pattern: String,

    /// Registration time, unix seconds
    pub timestamp: i64,
}

/// Broker descriptor published under `/brokers/ids/<id>`.
///
/// Read-only for this core; `id` is injected from the node name, so the
/// payload itself may omit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    /// Broker id, taken from the registry node name
    #[serde(default)]
    pub id: i32,

    /// Advertised host
    pub host: String,

    /// Advertised port
    pub port: u16,
}

impl fmt::Display for BrokerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// Topic descriptor published under `/brokers/topics/<topic>`.
///
/// Partition keys are decimal strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicInfo {
    /// Partition id (decimal string) to replica broker ids
    pub partitions: HashMap<String, Vec<i32>>,
}

impl TopicInfo {
    /// Partition ids parsed from the wire keys, sorted ascending
    pub fn partition_ids(&self) -> Result<Vec<i32>> {
        let mut ids = Vec::with_capacity(self.partitions.len());
        for key in self.partitions.keys() {
            let id = key.parse::<i32>().map_err(|_| {
                GrouplineError::invalid_data(format!("partition id is not a number: {key}"))
            })?;
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

/// A topic/partition pair. Equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicAndPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicAndPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicAndPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A logical consumption stream within a consumer instance; the unit of
/// partition assignment.
///
/// The derived ordering (lexicographic on `consumer`, then numeric on
/// `thread_id`) is load-bearing: assignors and ownership records depend on
/// every peer sorting thread ids identically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerThreadId {
    pub consumer: String,
    pub thread_id: usize,
}

impl ConsumerThreadId {
    pub fn new(consumer: impl Into<String>, thread_id: usize) -> Self {
        Self {
            consumer: consumer.into(),
            thread_id,
        }
    }
}

impl fmt::Display for ConsumerThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.consumer, self.thread_id)
    }
}

/// How a consumer's subscription map is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionPattern {
    /// Subscription keys are literal topic names
    Static,
    /// Subscription keys are regex patterns; matching topics are consumed
    WhiteList,
    /// Subscription keys are regex patterns; matching topics are skipped
    BlackList,
}

impl SubscriptionPattern {
    /// Wire form of the pattern
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::WhiteList => "white_list",
            Self::BlackList => "black_list",
        }
    }

    /// Parse the wire form
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "static" => Ok(Self::Static),
            "white_list" => Ok(Self::WhiteList),
            "black_list" => Ok(Self::BlackList),
            other => Err(GrouplineError::invalid_data(format!(
                "unknown subscription pattern: {other}"
            ))),
        }
    }
}

impl fmt::Display for SubscriptionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A consumer's subscription: topics (or patterns) mapped to stream counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicsToNumStreams {
    consumer_id: String,
    counts: HashMap<String, usize>,
    pattern: SubscriptionPattern,
}

impl TopicsToNumStreams {
    /// A static subscription over literal topic names
    pub fn static_subscription(
        consumer_id: impl Into<String>,
        counts: HashMap<String, usize>,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            counts,
            pattern: SubscriptionPattern::Static,
        }
    }

    /// A wildcard subscription; keys of `counts` are regex patterns
    pub fn wildcard_subscription(
        consumer_id: impl Into<String>,
        counts: HashMap<String, usize>,
        pattern: SubscriptionPattern,
    ) -> Self {
        Self {
            consumer_id: consumer_id.into(),
            counts,
            pattern,
        }
    }

    /// Rebuild a subscription from a stored registration
    pub fn from_consumer_info(consumer_id: impl Into<String>, info: &ConsumerInfo) -> Result<Self> {
        Ok(Self {
            consumer_id: consumer_id.into(),
            counts: info.subscription.clone(),
            pattern: SubscriptionPattern::parse(&info.pattern)?,
        })
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn counts(&self) -> &HashMap<String, usize> {
        &self.counts
    }

    pub fn pattern(&self) -> SubscriptionPattern {
        self.pattern
    }

    /// True when the subscription keys are patterns rather than topic names
    pub fn is_wildcard(&self) -> bool {
        !matches!(self.pattern, SubscriptionPattern::Static)
    }

    /// Resolve a wildcard subscription against the topics currently known to
    /// the cluster, yielding a static subscription over concrete names.
    ///
    /// Static subscriptions pass through unchanged apart from internal-topic
    /// filtering. Each subscription entry is applied independently; the first
    /// matching entry (in sorted pattern order) wins for a given topic.
    pub fn resolve(&self, all_topics: &[String], exclude_internal: bool) -> Result<Self> {
        let keep = |topic: &str| !(exclude_internal && topic.starts_with(INTERNAL_TOPIC_PREFIX));

        let counts = match self.pattern {
            SubscriptionPattern::Static => self
                .counts
                .iter()
                .filter(|(topic, _)| keep(topic))
                .map(|(topic, count)| (topic.clone(), *count))
                .collect(),
            SubscriptionPattern::WhiteList | SubscriptionPattern::BlackList => {
                let mut patterns: Vec<(&String, usize)> =
                    self.counts.iter().map(|(p, c)| (p, *c)).collect();
                patterns.sort_by(|a, b| a.0.cmp(b.0));

                let mut resolved = HashMap::new();
                for (pattern, count) in patterns {
                    let re = Regex::new(pattern).map_err(|e| {
                        GrouplineError::invalid_data(format!(
                            "bad subscription pattern {pattern}: {e}"
                        ))
                    })?;
                    for topic in all_topics {
                        if !keep(topic) {
                            continue;
                        }
                        let matches = re.is_match(topic);
                        let wanted = match self.pattern {
                            SubscriptionPattern::WhiteList => matches,
                            _ => !matches,
                        };
                        if wanted {
                            resolved.entry(topic.clone()).or_insert(count);
                        }
                    }
                }
                resolved
            }
        };

        Ok(Self {
            consumer_id: self.consumer_id.clone(),
            counts,
            pattern: SubscriptionPattern::Static,
        })
    }

    /// Thread ids this consumer contributes, per topic, sorted ascending.
    ///
    /// A topic with stream count `n` yields threads `<consumer>-0` through
    /// `<consumer>-(n-1)`.
    pub fn consumer_thread_ids_per_topic(&self) -> HashMap<String, Vec<ConsumerThreadId>> {
        make_consumer_thread_ids_per_topic(&self.consumer_id, &self.counts)
    }

    /// Registration payload for this subscription
    pub fn to_consumer_info(&self, timestamp: i64) -> ConsumerInfo {
        ConsumerInfo {
            version: 1,
            subscription: self.counts.clone(),
            pattern: self.pattern.as_str().to_string(),
            timestamp,
        }
    }
}

/// Expand a topic-to-stream-count map into per-topic sorted thread id lists
pub fn make_consumer_thread_ids_per_topic(
    consumer_id: &str,
    counts: &HashMap<String, usize>,
) -> HashMap<String, Vec<ConsumerThreadId>> {
    let mut result = HashMap::with_capacity(counts.len());
    for (topic, &count) in counts {
        let mut threads: Vec<ConsumerThreadId> = (0..count)
            .map(|thread_id| ConsumerThreadId::new(consumer_id, thread_id))
            .collect();
        threads.sort();
        result.insert(topic.clone(), threads);
    }
    result
}

/// Notification payload announcing newly deployed topics to a group.
///
/// Opaque to the core beyond JSON round-trip: the surrounding consumer
/// decides what "deployed" means.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedTopics {
    /// Comma-separated topic names (or a pattern, per `pattern`)
    pub topics: String,

    /// How `topics` is to be interpreted by the consuming side
    pub pattern: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_thread_id_ordering() {
        let mut ids = vec![
            ConsumerThreadId::new("c2", 0),
            ConsumerThreadId::new("c1", 1),
            ConsumerThreadId::new("c1", 0),
            ConsumerThreadId::new("c10", 2),
        ];
        ids.sort();
        assert_eq!(
            ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
            vec!["c1-0", "c1-1", "c10-2", "c2-0"]
        );
    }

    #[test]
    fn test_consumer_thread_id_display() {
        assert_eq!(ConsumerThreadId::new("consumer-a", 3).to_string(), "consumer-a-3");
    }

    #[test]
    fn test_thread_ids_per_topic_sorted() {
        let mut counts = HashMap::new();
        counts.insert("orders".to_string(), 3);
        let subscription = TopicsToNumStreams::static_subscription("c1", counts);

        let per_topic = subscription.consumer_thread_ids_per_topic();
        let threads = per_topic.get("orders").unwrap();
        assert_eq!(threads.len(), 3);
        assert_eq!(threads[0], ConsumerThreadId::new("c1", 0));
        assert_eq!(threads[2], ConsumerThreadId::new("c1", 2));
    }

    #[test]
    fn test_topic_info_partition_ids() {
        let mut partitions = HashMap::new();
        partitions.insert("2".to_string(), vec![1, 2]);
        partitions.insert("0".to_string(), vec![1]);
        partitions.insert("1".to_string(), vec![2]);
        let info = TopicInfo { partitions };
        assert_eq!(info.partition_ids().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_topic_info_rejects_bad_partition_key() {
        let mut partitions = HashMap::new();
        partitions.insert("zero".to_string(), vec![1]);
        let info = TopicInfo { partitions };
        assert!(info.partition_ids().is_err());
    }

    #[test]
    fn test_consumer_info_roundtrip_ignores_unknown_fields() {
        let raw = r#"{"version":1,"subscription":{"orders":2},"pattern":"static","timestamp":1700000000,"future_field":true}"#;
        let info: ConsumerInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(info.subscription.get("orders"), Some(&2));
        assert_eq!(info.pattern, "static");
    }

    #[test]
    fn test_white_list_resolution() {
        let mut counts = HashMap::new();
        counts.insert("^orders-.*".to_string(), 2);
        let subscription = TopicsToNumStreams::wildcard_subscription(
            "c1",
            counts,
            SubscriptionPattern::WhiteList,
        );

        let topics = vec![
            "orders-eu".to_string(),
            "orders-us".to_string(),
            "payments".to_string(),
            "__consumer_offsets".to_string(),
        ];
        let resolved = subscription.resolve(&topics, true).unwrap();
        assert_eq!(resolved.pattern(), SubscriptionPattern::Static);
        assert_eq!(resolved.counts().len(), 2);
        assert_eq!(resolved.counts().get("orders-eu"), Some(&2));
        assert!(!resolved.counts().contains_key("payments"));
    }

    #[test]
    fn test_black_list_resolution_keeps_non_matching() {
        let mut counts = HashMap::new();
        counts.insert("^audit-.*".to_string(), 1);
        let subscription = TopicsToNumStreams::wildcard_subscription(
            "c1",
            counts,
            SubscriptionPattern::BlackList,
        );

        let topics = vec!["audit-log".to_string(), "orders".to_string()];
        let resolved = subscription.resolve(&topics, false).unwrap();
        assert!(!resolved.counts().contains_key("audit-log"));
        assert_eq!(resolved.counts().get("orders"), Some(&1));
    }

    #[test]
    fn test_static_resolution_filters_internal_topics() {
        let mut counts = HashMap::new();
        counts.insert("orders".to_string(), 1);
        counts.insert("__consumer_offsets".to_string(), 1);
        let subscription = TopicsToNumStreams::static_subscription("c1", counts);

        let resolved = subscription.resolve(&[], true).unwrap();
        assert_eq!(resolved.counts().len(), 1);
        assert!(resolved.counts().contains_key("orders"));
    }

    #[test]
    fn test_deployed_topics_roundtrip() {
        let deployed = DeployedTopics {
            topics: "orders,payments".to_string(),
            pattern: "static".to_string(),
        };
        let raw = serde_json::to_string(&deployed).unwrap();
        let parsed: DeployedTopics = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, deployed);
    }
}
