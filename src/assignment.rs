//! Partition assignment strategies for consumer groups
//!
//! Assignors are pure: given an [`AssignmentContext`] snapshot of the
//! cluster view, they compute the partitions the *local* consumer's threads
//! should claim. Every peer runs the same algorithm on the same snapshot,
//! so outputs across peers are disjoint and together cover every partition.
//!
//! Two strategies are provided:
//!
//! - [`RangeAssignor`] (`"range"`): per-topic contiguous ranges. Partitions
//!   are laid out in numeric order, consumer threads in thread-id order,
//!   and each thread takes `|P| / |C|` partitions; the first `|P| mod |C|`
//!   threads take one extra.
//! - [`RoundRobinAssignor`] (`"roundrobin"`): all partitions of all topics
//!   are shuffled deterministically and dealt round-robin across the
//!   canonical thread list. Requires every consumer to subscribe to the
//!   same topics with the same stream counts.

use crate::coordinator::ConsumerCoordinator;
use crate::error::{GrouplineError, Result};
use crate::types::{ConsumerThreadId, TopicAndPartition, TopicsToNumStreams};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::hash::Hasher;
use tracing::{debug, warn};
use twox_hash::XxHash64;

/// Wire name of the range strategy
pub const RANGE_STRATEGY: &str = "range";

/// Wire name of the round-robin strategy
pub const ROUND_ROBIN_STRATEGY: &str = "roundrobin";

/// Snapshot of the cluster view feeding an assignor.
///
/// `partitions_for_topic` lists are sorted ascending by partition id;
/// `consumers_for_topic` lists are sorted by [`ConsumerThreadId`] order.
/// Both properties are established by the coordinator reads and relied on
/// by the assignors.
#[derive(Debug, Clone)]
pub struct AssignmentContext {
    /// The local consumer
    pub consumer_id: String,
    /// The consumer group
    pub group: String,
    /// The local consumer's thread ids, per subscribed topic
    pub my_topic_thread_ids: HashMap<String, Vec<ConsumerThreadId>>,
    /// The local consumer's subscription
    pub my_topic_to_num_streams: TopicsToNumStreams,
    /// Partition ids per topic, sorted ascending
    pub partitions_for_topic: HashMap<String, Vec<i32>>,
    /// All members' thread ids per topic, sorted
    pub consumers_for_topic: HashMap<String, Vec<ConsumerThreadId>>,
    /// All member ids in the group, sorted
    pub consumers: Vec<String>,
}

impl AssignmentContext {
    /// Snapshot the cluster view through a coordinator.
    pub async fn gather(
        group: &str,
        consumer_id: &str,
        exclude_internal: bool,
        coordinator: &dyn ConsumerCoordinator,
    ) -> Result<Self> {
        let info = coordinator.get_consumer_info(consumer_id, group).await?;
        let subscription = TopicsToNumStreams::from_consumer_info(consumer_id, &info)?;
        let resolved = if subscription.is_wildcard() {
            let all_topics = coordinator.get_all_topics().await?;
            subscription.resolve(&all_topics, exclude_internal)?
        } else {
            subscription.resolve(&[], exclude_internal)?
        };

        let my_topic_thread_ids = resolved.consumer_thread_ids_per_topic();
        let topics: Vec<String> = my_topic_thread_ids.keys().cloned().collect();
        let partitions_for_topic = coordinator.get_partitions_for_topics(&topics).await?;
        let consumers_for_topic = coordinator
            .get_consumers_per_topic(group, exclude_internal)
            .await?;
        let consumers = coordinator.get_consumers_in_group(group).await?;

        Ok(Self {
            consumer_id: consumer_id.to_string(),
            group: group.to_string(),
            my_topic_thread_ids,
            my_topic_to_num_streams: resolved,
            partitions_for_topic,
            consumers_for_topic,
            consumers,
        })
    }

    /// Build a context from a fixed membership and topic map, without
    /// touching a coordinator. Every member is assumed to run the same
    /// subscription shape as the local consumer.
    pub fn new_static(
        group: &str,
        consumer_id: &str,
        consumers_in_group: &[String],
        topic_count: &TopicsToNumStreams,
        partitions_for_topic: HashMap<String, Vec<i32>>,
    ) -> Self {
        let counts = topic_count.counts();
        let fallback_streams = counts.values().copied().max().unwrap_or(1);

        let mut consumers_for_topic: HashMap<String, Vec<ConsumerThreadId>> = HashMap::new();
        for topic in partitions_for_topic.keys() {
            let streams = counts.get(topic).copied().unwrap_or(fallback_streams);
            let mut threads = Vec::with_capacity(consumers_in_group.len() * streams);
            for consumer in consumers_in_group {
                threads.extend((0..streams).map(|t| ConsumerThreadId::new(consumer.clone(), t)));
            }
            threads.sort();
            consumers_for_topic.insert(topic.clone(), threads);
        }

        Self {
            consumer_id: consumer_id.to_string(),
            group: group.to_string(),
            my_topic_thread_ids: topic_count.consumer_thread_ids_per_topic(),
            my_topic_to_num_streams: topic_count.clone(),
            partitions_for_topic,
            consumers_for_topic,
            consumers: consumers_in_group.to_vec(),
        }
    }
}

/// A partition assignment strategy
pub trait PartitionAssignor: Send + Sync {
    /// Wire name of the strategy
    fn name(&self) -> &'static str;

    /// Compute the local consumer's ownership decision
    fn assign(
        &self,
        context: &AssignmentContext,
    ) -> Result<HashMap<TopicAndPartition, ConsumerThreadId>>;
}

/// Look up an assignor by its wire name. Unknown names are a fatal
/// configuration error.
pub fn assignor_for(strategy: &str) -> Result<Box<dyn PartitionAssignor>> {
    match strategy {
        RANGE_STRATEGY => Ok(Box::new(RangeAssignor)),
        ROUND_ROBIN_STRATEGY => Ok(Box::new(RoundRobinAssignor)),
        other => Err(GrouplineError::configuration(format!(
            "invalid partition assignment strategy: {other}"
        ))),
    }
}

/// Range assignment strategy (`"range"`). See the module docs.
pub struct RangeAssignor;

impl PartitionAssignor for RangeAssignor {
    fn name(&self) -> &'static str {
        RANGE_STRATEGY
    }

    fn assign(
        &self,
        context: &AssignmentContext,
    ) -> Result<HashMap<TopicAndPartition, ConsumerThreadId>> {
        let mut decision = HashMap::new();
        let empty: Vec<i32> = Vec::new();

        let mut topics: Vec<&String> = context.my_topic_thread_ids.keys().collect();
        topics.sort();

        for topic in topics {
            let thread_ids = &context.my_topic_thread_ids[topic];
            let consumers = context
                .consumers_for_topic
                .get(topic)
                .filter(|threads| !threads.is_empty())
                .ok_or_else(|| {
                    GrouplineError::configuration(format!("no consumers for topic {topic}"))
                })?;
            let partitions = context.partitions_for_topic.get(topic).unwrap_or(&empty);

            let n_per_consumer = partitions.len() / consumers.len();
            let extra = partitions.len() % consumers.len();
            debug!(
                group = %context.group,
                topic = %topic,
                partitions = partitions.len(),
                consumers = consumers.len(),
                "computing range assignment"
            );

            for thread_id in thread_ids {
                let position = consumers
                    .iter()
                    .position(|candidate| candidate == thread_id)
                    .ok_or_else(|| {
                        GrouplineError::configuration(format!(
                            "thread {thread_id} is not among the consumers for topic {topic}"
                        ))
                    })?;

                let start = n_per_consumer * position + position.min(extra);
                let count = n_per_consumer + usize::from(position < extra);
                if count == 0 {
                    warn!(
                        group = %context.group,
                        topic = %topic,
                        thread = %thread_id,
                        "no partitions for consumer thread"
                    );
                    continue;
                }

                for partition in &partitions[start..start + count] {
                    debug!(topic = %topic, partition, thread = %thread_id, "assigning partition");
                    decision.insert(
                        TopicAndPartition::new(topic.clone(), *partition),
                        thread_id.clone(),
                    );
                }
            }
        }

        Ok(decision)
    }
}

/// Round-robin assignment strategy (`"roundrobin"`). See the module docs.
///
/// The shuffle is seeded from the context itself, so every peer derives the
/// same permutation without coordination.
pub struct RoundRobinAssignor;

impl PartitionAssignor for RoundRobinAssignor {
    fn name(&self) -> &'static str {
        ROUND_ROBIN_STRATEGY
    }

    fn assign(
        &self,
        context: &AssignmentContext,
    ) -> Result<HashMap<TopicAndPartition, ConsumerThreadId>> {
        let mut decision = HashMap::new();

        let Some(head_threads) = context.consumers_for_topic.values().next() else {
            return Ok(decision);
        };
        for threads in context.consumers_for_topic.values() {
            if threads != head_threads {
                return Err(GrouplineError::configuration(
                    "round-robin assignment requires all consumers in the group to subscribe \
                     to the same topics with identical stream counts",
                ));
            }
        }
        if head_threads.is_empty() {
            return Ok(decision);
        }

        let mut sequence: Vec<TopicAndPartition> = context
            .partitions_for_topic
            .iter()
            .flat_map(|(topic, partitions)| {
                partitions
                    .iter()
                    .map(|partition| TopicAndPartition::new(topic.clone(), *partition))
            })
            .collect();
        sequence.sort();

        let seed = shuffle_seed(&sequence, head_threads);
        let mut rng = StdRng::seed_from_u64(seed);
        sequence.shuffle(&mut rng);

        let mut threads = head_threads.iter().cycle();
        for topic_partition in sequence {
            if let Some(thread_id) = threads.next() {
                if thread_id.consumer == context.consumer_id {
                    debug!(tp = %topic_partition, thread = %thread_id, "assigning partition");
                    decision.insert(topic_partition, thread_id.clone());
                }
            }
        }

        Ok(decision)
    }
}

/// Shuffle seed as a pure function of the context: every peer sees the same
/// sorted partition sequence and canonical thread list, hence derives the
/// same permutation.
fn shuffle_seed(sequence: &[TopicAndPartition], threads: &[ConsumerThreadId]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    for topic_partition in sequence {
        hasher.write(topic_partition.topic.as_bytes());
        hasher.write_i32(topic_partition.partition);
    }
    for thread in threads {
        hasher.write(thread.consumer.as_bytes());
        hasher.write_u64(thread.thread_id as u64);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_context(
        consumer_id: &str,
        consumers: &[&str],
        streams: usize,
        topics: &[(&str, Vec<i32>)],
    ) -> AssignmentContext {
        let consumers: Vec<String> = consumers.iter().map(|c| c.to_string()).collect();
        let mut counts = HashMap::new();
        let mut partitions_for_topic = HashMap::new();
        for (topic, partitions) in topics {
            counts.insert(topic.to_string(), streams);
            partitions_for_topic.insert(topic.to_string(), partitions.clone());
        }
        let topic_count = TopicsToNumStreams::static_subscription(consumer_id, counts);
        AssignmentContext::new_static(
            "test-group",
            consumer_id,
            &consumers,
            &topic_count,
            partitions_for_topic,
        )
    }

    fn owner(
        decision: &HashMap<TopicAndPartition, ConsumerThreadId>,
        topic: &str,
        partition: i32,
    ) -> String {
        decision
            .get(&TopicAndPartition::new(topic, partition))
            .map(|thread| thread.to_string())
            .unwrap_or_default()
    }

    #[test]
    fn test_range_even_split() {
        let assignor = RangeAssignor;

        let c0 = static_context("c0", &["c0", "c1"], 1, &[("t", vec![0, 1, 2, 3])]);
        let decision = assignor.assign(&c0).unwrap();
        assert_eq!(decision.len(), 2);
        assert_eq!(owner(&decision, "t", 0), "c0-0");
        assert_eq!(owner(&decision, "t", 1), "c0-0");

        let c1 = static_context("c1", &["c0", "c1"], 1, &[("t", vec![0, 1, 2, 3])]);
        let decision = assignor.assign(&c1).unwrap();
        assert_eq!(decision.len(), 2);
        assert_eq!(owner(&decision, "t", 2), "c1-0");
        assert_eq!(owner(&decision, "t", 3), "c1-0");
    }

    #[test]
    fn test_range_uneven_split() {
        let assignor = RangeAssignor;

        let c1 = static_context("C1", &["C1", "C2"], 2, &[("t", vec![0, 1, 2, 3, 4])]);
        let decision = assignor.assign(&c1).unwrap();
        assert_eq!(owner(&decision, "t", 0), "C1-0");
        assert_eq!(owner(&decision, "t", 1), "C1-0");
        assert_eq!(owner(&decision, "t", 2), "C1-1");

        let c2 = static_context("C2", &["C1", "C2"], 2, &[("t", vec![0, 1, 2, 3, 4])]);
        let decision = assignor.assign(&c2).unwrap();
        assert_eq!(owner(&decision, "t", 3), "C2-0");
        assert_eq!(owner(&decision, "t", 4), "C2-1");
    }

    #[test]
    fn test_range_exact_multiple_gives_equal_counts() {
        let assignor = RangeAssignor;
        let context = static_context("c0", &["c0", "c1", "c2"], 2, &[("t", (0..12).collect())]);
        let decision = assignor.assign(&context).unwrap();

        let mut per_thread: HashMap<String, usize> = HashMap::new();
        for thread in decision.values() {
            *per_thread.entry(thread.to_string()).or_default() += 1;
        }
        assert_eq!(per_thread.len(), 2);
        assert!(per_thread.values().all(|&count| count == 2));
    }

    #[test]
    fn test_range_output_is_local_only() {
        let assignor = RangeAssignor;
        let context = static_context("c1", &["c0", "c1", "c2"], 2, &[("t", (0..7).collect())]);
        let decision = assignor.assign(&context).unwrap();
        assert!(decision.values().all(|thread| thread.consumer == "c1"));
    }

    #[test]
    fn test_range_union_across_peers_is_exact() {
        let assignor = RangeAssignor;
        let consumers = ["a", "b", "c"];
        let partitions: Vec<i32> = (0..10).collect();

        let mut union: HashMap<TopicAndPartition, ConsumerThreadId> = HashMap::new();
        for consumer in &consumers {
            let context = static_context(consumer, &consumers, 2, &[("t", partitions.clone())]);
            for (tp, thread) in assignor.assign(&context).unwrap() {
                let previous = union.insert(tp.clone(), thread);
                assert!(previous.is_none(), "partition {tp} assigned twice");
            }
        }
        assert_eq!(union.len(), partitions.len());
    }

    #[test]
    fn test_range_missing_local_thread_fails() {
        let assignor = RangeAssignor;
        let mut context = static_context("c0", &["c0", "c1"], 1, &[("t", vec![0, 1])]);
        // The group view no longer contains the local thread.
        context.consumers_for_topic.insert(
            "t".to_string(),
            vec![ConsumerThreadId::new("c1", 0)],
        );
        let err = assignor.assign(&context).unwrap_err();
        assert!(matches!(err, GrouplineError::Configuration(_)));
    }

    #[test]
    fn test_range_more_consumers_than_partitions() {
        let assignor = RangeAssignor;
        let context = static_context("c3", &["c0", "c1", "c2", "c3"], 1, &[("t", vec![0, 1])]);
        let decision = assignor.assign(&context).unwrap();
        assert!(decision.is_empty());
    }

    #[test]
    fn test_roundrobin_precondition_violation_fails() {
        let assignor = RoundRobinAssignor;
        let mut context = static_context(
            "c0",
            &["c0", "c1"],
            1,
            &[("t1", vec![0, 1]), ("t2", vec![0])],
        );
        // c1 dropped its t2 subscription: shapes now differ across topics.
        context
            .consumers_for_topic
            .insert("t2".to_string(), vec![ConsumerThreadId::new("c0", 0)]);

        let err = assignor.assign(&context).unwrap_err();
        assert!(matches!(err, GrouplineError::Configuration(_)));
    }

    #[test]
    fn test_roundrobin_is_deterministic() {
        let assignor = RoundRobinAssignor;
        let context = static_context(
            "c0",
            &["c0", "c1"],
            2,
            &[("t1", vec![0, 1, 2]), ("t2", vec![0, 1, 2])],
        );
        let first = assignor.assign(&context).unwrap();
        let second = assignor.assign(&context).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_roundrobin_union_covers_everything_within_delta_one() {
        let assignor = RoundRobinAssignor;
        let consumers = ["c0", "c1", "c2"];
        let topics = [("t1", vec![0, 1, 2, 3]), ("t2", vec![0, 1, 2])];

        let mut union: HashMap<TopicAndPartition, ConsumerThreadId> = HashMap::new();
        for consumer in &consumers {
            let context = static_context(consumer, &consumers, 1, &topics);
            for (tp, thread) in assignor.assign(&context).unwrap() {
                assert_eq!(thread.consumer, *consumer);
                let previous = union.insert(tp.clone(), thread);
                assert!(previous.is_none(), "partition {tp} assigned twice");
            }
        }
        assert_eq!(union.len(), 7);

        let mut per_thread: HashMap<String, usize> = HashMap::new();
        for thread in union.values() {
            *per_thread.entry(thread.to_string()).or_default() += 1;
        }
        let max = per_thread.values().copied().max().unwrap_or(0);
        let min = per_thread.values().copied().min().unwrap_or(0);
        assert!(max - min <= 1, "uneven distribution: {per_thread:?}");
    }

    #[test]
    fn test_roundrobin_empty_view_assigns_nothing() {
        let assignor = RoundRobinAssignor;
        let context = static_context("c0", &["c0"], 1, &[]);
        assert!(assignor.assign(&context).unwrap().is_empty());
    }

    #[test]
    fn test_assignor_lookup() {
        assert_eq!(assignor_for("range").unwrap().name(), "range");
        assert_eq!(assignor_for("roundrobin").unwrap().name(), "roundrobin");
        assert!(matches!(
            assignor_for("sticky"),
            Err(GrouplineError::Configuration(_))
        ));
        // Strategy names are case-sensitive.
        assert!(assignor_for("Range").is_err());
    }

    #[test]
    fn test_static_context_shape() {
        let context = static_context("c0", &["c0", "c1"], 2, &[("t", vec![0, 1, 2])]);
        assert_eq!(context.consumers, vec!["c0", "c1"]);

        let threads = context.consumers_for_topic.get("t").unwrap();
        assert_eq!(
            threads.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
            vec!["c0-0", "c0-1", "c1-0", "c1-1"]
        );

        let mine = context.my_topic_thread_ids.get("t").unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|t| t.consumer == "c0"));
    }

    #[test]
    fn test_shuffle_seed_is_stable_for_equal_input() {
        let sequence = vec![
            TopicAndPartition::new("t", 0),
            TopicAndPartition::new("t", 1),
        ];
        let threads = vec![ConsumerThreadId::new("c0", 0)];
        assert_eq!(
            shuffle_seed(&sequence, &threads),
            shuffle_seed(&sequence, &threads)
        );

        let reordered = vec![
            TopicAndPartition::new("t", 1),
            TopicAndPartition::new("t", 0),
        ];
        assert_ne!(
            shuffle_seed(&sequence, &threads),
            shuffle_seed(&reordered, &threads)
        );
    }
}
