#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # groupline
//!
//! groupline is the group-coordination core of a consumer-group client for
//! partitioned, log-based messaging systems. It manages, through a
//! strongly-consistent hierarchical coordination service, everything a
//! consumer needs to cooperate with its peers:
//!
//! - **Membership**: ephemeral registration of consumers in a named group
//! - **Discovery**: brokers, topics and partitions published by the cluster
//! - **Assignment**: deterministic `range` and `roundrobin` partition
//!   assignment over a snapshot of the cluster view
//! - **Ownership**: exclusive per-partition claims backed by ephemeral nodes
//! - **Offsets**: durable recording of consumed positions
//! - **Notifications**: "deployed topics" announcements between operators
//!   and consumers
//!
//! What it deliberately does *not* do: consume messages, schedule fetches,
//! buffer data, or create topics. Those belong to the surrounding consumer
//! runtime; groupline only tells it *which* partitions are yours and *where*
//! you left off.
//!
//! ## Example
//!
//! ```no_run
//! use groupline::{
//!     assignor_for, AssignmentContext, ConsumerCoordinator, InMemoryCoordination,
//!     TopicsToNumStreams, ZookeeperConfig, ZookeeperCoordinator,
//! };
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> groupline::Result<()> {
//!     let client = Arc::new(InMemoryCoordination::new());
//!     let coordinator = ZookeeperCoordinator::new(ZookeeperConfig::default(), client)?;
//!     coordinator.connect().await?;
//!
//!     // Join the group.
//!     let mut counts = HashMap::new();
//!     counts.insert("orders".to_string(), 2);
//!     let subscription = TopicsToNumStreams::static_subscription("consumer-1", counts);
//!     coordinator.register_consumer("consumer-1", "billing", &subscription).await?;
//!
//!     // React to membership and topology changes.
//!     let mut events = coordinator.subscribe_for_changes("billing").await?;
//!
//!     // On each event: snapshot the cluster view, compute the local
//!     // assignment, claim the partitions it names.
//!     while let Some(_event) = events.recv().await {
//!         let context =
//!             AssignmentContext::gather("billing", "consumer-1", true, &coordinator).await?;
//!         let decision = assignor_for("range")?.assign(&context)?;
//!         for (tp, thread) in &decision {
//!             coordinator
//!                 .claim_partition_ownership("billing", &tp.topic, tp.partition, thread)
//!                 .await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`coordinator`]: the coordination-service façade — registration,
//!   ownership, offsets, notifications and the watch multiplexer
//! - [`assignment`]: pure assignment strategies over an [`AssignmentContext`]
//! - [`types`]: wire-compatible domain entities
//! - [`config`]: client configuration
//! - [`error`]: error types and `Result` alias

pub mod assignment;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod types;

pub use assignment::{
    assignor_for, AssignmentContext, PartitionAssignor, RangeAssignor, RoundRobinAssignor,
    RANGE_STRATEGY, ROUND_ROBIN_STRATEGY,
};
pub use config::ZookeeperConfig;
pub use coordinator::{
    ConsumerCoordinator, CoordinationClient, CoordinatorEvent, InMemoryCoordination,
    MockCoordinator, ZookeeperCoordinator,
};
pub use error::{GrouplineError, Result};
pub use types::{
    BrokerInfo, ConsumerInfo, ConsumerThreadId, DeployedTopics, SubscriptionPattern,
    TopicAndPartition, TopicInfo, TopicsToNumStreams, INVALID_OFFSET,
};
