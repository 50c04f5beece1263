//! Canonical coordination-service paths for groups, topics and brokers
//!
//! The layout is wire-compatible with the existing consumer ecosystem; these
//! are the only places path strings are assembled.

/// Root of all consumer-group state
pub const CONSUMERS_PATH: &str = "/consumers";

/// Broker registry, published by brokers (read-only here)
pub const BROKER_IDS_PATH: &str = "/brokers/ids";

/// Topic registry, published by brokers (read-only here)
pub const BROKER_TOPICS_PATH: &str = "/brokers/topics";

/// Per-group directory set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDirs {
    pub group: String,
    /// `/consumers/<group>`
    pub group_dir: String,
    /// `/consumers/<group>/ids` — ephemeral registrations
    pub registry_dir: String,
    /// `/consumers/<group>/changes` — deployment notifications
    pub changes_dir: String,
    /// `/consumers/<group>/sync` — reserved
    pub sync_dir: String,
}

impl GroupDirs {
    pub fn new(group: &str) -> Self {
        let group_dir = format!("{CONSUMERS_PATH}/{group}");
        Self {
            group: group.to_string(),
            registry_dir: format!("{group_dir}/ids"),
            changes_dir: format!("{group_dir}/changes"),
            sync_dir: format!("{group_dir}/sync"),
            group_dir,
        }
    }

    /// Registration node for one consumer
    pub fn consumer_path(&self, consumer_id: &str) -> String {
        format!("{}/{}", self.registry_dir, consumer_id)
    }

    /// Notification node for one notification id
    pub fn notification_path(&self, notification_id: &str) -> String {
        format!("{}/{}", self.changes_dir, notification_id)
    }
}

/// Per-group, per-topic directory set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTopicDirs {
    pub group_dirs: GroupDirs,
    pub topic: String,
    /// `/consumers/<group>/offsets/<topic>`
    pub offset_dir: String,
    /// `/consumers/<group>/owners/<topic>`
    pub owner_dir: String,
}

impl GroupTopicDirs {
    pub fn new(group: &str, topic: &str) -> Self {
        let group_dirs = GroupDirs::new(group);
        Self {
            offset_dir: format!("{}/offsets/{}", group_dirs.group_dir, topic),
            owner_dir: format!("{}/owners/{}", group_dirs.group_dir, topic),
            topic: topic.to_string(),
            group_dirs,
        }
    }

    /// Offset node for one partition
    pub fn offset_path(&self, partition: i32) -> String {
        format!("{}/{}", self.offset_dir, partition)
    }

    /// Ownership node for one partition
    pub fn owner_path(&self, partition: i32) -> String {
        format!("{}/{}", self.owner_dir, partition)
    }
}

/// Parent of a node path; the root is its own parent.
pub(crate) fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_dirs() {
        let dirs = GroupDirs::new("payments");
        assert_eq!(dirs.group_dir, "/consumers/payments");
        assert_eq!(dirs.registry_dir, "/consumers/payments/ids");
        assert_eq!(dirs.changes_dir, "/consumers/payments/changes");
        assert_eq!(dirs.sync_dir, "/consumers/payments/sync");
        assert_eq!(dirs.consumer_path("c1"), "/consumers/payments/ids/c1");
    }

    #[test]
    fn test_group_topic_dirs() {
        let dirs = GroupTopicDirs::new("payments", "orders");
        assert_eq!(dirs.offset_dir, "/consumers/payments/offsets/orders");
        assert_eq!(dirs.owner_dir, "/consumers/payments/owners/orders");
        assert_eq!(dirs.offset_path(3), "/consumers/payments/offsets/orders/3");
        assert_eq!(dirs.owner_path(0), "/consumers/payments/owners/orders/0");
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/consumers/g/ids"), "/consumers/g");
        assert_eq!(parent_path("/consumers"), "/");
        assert_eq!(parent_path("/"), "/");
    }
}
