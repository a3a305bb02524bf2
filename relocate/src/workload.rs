use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Mapping from constraint key to the value a node label must carry.
///
/// Ordered so that two equal maps always serialize identically.
pub type PlacementMap = BTreeMap<String, String>;

/// Identity of a workload: a namespace-like scope plus a name.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
}

impl WorkloadId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for WorkloadId {
    type Err = anyhow::Error;

    /// Parses `namespace/name`. A bare name lands in the `default` namespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self::new(namespace, name))
            }
            Some(_) => anyhow::bail!("invalid workload identity: {s}"),
            None if !s.is_empty() => Ok(Self::new("default", s)),
            None => anyhow::bail!("workload identity must not be empty"),
        }
    }
}

/// Name of a cluster node.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeName(pub String);

impl NodeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for NodeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NodeName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A cluster node as seen by this crate: a name and its labels. Read-only.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: NodeName,
    pub labels: BTreeMap<String, String>,
}

impl Node {
    /// Node with no labels.
    pub fn new(name: impl Into<NodeName>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Add or replace a label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// True when every key/value pair of `placement` is carried as a label.
    pub fn satisfies(&self, placement: &PlacementMap) -> bool {
        placement
            .iter()
            .all(|(key, value)| self.labels.get(key) == Some(value))
    }
}

/// Desired state of a workload, owned by its controller.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Persistent placement constraints. Never written by migrations.
    pub placement: PlacementMap,
}

/// Observed state of a workload.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct WorkloadStatus {
    /// Node currently hosting the workload. Only a succeeded migration moves it.
    pub current_node: Option<NodeName>,
}

/// A long-lived, VM-like unit that can be live-migrated between nodes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    pub spec: WorkloadSpec,
    pub status: WorkloadStatus,
}

impl Workload {
    /// Workload with an empty placement that runs nowhere yet.
    pub fn new(id: WorkloadId) -> Self {
        Self {
            id,
            spec: WorkloadSpec::default(),
            status: WorkloadStatus::default(),
        }
    }

    /// Set the workload's own placement map.
    pub fn with_placement(mut self, placement: PlacementMap) -> Self {
        self.spec.placement = placement;
        self
    }

    /// Set the node the workload currently runs on.
    pub fn running_on(mut self, node: impl Into<NodeName>) -> Self {
        self.status.current_node = Some(node.into());
        self
    }
}

/// Unique identifier of one migration attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MigrationId(pub Uuid);

impl Default for MigrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationId {
    /// New time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for MigrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_id_parse() {
        let id: WorkloadId = "tenant-a/fedora".parse().unwrap();
        assert_eq!(id, WorkloadId::new("tenant-a", "fedora"));
        assert_eq!(id.to_string(), "tenant-a/fedora");

        let bare: WorkloadId = "fedora".parse().unwrap();
        assert_eq!(bare.namespace, "default");

        assert!("".parse::<WorkloadId>().is_err());
        assert!("/fedora".parse::<WorkloadId>().is_err());
        assert!("tenant-a/".parse::<WorkloadId>().is_err());
    }

    #[test]
    fn test_node_satisfies_every_pair() {
        let node = Node::new("node-b")
            .with_label("zone", "vmi")
            .with_label("team", "migration");

        let mut placement = PlacementMap::new();
        assert!(node.satisfies(&placement), "empty placement matches any node");

        placement.insert("zone".into(), "vmi".into());
        assert!(node.satisfies(&placement));

        placement.insert("team".into(), "migration".into());
        assert!(node.satisfies(&placement));

        placement.insert("team".into(), "storage".into());
        assert!(!node.satisfies(&placement));

        placement.remove("team");
        placement.insert("rack".into(), "r1".into());
        assert!(!node.satisfies(&placement));
    }

    #[test]
    fn test_migration_id_display() {
        let id = MigrationId::new();
        assert_eq!(id.to_string(), id.as_uuid().to_string());
        assert_ne!(MigrationId::new(), id);
    }
}
