use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::strings::StringSet;
use super::TopologyKind;

/// Category of a topology entity, fixed at construction time by whichever
/// collaborator builds the entity.
///
/// Internet aggregates are synthetic entities standing in for all traffic
/// to or from addresses outside the tracked set; connection summaries break
/// them out per concrete address instead of treating them as one peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Regular,
    IncomingInternet,
    OutgoingInternet,
}

impl NodeKind {
    /// Canonical label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "regular",
            Self::IncomingInternet => "incoming_internet",
            Self::OutgoingInternet => "outgoing_internet",
        }
    }

    /// True for either internet aggregate direction.
    pub fn is_internet(self) -> bool {
        matches!(self, Self::IncomingInternet | Self::OutgoingInternet)
    }

    /// True for ordinary tracked entities. Used to elide the field when
    /// serializing.
    pub fn is_regular(&self) -> bool {
        matches!(self, Self::Regular)
    }

    // The non-regular side wins, so a partial observation that didn't tag
    // an internet aggregate cannot strip the tag from one that did.
    fn merge(self, other: Self) -> Self {
        if self.is_regular() {
            other
        } else {
            self
        }
    }
}

/// One entity in a topology.
///
/// Entities reference each other by ID only — adjacency and children carry
/// IDs resolved through the owning topology's flat map, never embedded
/// nodes. This keeps entities pure values with copy-on-merge semantics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Globally-meaningful opaque identifier.
    pub id: String,

    #[serde(default, skip_serializing_if = "NodeKind::is_regular")]
    pub kind: NodeKind,

    /// IDs of entities this node has observed an edge toward, from this
    /// node's perspective.
    #[serde(default, skip_serializing_if = "StringSet::is_empty")]
    pub adjacency: StringSet,

    /// Nested entity IDs, keyed by the finer-grained topology they belong
    /// to (e.g. a container's endpoint children).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<TopologyKind, StringSet>,

    /// Named evidence sets attached to this entity (e.g. `name`,
    /// `reverse_dns_names`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sets: BTreeMap<String, StringSet>,
}

impl Node {
    /// Creates a regular node with the given ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Sets the node category.
    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Adds an observed edge toward `id`.
    pub fn with_adjacent(mut self, id: &str) -> Self {
        self.adjacency = self.adjacency.add(id);
        self
    }

    /// Adds a nested child ID under the given finer-grained topology.
    pub fn with_child(mut self, topology: TopologyKind, id: &str) -> Self {
        let entry = self.children.entry(topology).or_default();
        *entry = entry.add(id);
        self
    }

    /// Attaches evidence under a named set, merging with any existing
    /// evidence for that name.
    pub fn with_set(mut self, name: &str, values: StringSet) -> Self {
        match self.sets.get_mut(name) {
            Some(existing) => {
                let merged = existing.merge(&values);
                *existing = merged;
            }
            None => {
                self.sets.insert(name.to_string(), values);
            }
        }
        self
    }

    /// Child IDs belonging to the given topology, if any were observed.
    pub fn children_in(&self, topology: TopologyKind) -> Option<&StringSet> {
        self.children.get(&topology)
    }

    /// Evidence stored under `name`, if any.
    pub fn set(&self, name: &str) -> Option<&StringSet> {
        self.sets.get(name)
    }

    /// Builds a new node combining the evidence of both.
    ///
    /// Adjacency is unioned; children and sets are merged per key. Inputs
    /// are untouched. Callers only merge nodes sharing an ID.
    pub fn merge(&self, other: &Self) -> Self {
        let mut children = self.children.clone();
        for (topology, ids) in &other.children {
            match children.get_mut(topology) {
                Some(existing) => {
                    let merged = existing.merge(ids);
                    *existing = merged;
                }
                None => {
                    children.insert(*topology, ids.clone());
                }
            }
        }

        let mut sets = self.sets.clone();
        for (name, values) in &other.sets {
            match sets.get_mut(name) {
                Some(existing) => {
                    let merged = existing.merge(values);
                    *existing = merged;
                }
                None => {
                    sets.insert(name.clone(), values.clone());
                }
            }
        }

        Self {
            id: self.id.clone(),
            kind: self.kind.merge(other.kind),
            adjacency: self.adjacency.merge(&other.adjacency),
            children,
            sets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unions_adjacency() {
        let a = Node::new("n1").with_adjacent("x").with_adjacent("y");
        let b = Node::new("n1").with_adjacent("y").with_adjacent("z");

        let merged = a.merge(&b);
        assert_eq!(
            merged.adjacency,
            StringSet::from_items(["x", "y", "z"])
        );
    }

    #[test]
    fn test_merge_combines_children_per_topology() {
        let a = Node::new("n1").with_child(TopologyKind::Endpoint, "e1");
        let b = Node::new("n1")
            .with_child(TopologyKind::Endpoint, "e2")
            .with_child(TopologyKind::Process, "p1");

        let merged = a.merge(&b);
        assert_eq!(
            merged.children_in(TopologyKind::Endpoint),
            Some(&StringSet::from_items(["e1", "e2"]))
        );
        assert_eq!(
            merged.children_in(TopologyKind::Process),
            Some(&StringSet::from_items(["p1"]))
        );
    }

    #[test]
    fn test_merge_combines_evidence_sets_per_name() {
        let a = Node::new("n1").with_set("name", StringSet::from_items(["web-1"]));
        let b = Node::new("n1")
            .with_set("name", StringSet::from_items(["web-1a"]))
            .with_set("reverse_dns_names", StringSet::from_items(["db.local"]));

        let merged = a.merge(&b);
        assert_eq!(
            merged.set("name"),
            Some(&StringSet::from_items(["web-1", "web-1a"]))
        );
        assert_eq!(
            merged.set("reverse_dns_names"),
            Some(&StringSet::from_items(["db.local"]))
        );
    }

    #[test]
    fn test_merge_is_commutative_and_idempotent() {
        let a = Node::new("n1")
            .with_adjacent("x")
            .with_set("name", StringSet::from_items(["a"]));
        let b = Node::new("n1")
            .with_adjacent("y")
            .with_child(TopologyKind::Endpoint, "e1");

        assert_eq!(a.merge(&b), b.merge(&a));
        assert_eq!(a.merge(&a), a);
    }

    #[test]
    fn test_merge_keeps_internet_kind() {
        let tagged = Node::new("in").with_kind(NodeKind::IncomingInternet);
        let untagged = Node::new("in");

        assert_eq!(tagged.merge(&untagged).kind, NodeKind::IncomingInternet);
        assert_eq!(untagged.merge(&tagged).kind, NodeKind::IncomingInternet);
    }

    #[test]
    fn test_merge_does_not_mutate_inputs() {
        let a = Node::new("n1").with_adjacent("x");
        let b = Node::new("n1").with_adjacent("y");
        let before = a.clone();
        let _ = a.merge(&b);
        assert_eq!(a, before);
    }

    #[test]
    fn test_kind_helpers() {
        assert!(NodeKind::IncomingInternet.is_internet());
        assert!(NodeKind::OutgoingInternet.is_internet());
        assert!(!NodeKind::Regular.is_internet());
        assert_eq!(NodeKind::OutgoingInternet.as_str(), "outgoing_internet");
    }

    #[test]
    fn test_serde_elides_empty_fields() {
        let json = serde_json::to_string(&Node::new("n1")).expect("serializable");
        assert_eq!(json, r#"{"id":"n1"}"#);
    }
}
