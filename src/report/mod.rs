//! Report data model and merge engine.
//!
//! A report is the full aggregate of everything the platform knows: one
//! typed entity graph per topology plus the address-naming evidence table.
//! Reports are immutable value snapshots; merging two reports allocates a
//! new one and never touches its inputs, so the aggregator can publish a
//! merged report while readers keep working against older snapshots.

pub mod addresses;
pub mod endpoint_id;
pub mod node;
pub mod strings;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use self::addresses::AddressTable;
use self::node::Node;

/// Identifies one typed entity graph within a report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    Endpoint,
    Process,
    Container,
    Host,
}

impl TopologyKind {
    /// Returns the canonical topology name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::Process => "process",
            Self::Container => "container",
            Self::Host => "host",
        }
    }

    /// Converts from the canonical topology name.
    pub fn from_str(name: &str) -> Option<Self> {
        match name {
            "endpoint" => Some(Self::Endpoint),
            "process" => Some(Self::Process),
            "container" => Some(Self::Container),
            "host" => Some(Self::Host),
            _ => None,
        }
    }

    /// Returns all topology kinds, coarsest last.
    pub fn all() -> &'static [Self] {
        &[Self::Endpoint, Self::Process, Self::Container, Self::Host]
    }
}

/// One typed graph of entities, keyed by node ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topology {
    pub nodes: HashMap<String, Node>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, merging with any node already stored under its ID.
    /// Used when building a partial report, before it is published.
    pub fn add_node(&mut self, node: Node) {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                let merged = existing.merge(&node);
                *existing = merged;
            }
            None => {
                self.nodes.insert(node.id.clone(), node);
            }
        }
    }

    /// Looks up a node by ID.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the topology has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Keyed merge: nodes present in only one topology pass through;
    /// shared IDs get [`Node::merge`]. The larger side is copied and the
    /// smaller folded in, same as every evidence merge in this crate.
    pub fn merge(&self, other: &Self) -> Self {
        if self.nodes.is_empty() {
            return other.clone();
        }
        if other.nodes.is_empty() {
            return self.clone();
        }

        let (base, fold) = if self.nodes.len() >= other.nodes.len() {
            (self, other)
        } else {
            (other, self)
        };

        let mut nodes = base.nodes.clone();
        for (id, node) in &fold.nodes {
            match nodes.get_mut(id) {
                Some(existing) => {
                    let merged = existing.merge(node);
                    *existing = merged;
                }
                None => {
                    nodes.insert(id.clone(), node.clone());
                }
            }
        }
        Self { nodes }
    }
}

/// The full aggregate: every topology plus the address-naming evidence.
///
/// Created empty at process start, grown only by merge. Consumers read
/// immutable snapshots; nothing in this crate mutates a published report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Report {
    #[serde(skip_serializing_if = "Topology::is_empty")]
    pub endpoint: Topology,

    #[serde(skip_serializing_if = "Topology::is_empty")]
    pub process: Topology,

    #[serde(skip_serializing_if = "Topology::is_empty")]
    pub container: Topology,

    #[serde(skip_serializing_if = "Topology::is_empty")]
    pub host: Topology,

    #[serde(skip_serializing_if = "AddressTable::is_empty")]
    pub addresses: AddressTable,
}

impl Report {
    /// Creates an empty report, the merge identity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows the topology for the given kind.
    pub fn topology(&self, kind: TopologyKind) -> &Topology {
        match kind {
            TopologyKind::Endpoint => &self.endpoint,
            TopologyKind::Process => &self.process,
            TopologyKind::Container => &self.container,
            TopologyKind::Host => &self.host,
        }
    }

    /// Mutably borrows the topology for the given kind. Used when building
    /// a partial report, before it is published.
    pub fn topology_mut(&mut self, kind: TopologyKind) -> &mut Topology {
        match kind {
            TopologyKind::Endpoint => &mut self.endpoint,
            TopologyKind::Process => &mut self.process,
            TopologyKind::Container => &mut self.container,
            TopologyKind::Host => &mut self.host,
        }
    }

    /// Returns a fresh report folding both operands together: per-topology
    /// keyed merges plus the address table merge. Safe under any delivery
    /// order or duplication of partial reports.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            endpoint: self.endpoint.merge(&other.endpoint),
            process: self.process.merge(&other.process),
            container: self.container.merge(&other.container),
            host: self.host.merge(&other.host),
            addresses: self.addresses.merge(&other.addresses),
        }
    }
}
