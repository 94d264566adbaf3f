//! Connection summarization.
//!
//! Given one immutable report snapshot, reconstructs per-entity tables of
//! inbound and outbound connections by cross-referencing two layers of
//! observation: coarse entity-to-entity adjacency answers "is there any
//! edge between these two logical entities", and fine endpoint-to-endpoint
//! adjacency recovers the concrete port and address. Nothing here is
//! persisted; every table is computed fresh per query and every degradation
//! (undecodable endpoint ID, vanished remote, missing reverse evidence) is
//! local and silent.

use std::collections::HashMap;

use serde::Serialize;

use crate::report::endpoint_id;
use crate::report::node::Node;
use crate::report::strings::StringSet;
use crate::report::{Report, Topology, TopologyKind};

const INCOMING_ID: &str = "incoming-connections";
const INCOMING_LABEL: &str = "Inbound";
const OUTGOING_ID: &str = "outgoing-connections";
const OUTGOING_LABEL: &str = "Outbound";

const PORT_KEY: &str = "port";
const PORT_LABEL: &str = "Port";
const COUNT_KEY: &str = "count";
const COUNT_LABEL: &str = "Count";
const REMOTE_ADDRESS_KEY: &str = "remoteAddress";
const REMOTE_ADDRESS_LABEL: &str = "Remote";

const DATATYPE_NUMBER: &str = "number";
const DATATYPE_TEXT: &str = "text";

/// Evidence-set name carrying display names for an entity.
pub const NAME_SET: &str = "name";

/// Evidence-set name carrying reverse-DNS names on endpoint entities.
pub const REVERSE_DNS_SET: &str = "reverse_dns_names";

/// One column header in a connections table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub id: String,
    pub label: String,
    /// Marks the column clients should sort by; the server-side row order
    /// is always by row ID regardless.
    #[serde(rename = "defaultSort")]
    pub default_sort: bool,
}

impl Column {
    fn new(id: &str, label: &str, default_sort: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            default_sort,
        }
    }
}

/// Fixed column-header sets, passed explicitly into the builders so they
/// stay pure functions of snapshot and configuration.
#[derive(Debug, Clone)]
pub struct SummaryColumns {
    /// Columns for regular entities.
    pub normal: Vec<Column>,
    /// Columns for internet aggregate entities, which additionally break
    /// out the local address.
    pub internet: Vec<Column>,
}

impl Default for SummaryColumns {
    fn default() -> Self {
        Self {
            normal: vec![
                Column::new(PORT_KEY, PORT_LABEL, false),
                Column::new(COUNT_KEY, COUNT_LABEL, true),
            ],
            internet: vec![
                Column::new(REMOTE_ADDRESS_KEY, REMOTE_ADDRESS_LABEL, false),
                Column::new(PORT_KEY, PORT_LABEL, false),
                Column::new(COUNT_KEY, COUNT_LABEL, true),
            ],
        }
    }
}

impl SummaryColumns {
    fn for_node(&self, node: &Node) -> Vec<Column> {
        if node.kind.is_internet() {
            self.internet.clone()
        } else {
            self.normal.clone()
        }
    }
}

/// One metadata cell attached to a connection row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRow {
    pub id: String,
    pub value: String,
    pub datatype: String,
}

/// One row in a connections table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    /// Row ID, unique within one summary.
    pub id: String,
    /// ID of the remote node; empty when the remote could not be resolved.
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub label: String,
    pub linkable: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<MetadataRow>,
}

/// The table of connections to or from one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionsSummary {
    pub id: String,
    #[serde(rename = "topologyId")]
    pub topology_id: String,
    pub label: String,
    pub columns: Vec<Column>,
    pub connections: Vec<Connection>,
}

/// Composite key identifying one logical connection row. Equal keys
/// collapse into a single counted row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConnectionKey {
    remote_node_id: String,
    remote_addr: String,
    local_node_id: String,
    local_addr: String,
    /// Always the server-side port.
    port: String,
}

impl ConnectionKey {
    fn new(n: &Node, node: &Node, port: &str, endpoint_id: &str, local_addr: &str) -> Self {
        let mut key = Self {
            remote_node_id: node.id.clone(),
            remote_addr: String::new(),
            local_node_id: n.id.clone(),
            local_addr: String::new(),
            port: port.to_string(),
        };
        // An internet aggregate has no individually meaningful identity;
        // carry the concrete endpoint ID and address so distinct external
        // peers stay distinct. The endpoint also holds the reverse-DNS
        // evidence used when labeling the row.
        if n.kind.is_internet() {
            key.local_node_id = endpoint_id.to_string();
            key.local_addr = local_addr.to_string();
        }
        key
    }

    /// Stable concatenation of all five fields; the dedup identity and the
    /// externally visible row ID.
    fn row_id(&self) -> String {
        format!(
            "{}:{}-{}:{}-{}",
            self.remote_node_id, self.remote_addr, self.local_node_id, self.local_addr, self.port
        )
    }
}

/// Builds the table of connections arriving at `n`.
///
/// `nodes` is the set of rendered nodes `n` belongs to (the subject
/// topology); `report` is the snapshot used to resolve endpoint children
/// and naming evidence.
pub fn incoming_summary(
    columns: &SummaryColumns,
    report: &Report,
    topology_id: &str,
    n: &Node,
    nodes: &Topology,
) -> ConnectionsSummary {
    let local_endpoint_ids = endpoint_child_ids(n);

    // For each node with an edge TO n, work out which of n's endpoints it
    // is actually talking to, and count connections per server-side port.
    let mut counts: HashMap<ConnectionKey, u64> = HashMap::new();
    for node in nodes.nodes.values() {
        if !node.adjacency.contains(&n.id) {
            continue;
        }
        for child in endpoint_children(report, node) {
            for local_id in &child.adjacency.intersection(&local_endpoint_ids) {
                let Some((_, local_addr, port)) = endpoint_id::parse(local_id) else {
                    continue;
                };
                let key = ConnectionKey::new(n, node, port, local_id, local_addr);
                *counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    ConnectionsSummary {
        id: INCOMING_ID.to_string(),
        topology_id: topology_id.to_string(),
        label: INCOMING_LABEL.to_string(),
        columns: columns.for_node(n),
        connections: connection_rows(report, nodes, counts, n.kind.is_internet()),
    }
}

/// Builds the table of connections initiated by `n`. Symmetric to
/// [`incoming_summary`], starting from `n`'s own endpoint children.
pub fn outgoing_summary(
    columns: &SummaryColumns,
    report: &Report,
    topology_id: &str,
    n: &Node,
    nodes: &Topology,
) -> ConnectionsSummary {
    let local_endpoint_ids = endpoint_child_ids(n);

    let mut counts: HashMap<ConnectionKey, u64> = HashMap::new();
    for target_id in &n.adjacency {
        let Some(node) = nodes.node(target_id) else {
            continue;
        };
        let remote_endpoint_ids = endpoint_child_ids(node);

        for local_id in &local_endpoint_ids {
            let Some(local) = report.endpoint.node(local_id) else {
                continue;
            };
            let Some((_, local_addr, _)) = endpoint_id::parse(local_id) else {
                continue;
            };
            for remote_id in &local.adjacency.intersection(&remote_endpoint_ids) {
                // The server-side port lives on the remote endpoint.
                let Some((_, _, port)) = endpoint_id::parse(remote_id) else {
                    continue;
                };
                let key = ConnectionKey::new(n, node, port, local_id, local_addr);
                *counts.entry(key).or_insert(0) += 1;
            }
        }
    }

    ConnectionsSummary {
        id: OUTGOING_ID.to_string(),
        topology_id: topology_id.to_string(),
        label: OUTGOING_LABEL.to_string(),
        columns: columns.for_node(n),
        connections: connection_rows(report, nodes, counts, n.kind.is_internet()),
    }
}

fn endpoint_child_ids(node: &Node) -> StringSet {
    node.children_in(TopologyKind::Endpoint)
        .cloned()
        .unwrap_or_default()
}

fn endpoint_children<'a>(report: &'a Report, node: &Node) -> Vec<&'a Node> {
    let Some(ids) = node.children_in(TopologyKind::Endpoint) else {
        return Vec::new();
    };
    ids.iter()
        .filter_map(|id| report.endpoint.node(id))
        .collect()
}

/// Materializes counted keys into presentation rows, sorted by row ID so
/// identical queries against the same snapshot are byte-identical.
fn connection_rows(
    report: &Report,
    nodes: &Topology,
    counts: HashMap<ConnectionKey, u64>,
    include_local: bool,
) -> Vec<Connection> {
    let mut rows = Vec::with_capacity(counts.len());
    for (key, count) in &counts {
        let mut row = match nodes.node(&key.remote_node_id) {
            Some(remote) => Connection {
                id: key.row_id(),
                node_id: remote.id.clone(),
                label: node_label(remote),
                linkable: true,
                metadata: Vec::new(),
            },
            None => {
                // The remote may have expired from the snapshot since the
                // edge was observed; show whatever identity the key
                // captured, as a non-interactive row.
                let label = if key.remote_addr.is_empty() {
                    key.remote_node_id.clone()
                } else {
                    key.remote_addr.clone()
                };
                Connection {
                    id: key.row_id(),
                    node_id: String::new(),
                    label,
                    linkable: false,
                    metadata: Vec::new(),
                }
            }
        };

        if include_local {
            row.metadata.push(MetadataRow {
                id: REMOTE_ADDRESS_KEY.to_string(),
                value: local_address_label(report, &key.local_node_id, &key.local_addr),
                datatype: DATATYPE_TEXT.to_string(),
            });
        }
        row.metadata.push(MetadataRow {
            id: PORT_KEY.to_string(),
            value: key.port.clone(),
            datatype: DATATYPE_NUMBER.to_string(),
        });
        row.metadata.push(MetadataRow {
            id: COUNT_KEY.to_string(),
            value: count.to_string(),
            datatype: DATATYPE_NUMBER.to_string(),
        });

        rows.push(row);
    }

    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}

/// Display label for a resolved node: first `name` evidence, else its ID.
fn node_label(node: &Node) -> String {
    node.set(NAME_SET)
        .and_then(StringSet::first)
        .map(str::to_string)
        .unwrap_or_else(|| node.id.clone())
}

/// Best-effort label for the local side of an internet row: the best
/// reverse-DNS name for the address, falling back to the bare address.
fn local_address_label(report: &Report, endpoint_id: &str, addr: &str) -> String {
    let reverse = report
        .addresses
        .get(addr)
        .and_then(|record| record.reverse.first())
        .or_else(|| {
            report
                .endpoint
                .node(endpoint_id)
                .and_then(|ep| ep.set(REVERSE_DNS_SET))
                .and_then(StringSet::first)
        });

    match reverse {
        Some(name) => format!("{name} ({addr})"),
        None => addr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::addresses::AddressRecord;
    use crate::report::node::NodeKind;

    fn eid(scope: &str, addr: &str, port: &str) -> String {
        endpoint_id::encode(scope, addr, port)
    }

    /// Container c1 on host-a talks to container c2's port 80 on host-b
    /// over three distinct client sockets.
    fn three_connection_report() -> Report {
        let server = eid("host-b", "10.0.0.2", "80");

        let mut r = Report::new();
        let mut c1 = Node::new("c1").with_adjacent("c2");
        for client_port in ["40001", "40002", "40003"] {
            let client = eid("host-a", "10.0.0.1", client_port);
            r.endpoint
                .add_node(Node::new(&client).with_adjacent(&server));
            c1 = c1.with_child(TopologyKind::Endpoint, &client);
        }
        r.endpoint.add_node(Node::new(&server));
        r.container.add_node(c1);
        r.container.add_node(
            Node::new("c2")
                .with_child(TopologyKind::Endpoint, &server)
                .with_set(NAME_SET, StringSet::from_items(["nginx"])),
        );
        r
    }

    #[test]
    fn test_outgoing_three_sockets_one_row_count_three() {
        let r = three_connection_report();
        let cols = SummaryColumns::default();
        let c1 = r.container.node("c1").expect("c1 present");

        let summary = outgoing_summary(&cols, &r, "container", c1, &r.container);

        assert_eq!(summary.id, "outgoing-connections");
        assert_eq!(summary.label, "Outbound");
        assert_eq!(summary.connections.len(), 1);

        let row = &summary.connections[0];
        assert_eq!(row.node_id, "c2");
        assert_eq!(row.label, "nginx");
        assert!(row.linkable);
        assert_eq!(
            row.metadata,
            vec![
                MetadataRow {
                    id: "port".to_string(),
                    value: "80".to_string(),
                    datatype: "number".to_string(),
                },
                MetadataRow {
                    id: "count".to_string(),
                    value: "3".to_string(),
                    datatype: "number".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_incoming_mirrors_outgoing() {
        let r = three_connection_report();
        let cols = SummaryColumns::default();
        let c2 = r.container.node("c2").expect("c2 present");

        let summary = incoming_summary(&cols, &r, "container", c2, &r.container);

        assert_eq!(summary.id, "incoming-connections");
        assert_eq!(summary.label, "Inbound");
        assert_eq!(summary.connections.len(), 1);

        let row = &summary.connections[0];
        assert_eq!(row.node_id, "c1");
        assert!(row.linkable);
        assert_eq!(row.metadata[0].value, "80");
        assert_eq!(row.metadata[1].value, "3");
    }

    #[test]
    fn test_normal_node_uses_normal_columns() {
        let r = three_connection_report();
        let cols = SummaryColumns::default();
        let c1 = r.container.node("c1").expect("c1 present");

        let summary = outgoing_summary(&cols, &r, "container", c1, &r.container);
        let ids: Vec<&str> = summary.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["port", "count"]);
        assert!(summary.columns[1].default_sort);
    }

    #[test]
    fn test_undecodable_endpoint_ids_are_skipped() {
        let mut r = Report::new();
        r.endpoint
            .add_node(Node::new("not-an-endpoint-id").with_adjacent("also-bad"));
        r.container.add_node(
            Node::new("c1")
                .with_adjacent("c2")
                .with_child(TopologyKind::Endpoint, "not-an-endpoint-id"),
        );
        r.container
            .add_node(Node::new("c2").with_child(TopologyKind::Endpoint, "also-bad"));

        let cols = SummaryColumns::default();
        let c1 = r.container.node("c1").expect("c1 present");
        let summary = outgoing_summary(&cols, &r, "container", c1, &r.container);
        assert!(summary.connections.is_empty());
    }

    /// Incoming internet traffic to container web: two external peers on
    /// the same server port.
    fn internet_report() -> Report {
        let server = eid("host-a", "10.0.0.1", "443");
        let peer1 = eid("", "203.0.113.7", "51000");
        let peer2 = eid("", "198.51.100.9", "52000");

        let mut r = Report::new();
        r.endpoint
            .add_node(Node::new(&peer1).with_adjacent(&server));
        r.endpoint.add_node(
            Node::new(&peer2)
                .with_adjacent(&server)
                .with_set(REVERSE_DNS_SET, StringSet::from_items(["crawler.example"])),
        );
        r.endpoint.add_node(Node::new(&server));

        r.container.add_node(
            Node::new("in-theinternet")
                .with_kind(NodeKind::IncomingInternet)
                .with_adjacent("web")
                .with_child(TopologyKind::Endpoint, &peer1)
                .with_child(TopologyKind::Endpoint, &peer2),
        );
        r.container
            .add_node(Node::new("web").with_child(TopologyKind::Endpoint, &server));

        r.addresses.insert(
            "203.0.113.7",
            AddressRecord {
                reverse: StringSet::from_items(["scanner.example"]),
                ..Default::default()
            },
        );
        r
    }

    #[test]
    fn test_internet_peers_stay_distinct_rows() {
        let r = internet_report();
        let cols = SummaryColumns::default();
        let internet = r.container.node("in-theinternet").expect("present");

        let summary = outgoing_summary(&cols, &r, "container", internet, &r.container);

        // Same remote, same port, same count — still two rows, one per
        // external address.
        assert_eq!(summary.connections.len(), 2);
        assert_ne!(summary.connections[0].id, summary.connections[1].id);
        for row in &summary.connections {
            assert_eq!(row.metadata.last().map(|m| m.value.as_str()), Some("1"));
        }
    }

    #[test]
    fn test_internet_rows_carry_local_address_metadata() {
        let r = internet_report();
        let cols = SummaryColumns::default();
        let internet = r.container.node("in-theinternet").expect("present");

        let summary = outgoing_summary(&cols, &r, "container", internet, &r.container);
        let ids: Vec<&str> = summary.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["remoteAddress", "port", "count"]);

        let values: Vec<&str> = summary
            .connections
            .iter()
            .map(|row| row.metadata[0].value.as_str())
            .collect();
        // 198.51.100.9 resolves through the endpoint's reverse-DNS
        // evidence; 203.0.113.7 through the address table.
        assert!(values.contains(&"crawler.example (198.51.100.9)"));
        assert!(values.contains(&"scanner.example (203.0.113.7)"));
        for row in &summary.connections {
            assert_eq!(row.metadata[0].datatype, "text");
        }
    }

    #[test]
    fn test_internet_local_address_falls_back_to_bare_address() {
        let mut r = internet_report();
        // Strip all reverse evidence.
        r.addresses = Default::default();
        let peer2 = eid("", "198.51.100.9", "52000");
        if let Some(node) = r.endpoint.nodes.get_mut(&peer2) {
            node.sets.clear();
        }

        let cols = SummaryColumns::default();
        let internet = r.container.node("in-theinternet").expect("present");
        let summary = outgoing_summary(&cols, &r, "container", internet, &r.container);

        let values: Vec<&str> = summary
            .connections
            .iter()
            .map(|row| row.metadata[0].value.as_str())
            .collect();
        assert!(values.contains(&"203.0.113.7"));
        assert!(values.contains(&"198.51.100.9"));
    }

    #[test]
    fn test_counts_only_cover_rendered_nodes() {
        let r = three_connection_report();
        let cols = SummaryColumns::default();
        let c1 = r.container.node("c1").expect("c1 present").clone();

        // Drop c2 from the rendered node set, as if it expired between the
        // edge observation and this query.
        let mut nodes = r.container.clone();
        nodes.nodes.remove("c2");

        let summary = outgoing_summary(&cols, &r, "container", &c1, &nodes);
        assert!(summary.connections.is_empty());
    }

    #[test]
    fn test_unresolvable_remote_with_address_is_not_linkable() {
        // Exercise materialization directly: a counted key whose remote no
        // longer resolves but whose address was captured.
        let r = Report::new();
        let nodes = Topology::new();
        let mut counts = HashMap::new();
        counts.insert(
            ConnectionKey {
                remote_node_id: "gone".to_string(),
                remote_addr: "192.0.2.44".to_string(),
                local_node_id: "c1".to_string(),
                local_addr: String::new(),
                port: "443".to_string(),
            },
            2,
        );

        let rows = connection_rows(&r, &nodes, counts, false);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].label, "192.0.2.44");
        assert!(!rows[0].linkable);
        assert_eq!(rows[0].node_id, "");
    }

    #[test]
    fn test_rows_are_sorted_and_deterministic() {
        let r = internet_report();
        let cols = SummaryColumns::default();
        let internet = r.container.node("in-theinternet").expect("present");

        let a = outgoing_summary(&cols, &r, "container", internet, &r.container);
        let b = outgoing_summary(&cols, &r, "container", internet, &r.container);

        let ja = serde_json::to_string(&a).expect("serializable");
        let jb = serde_json::to_string(&b).expect("serializable");
        assert_eq!(ja, jb);

        let ids: Vec<&str> = a.connections.iter().map(|c| c.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_row_id_concatenates_all_key_fields() {
        let key = ConnectionKey {
            remote_node_id: "r".to_string(),
            remote_addr: "1.2.3.4".to_string(),
            local_node_id: "l".to_string(),
            local_addr: "5.6.7.8".to_string(),
            port: "80".to_string(),
        };
        assert_eq!(key.row_id(), "r:1.2.3.4-l:5.6.7.8-80");
    }
}
