use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::strings::StringSet;

/// Accumulated naming evidence for one network address.
///
/// Forward holds names observed to resolve to the address; reverse holds
/// names the address resolves to (reverse DNS). Evidence from different
/// probes may conflict; both sides are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Names that resolve to this address.
    #[serde(default, skip_serializing_if = "StringSet::is_empty")]
    pub forward: StringSet,

    /// Names this address resolves to.
    #[serde(default, skip_serializing_if = "StringSet::is_empty")]
    pub reverse: StringSet,
}

impl AddressRecord {
    /// Field-wise evidence union. Neither operand is mutated.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            forward: self.forward.merge(&other.forward),
            reverse: self.reverse.merge(&other.reverse),
        }
    }
}

/// Address → naming-evidence table carried by every report.
///
/// For each address the stored record is the union of all evidence ever
/// observed for it across every probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressTable(HashMap<String, AddressRecord>);

impl AddressTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Inserts evidence for one address, merging with any existing record.
    /// Used when building a partial report, before it is published.
    pub fn insert(&mut self, addr: impl Into<String>, record: AddressRecord) {
        let addr = addr.into();
        match self.0.get_mut(&addr) {
            Some(existing) => {
                let merged = existing.merge(&record);
                *existing = merged;
            }
            None => {
                self.0.insert(addr, record);
            }
        }
    }

    /// Looks up the record for one address.
    pub fn get(&self, addr: &str) -> Option<&AddressRecord> {
        self.0.get(addr)
    }

    /// Number of addresses with evidence.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates (address, record) pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AddressRecord)> {
        self.0.iter()
    }

    /// Returns a fresh table holding the union of both tables.
    ///
    /// Keys present in only one table pass through unchanged; shared keys
    /// get a field-wise [`AddressRecord::merge`]. Commutativity,
    /// associativity, and idempotence are inherited from the evidence-set
    /// merge. The larger table is copied and the smaller folded in.
    pub fn merge(&self, other: &Self) -> Self {
        if self.0.is_empty() {
            return other.clone();
        }
        if other.0.is_empty() {
            return self.clone();
        }

        let (base, fold) = if self.0.len() >= other.0.len() {
            (self, other)
        } else {
            (other, self)
        };

        let mut table = base.0.clone();
        for (addr, record) in &fold.0 {
            match table.get_mut(addr) {
                Some(existing) => {
                    let merged = existing.merge(record);
                    *existing = merged;
                }
                None => {
                    table.insert(addr.clone(), record.clone());
                }
            }
        }
        Self(table)
    }
}
