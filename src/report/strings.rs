use std::slice;

use serde::{Deserialize, Serialize};

/// An ordered, deduplicated collection of strings.
///
/// The canonical order is sort order, so two sets with identical membership
/// serialize byte-identically. Every operation returns a new set; existing
/// sets are never mutated, which is what makes report merges safe to run
/// against snapshots that readers are still holding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StringSet(Vec<String>);

impl StringSet {
    /// Creates an empty set. The empty set is the merge identity.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Builds a set from arbitrary items, sorting and deduplicating.
    pub fn from_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<String> = items.into_iter().map(Into::into).collect();
        values.sort();
        values.dedup();
        Self(values)
    }

    /// Returns a new set with `value` inserted at its sorted position.
    pub fn add(&self, value: &str) -> Self {
        let mut values = self.0.clone();
        if let Err(pos) = values.binary_search_by(|v| v.as_str().cmp(value)) {
            values.insert(pos, value.to_string());
        }
        Self(values)
    }

    /// Whether `value` is a member of the set.
    pub fn contains(&self, value: &str) -> bool {
        self.0.binary_search_by(|v| v.as_str().cmp(value)).is_ok()
    }

    /// Returns the sorted, deduplicated union of the two sets.
    ///
    /// Commutative, associative, and idempotent, with the empty set as
    /// identity. The larger operand is copied and the smaller folded into
    /// the copy, bounding allocation by the larger side — across repeated
    /// incremental merges the accumulated aggregate is the larger side.
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

        let mut values = base.0.clone();
        for value in &fold.0 {
            if let Err(pos) = values.binary_search(value) {
                values.insert(pos, value.clone());
            }
        }
        Self(values)
    }

    /// Returns the members present in both sets, via a single sorted walk.
    pub fn intersection(&self, other: &Self) -> Self {
        let mut values = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            match self.0[i].cmp(&other.0[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    values.push(self.0[i].clone());
                    i += 1;
                    j += 1;
                }
            }
        }
        Self(values)
    }

    /// First member in canonical order, if any.
    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates members in canonical order.
    pub fn iter(&self) -> slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for StringSet {
    fn from(mut values: Vec<String>) -> Self {
        values.sort();
        values.dedup();
        Self(values)
    }
}

impl From<StringSet> for Vec<String> {
    fn from(set: StringSet) -> Self {
        set.0
    }
}

impl<'a> IntoIterator for &'a StringSet {
    type Item = &'a String;
    type IntoIter = slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
