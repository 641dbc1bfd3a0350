use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use super::hash::{KeyRange, hash};
use crate::error::MetadataError;

/// A node's view of who owns which slice of the ring.
///
/// Wire form is `start_hex,end_hex,host:port;` repeated. Entries are written
/// in ring order but readers must not rely on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: HashMap<String, KeyRange>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single owner of the whole circle. A fresh client starts from this.
    pub fn full_ring(node: &str) -> Self {
        let mut metadata = Self::new();
        metadata.insert(node, KeyRange::full());
        metadata
    }

    pub fn insert(&mut self, node: &str, range: KeyRange) {
        self.entries.insert(node.to_string(), range);
    }

    pub fn remove(&mut self, node: &str) -> Option<KeyRange> {
        self.entries.remove(node)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_node(&self, node: &str) -> bool {
        self.entries.contains_key(node)
    }

    pub fn range_of(&self, node: &str) -> Option<KeyRange> {
        self.entries.get(node).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &KeyRange)> {
        self.entries.iter()
    }

    pub fn owner_of(&self, h: u128) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, range)| range.contains(h))
            .map(|(name, _)| name.as_str())
    }

    pub fn owner_of_key(&self, key: &str) -> Option<&str> {
        self.owner_of(hash(key))
    }

    /// Node names sorted by range end, i.e. by ring position.
    pub fn node_order(&self) -> Vec<String> {
        let mut order: Vec<(&String, &KeyRange)> = self.entries.iter().collect();
        order.sort_by_key(|(_, range)| range.end);
        order.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// First and second successor of `node`. The second is only defined
    /// for rings of three or more nodes.
    pub fn successors(&self, node: &str) -> (Option<String>, Option<String>) {
        self.neighbours(node, |i, k, n| (i + k) % n)
    }

    /// First and second predecessor of `node`, with the same arity rules
    /// as [`Metadata::successors`].
    pub fn predecessors(&self, node: &str) -> (Option<String>, Option<String>) {
        self.neighbours(node, |i, k, n| (i + n - k) % n)
    }

    fn neighbours(
        &self,
        node: &str,
        step: impl Fn(usize, usize, usize) -> usize,
    ) -> (Option<String>, Option<String>) {
        let order = self.node_order();
        let n = order.len();
        let Some(i) = order.iter().position(|name| name == node) else {
            return (None, None);
        };
        if n < 2 {
            return (None, None);
        }

        let first = Some(order[step(i, 1, n)].clone());
        let second = if n >= 3 {
            Some(order[step(i, 2, n)].clone())
        } else {
            None
        };
        (first, second)
    }

    /// Ranges a node may serve reads for: its own plus the ranges it holds
    /// as replica. Each start is widened to the start of the furthest
    /// predecessor it replicates.
    pub fn read_view(&self) -> Metadata {
        let mut view = Metadata::new();
        for (name, range) in &self.entries {
            let (pred1, pred2) = self.predecessors(name);
            let widened = pred2
                .or(pred1)
                .and_then(|pred| self.range_of(&pred))
                .map(|pred_range| KeyRange::new(pred_range.start, range.end))
                .unwrap_or(*range);
            view.insert(name, widened);
        }
        view
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.node_order() {
            if let Some(range) = self.entries.get(&name) {
                write!(f, "{},{};", range, name)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Metadata {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut metadata = Metadata::new();

        for segment in s.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }

            let parts: Vec<&str> = segment.split(',').map(str::trim).collect();
            let [start, end, name] = parts.as_slice() else {
                return Err(MetadataError::MalformedEntry(segment.to_string()));
            };
            if name.is_empty() {
                return Err(MetadataError::MalformedEntry(segment.to_string()));
            }

            let start = u128::from_str_radix(start, 16)
                .map_err(|_| MetadataError::InvalidHex(segment.to_string()))?;
            let end = u128::from_str_radix(end, 16)
                .map_err(|_| MetadataError::InvalidHex(segment.to_string()))?;

            metadata.insert(name, KeyRange::new(start, end));
        }

        Ok(metadata)
    }
}
