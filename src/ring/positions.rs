use super::hash::KeyRange;
use crate::error::RingError;

/// Sorted set of occupied ring positions.
///
/// Mutations are pure: they hand back a new ring so the coordinator can
/// diff old and new ranges before committing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ring {
    positions: Vec<u128>,
}

impl Ring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn positions(&self) -> &[u128] {
        &self.positions
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, pos: u128) -> bool {
        self.positions.binary_search(&pos).is_ok()
    }

    pub fn add_position(&self, pos: u128) -> Result<Ring, RingError> {
        match self.positions.binary_search(&pos) {
            Ok(_) => Err(RingError::PositionCollision(pos)),
            Err(idx) => {
                let mut positions = self.positions.clone();
                positions.insert(idx, pos);
                Ok(Ring { positions })
            }
        }
    }

    pub fn remove_position(&self, pos: u128) -> Ring {
        let positions = self
            .positions
            .iter()
            .copied()
            .filter(|p| *p != pos)
            .collect();
        Ring { positions }
    }

    /// Range owned by the node at `pos`: `(predecessor, pos]`.
    pub fn range_for(&self, pos: u128) -> Option<KeyRange> {
        let idx = self.positions.binary_search(&pos).ok()?;
        let n = self.positions.len();
        let pred = self.positions[(idx + n - 1) % n];
        Some(KeyRange::new(pred.wrapping_add(1), pos))
    }

    pub fn ranges(&self) -> Vec<(u128, KeyRange)> {
        self.positions
            .iter()
            .filter_map(|pos| self.range_for(*pos).map(|range| (*pos, range)))
            .collect()
    }
}
