use std::collections::HashMap;

use itertools::Itertools;

/// One pending aggregated write: element displacement at the destination
/// rank plus the value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub disp: usize,
    pub bytes: Vec<u8>,
}

/// Write-aggregation cache: per abstraction, per destination rank, the
/// pending writes in insertion order. Flushing turns each destination's list
/// into a single scatter put; the runtime drives that because it needs the
/// windows.
pub struct WriteBatch {
    map: HashMap<u64, HashMap<i32, Vec<PendingWrite>>>,
    limit: usize,
}

impl WriteBatch {
    pub fn new(limit: usize) -> Self {
        Self {
            map: HashMap::new(),
            limit,
        }
    }

    /// Append a pending write. Returns true when the destination's list has
    /// hit the configured limit and must be flushed now.
    pub fn insert(&mut self, base: u64, rank: i32, disp: usize, bytes: &[u8]) -> bool {
        let list = self
            .map
            .entry(base)
            .or_default()
            .entry(rank)
            .or_default();
        list.push(PendingWrite {
            disp,
            bytes: bytes.to_vec(),
        });
        list.len() >= self.limit
    }

    /// Remove and return the pending list for one destination.
    pub fn take(&mut self, base: u64, rank: i32) -> Vec<PendingWrite> {
        self.map
            .get_mut(&base)
            .and_then(|dests| dests.remove(&rank))
            .unwrap_or_default()
    }

    /// Remove and return everything pending for one abstraction, ordered by
    /// destination rank.
    pub fn drain_abstraction(&mut self, base: u64) -> Vec<(i32, Vec<PendingWrite>)> {
        match self.map.remove(&base) {
            Some(dests) => dests.into_iter().sorted_by_key(|(rank, _)| *rank).collect(),
            None => Vec::new(),
        }
    }

    /// Remove and return everything pending, deterministically ordered.
    pub fn drain_all(&mut self) -> Vec<(u64, i32, Vec<PendingWrite>)> {
        let bases: Vec<u64> = self.map.keys().copied().sorted().collect();
        let mut out = Vec::new();
        for base in bases {
            for (rank, list) in self.drain_abstraction(base) {
                out.push((base, rank, list));
            }
        }
        out
    }

    /// Drop pending writes for a freed abstraction without flushing.
    pub fn forget(&mut self, base: u64) {
        self.map.remove(&base);
    }

    pub fn is_empty(&self) -> bool {
        self.map.values().all(|dests| dests.values().all(Vec::is_empty))
    }
}

/// Sort a pending list by displacement (stable, so insertion order breaks
/// ties), keep only the last write per displacement, and pack the survivors
/// into the displacement array and contiguous value buffer of one scatter
/// put.
pub fn pack(pending: Vec<PendingWrite>) -> (Vec<i32>, Vec<u8>) {
    let mut disps: Vec<i32> = Vec::new();
    let mut packed: Vec<u8> = Vec::new();
    let mut kept: Vec<PendingWrite> = Vec::new();
    for write in pending.into_iter().sorted_by_key(|w| w.disp) {
        match kept.last_mut() {
            Some(last) if last.disp == write.disp => *last = write,
            _ => kept.push(write),
        }
    }
    for write in kept {
        disps.push(write.disp as i32);
        packed.extend_from_slice(&write.bytes);
    }
    (disps, packed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

    #[test]
    fn pack_sorts_by_displacement() {
        let pending = vec![
            PendingWrite { disp: 9, bytes: vec![9, 0, 0, 0] },
            PendingWrite { disp: 1, bytes: vec![1, 0, 0, 0] },
            PendingWrite { disp: 4, bytes: vec![4, 0, 0, 0] },
        ];
        let (disps, packed) = pack(pending);
        assert_eq!(disps, vec![1, 4, 9]);
        assert_eq!(packed, vec![1, 0, 0, 0, 4, 0, 0, 0, 9, 0, 0, 0]);
    }

    #[test]
    fn pack_keeps_last_insertion_per_displacement() {
        let pending = vec![
            PendingWrite { disp: 2, bytes: vec![10] },
            PendingWrite { disp: 7, bytes: vec![70] },
            PendingWrite { disp: 2, bytes: vec![11] },
            PendingWrite { disp: 2, bytes: vec![12] },
        ];
        let (disps, packed) = pack(pending);
        assert_eq!(disps, vec![2, 7]);
        assert_eq!(packed, vec![12, 70]);
    }

    #[test]
    fn pack_arbitrary_insertion_order() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut pending: Vec<PendingWrite> = (0u8..50)
            .map(|k| PendingWrite {
                disp: k as usize,
                bytes: vec![k],
            })
            .collect();
        pending.shuffle(&mut rng);
        let (disps, packed) = pack(pending);
        assert_eq!(disps, (0..50).collect::<Vec<i32>>());
        assert_eq!(packed, (0u8..50).collect::<Vec<u8>>());
    }

    #[test]
    fn limit_signals_forced_flush() {
        let mut batch = WriteBatch::new(3);
        assert!(!batch.insert(0x10, 1, 0, &[0; 4]));
        assert!(!batch.insert(0x10, 1, 1, &[0; 4]));
        assert!(!batch.insert(0x10, 2, 2, &[0; 4]), "other destination counts alone");
        assert!(batch.insert(0x10, 1, 2, &[0; 4]));

        assert_eq!(batch.take(0x10, 1).len(), 3);
        assert_eq!(batch.take(0x10, 1).len(), 0);
        assert!(!batch.is_empty(), "destination 2 still pending");
    }

    #[test]
    fn drain_all_is_deterministic() {
        let mut batch = WriteBatch::new(100);
        batch.insert(0x20, 1, 0, &[1]);
        batch.insert(0x10, 3, 0, &[2]);
        batch.insert(0x10, 0, 0, &[3]);
        let order: Vec<(u64, i32)> = batch
            .drain_all()
            .into_iter()
            .map(|(base, rank, _)| (base, rank))
            .collect();
        assert_eq!(order, vec![(0x10, 0), (0x10, 3), (0x20, 1)]);
        assert!(batch.is_empty());
    }
}
