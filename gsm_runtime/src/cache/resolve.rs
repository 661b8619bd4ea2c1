use std::collections::HashMap;

use crate::cache::AccessKey;

/// Outcome of resolving an access key down to storage, memoized so the
/// registry walk (and with it the nested-vs-flattened layout decision) runs
/// once per key per epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// The access lands in this process's own partition; a direct local copy
    /// suffices.
    Local { base: u64, linear: usize },
    /// Resolution is done but the element lives elsewhere; the remote
    /// operation is still required.
    Remote { base: u64, linear: usize },
}

impl Resolved {
    #[inline(always)]
    pub fn base(&self) -> u64 {
        match self {
            Resolved::Local { base, .. } | Resolved::Remote { base, .. } => *base,
        }
    }
}

/// The TLB-like cache: access key to resolved target.
#[derive(Default)]
pub struct ResolveCache {
    map: HashMap<AccessKey, Resolved>,
}

impl ResolveCache {
    pub fn get(&self, key: &AccessKey) -> Option<Resolved> {
        self.map.get(key).copied()
    }

    pub fn insert(&mut self, key: AccessKey, resolved: Resolved) {
        self.map.insert(key, resolved);
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Drop entries keyed by `addr` and entries whose resolved target is
    /// `addr` (a freed inner abstraction reached through an outer one).
    pub fn purge(&mut self, addr: u64) {
        self.map
            .retain(|(base, _), resolved| *base != addr && resolved.base() != addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_covers_resolved_targets() {
        let mut cache = ResolveCache::default();
        cache.insert(
            (0x10, vec![0, 1]),
            Resolved::Remote {
                base: 0x90,
                linear: 7,
            },
        );
        cache.insert((0x20, vec![2]), Resolved::Local { base: 0x20, linear: 2 });

        cache.purge(0x90);
        assert_eq!(cache.get(&(0x10, vec![0, 1])), None, "inner target freed");
        assert!(cache.get(&(0x20, vec![2])).is_some());

        cache.purge(0x20);
        assert_eq!(cache.get(&(0x20, vec![2])), None);
    }
}
