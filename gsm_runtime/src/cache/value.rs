use std::collections::HashMap;

use crate::{cache::AccessKey, RuntimeResult};

/// Most recently observed element bytes per access key.
///
/// Populated only by loads and stores that actually crossed to another
/// process; already-local accesses read their own buffer directly. A hit
/// short-circuits all resolution work.
#[derive(Default)]
pub struct ValueCache {
    map: HashMap<AccessKey, Vec<u8>>,
}

impl ValueCache {
    pub fn get(&self, key: &AccessKey) -> Option<&[u8]> {
        self.map.get(key).map(Vec::as_slice)
    }

    /// Copy `bytes` in under `key`. Allocation failure while copying the
    /// element surfaces as a catchable error instead of an abort.
    pub fn insert(&mut self, key: AccessKey, bytes: &[u8]) -> RuntimeResult<()> {
        let mut copy = Vec::new();
        copy.try_reserve_exact(bytes.len())?;
        copy.extend_from_slice(bytes);
        self.map.try_reserve(1)?;
        self.map.insert(key, copy);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn purge(&mut self, addr: u64) {
        self.map.retain(|(base, _), _| *base != addr);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_miss_and_purge() {
        let mut cache = ValueCache::default();
        let key_a: AccessKey = (0x1000, vec![3]);
        let key_b: AccessKey = (0x2000, vec![1, 2]);
        cache.insert(key_a.clone(), &[1, 2, 3, 4]).unwrap();
        cache.insert(key_b.clone(), &[9; 8]).unwrap();

        assert_eq!(cache.get(&key_a), Some(&[1, 2, 3, 4][..]));
        assert_eq!(cache.get(&(0x1000, vec![4])), None);

        cache.insert(key_a.clone(), &[5, 6, 7, 8]).unwrap();
        assert_eq!(cache.get(&key_a), Some(&[5, 6, 7, 8][..]), "last value wins");

        cache.purge(0x1000);
        assert_eq!(cache.get(&key_a), None);
        assert_eq!(cache.get(&key_b), Some(&[9; 8][..]));

        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
