//! The three independent caches sitting in front of the registry and the
//! abstractions: value, address resolution, write aggregation. All are
//! process-local, keyed by (abstraction base address, access-index tuple),
//! and invalidated wholesale at every strong flush; coherence between
//! processes is epoch-bounded, never fine-grained.

mod resolve;
mod value;
mod write_batch;

pub use resolve::{Resolved, ResolveCache};
pub use value::ValueCache;
pub use write_batch::{pack, PendingWrite, WriteBatch};

use crate::Settings;

/// Compound cache key: abstraction base address plus the raw index tuple of
/// the access.
pub type AccessKey = (u64, Vec<i64>);

/// The independently enablable cache trio, wired up once at startup.
pub struct CacheSet {
    pub value: Option<ValueCache>,
    pub resolve: Option<ResolveCache>,
    pub writes: Option<WriteBatch>,
}

impl CacheSet {
    pub fn new(settings: &Settings) -> Self {
        Self {
            value: settings.value_cache.then(ValueCache::default),
            resolve: settings.resolve_cache.then(ResolveCache::default),
            writes: settings
                .write_batch
                .then(|| WriteBatch::new(settings.write_batch_limit)),
        }
    }

    /// Drop every read-side entry; the write batch is drained separately
    /// because flushing needs the windows.
    pub fn clear_reads(&mut self) {
        if let Some(values) = &mut self.value {
            values.clear();
        }
        if let Some(resolve) = &mut self.resolve {
            resolve.clear();
        }
    }

    /// Remove everything referring to a freed abstraction.
    pub fn purge_address(&mut self, addr: u64) {
        if let Some(values) = &mut self.value {
            values.purge(addr);
        }
        if let Some(resolve) = &mut self.resolve {
            resolve.purge(addr);
        }
        if let Some(writes) = &mut self.writes {
            writes.forget(addr);
        }
    }
}
