use std::collections::HashMap;

use log::{debug, error, info};
use mpi_fabric::{all_reduce, CommContext, DistributedMutex, ElemType, ReduceOp};

use crate::{
    cache::{pack, CacheSet, Resolved},
    Abstraction, Registry, RuntimeResult, Settings, SharedArray, SharedScalar,
};

/// The runtime context: fabric identity, registry, caches, and the mutex
/// table. Constructed once at process start, torn down by [`finalize`];
/// every operation of the binary call surface maps onto one method here.
///
/// [`finalize`]: Runtime::finalize
pub struct Runtime {
    ctx: CommContext,
    settings: Settings,
    registry: Registry,
    caches: CacheSet,
    mutexes: HashMap<u64, DistributedMutex>,
    next_mutex: u64,
}

impl Runtime {
    /// Process-wide bootstrap: bring up the fabric, read the environment
    /// configuration once, wire the caches.
    pub fn initialize(logging: bool) -> Self {
        if logging {
            env_logger::try_init().ok();
        }
        Self::new(CommContext::new(), Settings::from_env())
    }

    pub fn new(ctx: CommContext, settings: Settings) -> Self {
        info!(
            "runtime up: rank {}/{}, settings {:?}",
            ctx.rank(),
            ctx.size(),
            settings
        );
        let caches = CacheSet::new(&settings);
        Self {
            ctx,
            settings,
            registry: Registry::default(),
            caches,
            mutexes: HashMap::new(),
            next_mutex: 1,
        }
    }

    #[inline(always)]
    pub fn ctx(&self) -> &CommContext {
        &self.ctx
    }

    #[inline(always)]
    pub fn rank(&self) -> i32 {
        self.ctx.rank()
    }

    #[inline(always)]
    pub fn size(&self) -> i32 {
        self.ctx.size()
    }

    #[inline(always)]
    pub fn barrier(&self) {
        self.ctx.barrier()
    }

    /// Element size of the abstraction registered at `addr` itself; the
    /// binary surface uses it for scalar transfers.
    pub fn elem_size_of(&self, addr: u64) -> RuntimeResult<usize> {
        Ok(match self.registry.get(addr)? {
            Abstraction::Array(array) => array.ty().size_in_bytes(),
            Abstraction::Scalar(scalar) => scalar.ty().size_in_bytes(),
        })
    }

    /// Element size of the abstraction an access actually lands on. A
    /// pointer chain may cross datatypes (integer pointer levels over a
    /// float leaf), so value transfers are sized by the resolved target,
    /// never by the outermost abstraction.
    pub fn target_elem_size(&mut self, addr: u64, indices: &[i64]) -> RuntimeResult<usize> {
        let resolved = self.resolve_access(addr, indices)?;
        Ok(self.registry.array(resolved.base())?.ty().size_in_bytes())
    }

    // ---- allocation ----

    /// Collective: create a block-distributed shared array and register it.
    pub fn allocate_array(
        &mut self,
        size_bytes: usize,
        ty: ElemType,
        dims: u32,
    ) -> RuntimeResult<u64> {
        let array = SharedArray::new(&self.ctx, size_bytes, ty, dims)?;
        Ok(self.registry.insert(Abstraction::Array(array)))
    }

    /// Collective: create the shared shadow of the scalar program variable
    /// at `home`, seeded with `initial`.
    pub fn allocate_scalar(&mut self, home: u64, ty: ElemType, initial: &[u8]) -> u64 {
        let scalar = SharedScalar::new(&self.ctx, home, ty, initial);
        self.registry.insert(Abstraction::Scalar(scalar))
    }

    /// Collective: flush what is pending for `addr`, drop every cache entry
    /// referring to it, and destroy it. The registry removal is the single
    /// teardown path; any later access through `addr` is a usage violation.
    pub fn free(&mut self, addr: u64) -> RuntimeResult<()> {
        let drained = match &mut self.caches.writes {
            Some(writes) => writes.drain_abstraction(addr),
            None => Vec::new(),
        };
        for (rank, pending) in drained {
            let (disps, bytes) = pack(pending);
            self.registry
                .array_mut(addr)?
                .flush_batch(&self.ctx, rank, &disps, &bytes);
        }
        self.caches.purge_address(addr);
        let abs = self.registry.remove(addr)?;
        debug!("freeing abstraction {addr:#x}");
        drop(abs);
        Ok(())
    }

    // ---- element access ----

    fn resolve_access(&mut self, addr: u64, indices: &[i64]) -> RuntimeResult<Resolved> {
        let key = (addr, indices.to_vec());
        if let Some(cache) = &self.caches.resolve {
            if let Some(hit) = cache.get(&key) {
                return Ok(hit);
            }
        }
        let (base, linear) = self.registry.resolve(addr, indices)?;
        let (owner, _disp) = self.registry.array(base)?.owner_of(linear)?;
        let resolved = if owner == self.ctx.rank() {
            Resolved::Local { base, linear }
        } else {
            Resolved::Remote { base, linear }
        };
        if let Some(cache) = &mut self.caches.resolve {
            cache.insert(key, resolved);
        }
        Ok(resolved)
    }

    /// Parallel-region store of one element.
    pub fn store(&mut self, addr: u64, indices: &[i64], bytes: &[u8]) -> RuntimeResult<()> {
        match self.resolve_access(addr, indices)? {
            Resolved::Local { base, linear } => {
                self.registry.array_mut(base)?.write_local(linear, bytes);
                Ok(())
            }
            Resolved::Remote { base, linear } => {
                let (owner, disp) = self.registry.array(base)?.owner_of(linear)?;
                let mut flush_now = false;
                if let Some(writes) = &mut self.caches.writes {
                    flush_now = writes.insert(base, owner, disp, bytes);
                } else {
                    self.registry
                        .array_mut(base)?
                        .store(&self.ctx, linear, bytes)?;
                }
                if flush_now {
                    self.flush_destination(base, owner)?;
                }
                if let Some(values) = &mut self.caches.value {
                    values.insert((addr, indices.to_vec()), bytes)?;
                }
                Ok(())
            }
        }
    }

    /// Parallel-region load of one element.
    pub fn load(&mut self, addr: u64, indices: &[i64], out: &mut [u8]) -> RuntimeResult<()> {
        let key = (addr, indices.to_vec());
        if let Some(values) = &self.caches.value {
            if let Some(hit) = values.get(&key) {
                out.copy_from_slice(hit);
                return Ok(());
            }
        }
        match self.resolve_access(addr, indices)? {
            Resolved::Local { base, linear } => {
                self.registry.array(base)?.read_local(linear, out);
                Ok(())
            }
            Resolved::Remote { base, linear } => {
                if self.settings.readahead > 0 {
                    let fetched = self.registry.array(base)?.load_run(
                        &self.ctx,
                        linear,
                        self.settings.readahead_stride,
                        self.settings.readahead,
                    )?;
                    out.copy_from_slice(&fetched.runs[0]);
                    if fetched.crossed {
                        if let Some(values) = &mut self.caches.value {
                            for (step, bytes) in fetched.runs.iter().enumerate() {
                                let mut stepped = indices.to_vec();
                                if let Some(last) = stepped.last_mut() {
                                    *last += (step * self.settings.readahead_stride) as i64;
                                }
                                values.insert((addr, stepped), bytes)?;
                            }
                        }
                    }
                } else {
                    let crossed = self.registry.array(base)?.load(&self.ctx, linear, out)?;
                    if crossed {
                        if let Some(values) = &mut self.caches.value {
                            values.insert(key, out)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Collective synchronous store; bypasses every cache.
    pub fn sequential_store(
        &mut self,
        addr: u64,
        indices: &[i64],
        bytes: &[u8],
    ) -> RuntimeResult<()> {
        let (base, linear) = self.registry.resolve(addr, indices)?;
        self.registry
            .array_mut(base)?
            .sequential_store(&self.ctx, linear, bytes)
    }

    /// Collective synchronous load; bypasses every cache.
    pub fn sequential_load(
        &mut self,
        addr: u64,
        indices: &[i64],
        out: &mut [u8],
    ) -> RuntimeResult<()> {
        let (base, linear) = self.registry.resolve(addr, indices)?;
        self.registry
            .array(base)?
            .sequential_load(&self.ctx, linear, out)
    }

    /// Record `src` as the pointer stored at `dest[index]`.
    pub fn pointer_store(&mut self, dest: u64, src: u64, index: usize) -> RuntimeResult<()> {
        self.registry.array_mut(dest)?.pointer_store(index, src)
    }

    // ---- scalars ----

    pub fn scalar_store(&mut self, addr: u64, bytes: &[u8]) -> RuntimeResult<()> {
        let ctx = self.ctx.clone();
        self.registry.scalar_mut(addr)?.store(&ctx, bytes);
        Ok(())
    }

    pub fn scalar_load(&self, addr: u64, out: &mut [u8]) -> RuntimeResult<()> {
        self.registry.scalar(addr)?.load(&self.ctx, out);
        Ok(())
    }

    /// Collective; returns the synchronized value for finalization into the
    /// program variable.
    pub fn scalar_synchronize(&mut self, addr: u64, out: &mut [u8]) -> RuntimeResult<()> {
        let ctx = self.ctx.clone();
        let value = self.registry.scalar_mut(addr)?.synchronize(&ctx);
        out.copy_from_slice(value);
        Ok(())
    }

    // ---- mutexes ----

    /// Collective: create a distributed mutex and hand back its handle. The
    /// home rank rotates with the handle so waitlists spread over the world;
    /// the handle also keys the mutex's hand-off tag.
    pub fn mutex_init(&mut self) -> u64 {
        let handle = self.next_mutex;
        self.next_mutex += 1;
        let home = (handle % self.ctx.size() as u64) as i32;
        let mutex = DistributedMutex::new(&self.ctx, home, handle as i32);
        self.mutexes.insert(handle, mutex);
        handle
    }

    pub fn mutex_enter(&self, handle: u64) -> RuntimeResult<()> {
        self.mutex(handle)?.lock(&self.ctx);
        Ok(())
    }

    pub fn mutex_try_enter(&self, handle: u64) -> RuntimeResult<bool> {
        Ok(self.mutex(handle)?.try_lock(&self.ctx))
    }

    pub fn mutex_leave(&self, handle: u64) -> RuntimeResult<()> {
        self.mutex(handle)?.unlock(&self.ctx);
        Ok(())
    }

    /// Collective teardown of one mutex.
    pub fn mutex_finalize(&mut self, handle: u64) -> RuntimeResult<()> {
        let mutex = self
            .mutexes
            .remove(&handle)
            .ok_or(crate::RuntimeError::UnknownMutex(handle))?;
        mutex.destroy(&self.ctx);
        Ok(())
    }

    fn mutex(&self, handle: u64) -> RuntimeResult<&DistributedMutex> {
        self.mutexes
            .get(&handle)
            .ok_or(crate::RuntimeError::UnknownMutex(handle))
    }

    // ---- reductions ----

    /// All-to-all reduction of the local partial in `bytes`, in place.
    pub fn reduce_local(&self, bytes: &mut [u8], ty: ElemType, op: ReduceOp) {
        all_reduce(&self.ctx, bytes, ty, op);
    }

    // ---- epochs ----

    fn flush_destination(&mut self, base: u64, rank: i32) -> RuntimeResult<()> {
        let pending = match &mut self.caches.writes {
            Some(writes) => writes.take(base, rank),
            None => return Ok(()),
        };
        if pending.is_empty() {
            return Ok(());
        }
        let (disps, bytes) = pack(pending);
        self.registry
            .array_mut(base)?
            .flush_batch(&self.ctx, rank, &disps, &bytes);
        Ok(())
    }

    /// The epoch boundary: invalidate the read-side caches wholesale and
    /// force out every pending aggregated write. Invoked at entry into each
    /// parallel region; this is the system's only inter-process coherence
    /// mechanism.
    pub fn strong_flush(&mut self) -> RuntimeResult<()> {
        self.caches.clear_reads();
        let drained = match &mut self.caches.writes {
            Some(writes) => writes.drain_all(),
            None => Vec::new(),
        };
        for (base, rank, pending) in drained {
            let (disps, bytes) = pack(pending);
            self.registry
                .array_mut(base)?
                .flush_batch(&self.ctx, rank, &disps, &bytes);
        }
        Ok(())
    }

    /// Process-wide teardown: flush, destroy surviving mutexes and
    /// abstractions in deterministic order (window frees are collective),
    /// then close the fabric. Last runtime call of the process.
    pub fn finalize(mut self) {
        if let Err(err) = self.strong_flush() {
            error!("final flush failed: {err}");
        }
        let mut handles: Vec<u64> = self.mutexes.keys().copied().collect();
        handles.sort_unstable();
        for handle in handles {
            if let Some(mutex) = self.mutexes.remove(&handle) {
                mutex.destroy(&self.ctx);
            }
        }
        for abs in self.registry.drain_in_creation_order() {
            drop(abs);
        }
        self.ctx.barrier();
        CommContext::finalize();
    }
}
