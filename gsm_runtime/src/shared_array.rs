use log::debug;
use mpi_fabric::{CommContext, ElemType, LockKind, MemWindow};

use crate::{PartitionTable, RuntimeError, RuntimeResult};

/// A block-distributed 1-D shared buffer exposed through remote get/put.
///
/// Every rank keeps a full-logical-size local buffer; the window exposes only
/// the locally owned partition of it, so the buffer base doubles as the
/// abstraction's externally visible address and interior addresses stay
/// meaningful for the flattened multi-dimensional layout. Unowned parts of
/// the buffer are never authoritative.
pub struct SharedArray {
    win: MemWindow,
    // Full logical size, zero filled; the window points into it, so the
    // vector must never reallocate.
    local: Vec<u8>,
    part: PartitionTable,
    ty: ElemType,
    elems: usize,
    // Pointer mirror for abstractions of pointer depth >= 2, written by
    // pointer_store. Zero means unset.
    pointers: Vec<u64>,
}

/// Elements brought in by one load; the first run entry is the requested
/// element, the rest follow at stride spacing.
pub struct Fetched {
    pub crossed: bool,
    pub runs: Vec<Vec<u8>>,
}

impl SharedArray {
    /// Collective: every rank allocates its partition and exposes it.
    pub fn new(
        ctx: &CommContext,
        size_bytes: usize,
        ty: ElemType,
        dims: u32,
    ) -> RuntimeResult<Self> {
        let es = ty.size_in_bytes();
        let elems = size_bytes / es;
        let part = PartitionTable::block(elems, ctx.size() as usize)?;
        let mut local = vec![0u8; elems * es];
        let (first, last) = part.range_of(ctx.rank());
        let win = MemWindow::create(ctx, &mut local[first * es..(last + 1) * es], es);
        let pointers = if dims >= 2 { vec![0u64; elems] } else { Vec::new() };
        debug!(
            "rank {} exposes elements [{first}, {last}] of a {elems}-element array at {:#x}",
            ctx.rank(),
            local.as_ptr() as u64,
        );
        Ok(Self {
            win,
            local,
            part,
            ty,
            elems,
            pointers,
        })
    }

    #[inline(always)]
    pub fn ty(&self) -> ElemType {
        self.ty
    }

    #[inline(always)]
    pub fn elems(&self) -> usize {
        self.elems
    }

    /// The abstraction's externally visible base address.
    #[inline(always)]
    pub fn base_addr(&self) -> u64 {
        self.local.as_ptr() as u64
    }

    #[inline(always)]
    pub fn span_bytes(&self) -> usize {
        self.local.len()
    }

    pub fn owner_of(&self, linear: usize) -> RuntimeResult<(i32, usize)> {
        self.part
            .owner_of(linear)
            .ok_or(RuntimeError::OffsetOutOfRange {
                addr: self.base_addr(),
                index: linear as i64,
            })
    }

    /// Direct copy into the local buffer; valid only for locally owned
    /// elements (the resolution layer guarantees that).
    pub fn write_local(&mut self, linear: usize, bytes: &[u8]) {
        let es = self.ty.size_in_bytes();
        self.local[linear * es..linear * es + es].copy_from_slice(bytes);
    }

    pub fn read_local(&self, linear: usize, out: &mut [u8]) {
        let es = self.ty.size_in_bytes();
        out.copy_from_slice(&self.local[linear * es..linear * es + es]);
    }

    /// Single-element store. Returns whether the write crossed to another
    /// process.
    pub fn store(&mut self, ctx: &CommContext, linear: usize, bytes: &[u8]) -> RuntimeResult<bool> {
        let (owner, disp) = self.owner_of(linear)?;
        if owner == ctx.rank() {
            self.write_local(linear, bytes);
            return Ok(false);
        }
        self.win.lock(LockKind::Exclusive, owner);
        self.win.put(owner, disp, bytes, self.ty);
        self.win.unlock(owner);
        Ok(true)
    }

    /// Single-element load without read-ahead. Returns whether the read
    /// crossed to another process.
    pub fn load(&self, ctx: &CommContext, linear: usize, out: &mut [u8]) -> RuntimeResult<bool> {
        let (owner, disp) = self.owner_of(linear)?;
        if owner == ctx.rank() {
            self.read_local(linear, out);
            return Ok(false);
        }
        self.win.lock(LockKind::Exclusive, owner);
        self.win.get(owner, disp, out, self.ty);
        self.win.unlock(owner);
        Ok(true)
    }

    /// Load with read-ahead: fetch up to `max` elements spaced `stride`
    /// apart in one strided remote operation, clipped to what the owner still
    /// stores past the requested element. The first run entry is the
    /// requested element.
    pub fn load_run(
        &self,
        ctx: &CommContext,
        linear: usize,
        stride: usize,
        max: usize,
    ) -> RuntimeResult<Fetched> {
        let es = self.ty.size_in_bytes();
        let (owner, disp) = self.owner_of(linear)?;
        if owner == ctx.rank() {
            let mut one = vec![0u8; es];
            self.read_local(linear, &mut one);
            return Ok(Fetched {
                crossed: false,
                runs: vec![one],
            });
        }
        let remaining = self.part.len_of(owner) - disp;
        let count = max.max(1).min((remaining + stride - 1) / stride);
        let mut buf = vec![0u8; count * es];
        self.win.lock(LockKind::Exclusive, owner);
        if count == 1 {
            self.win.get(owner, disp, &mut buf, self.ty);
        } else {
            self.win.get_strided(owner, disp, stride, count, self.ty, &mut buf);
        }
        self.win.unlock(owner);
        let runs = buf.chunks_exact(es).map(<[u8]>::to_vec).collect();
        Ok(Fetched { crossed: true, runs })
    }

    /// One aggregated scatter write to `rank`: `bytes` holds the packed
    /// values for the element displacements in `disps`, already sorted and
    /// deduplicated by the write batch.
    pub fn flush_batch(&mut self, ctx: &CommContext, rank: i32, disps: &[i32], bytes: &[u8]) {
        if rank == ctx.rank() {
            let first = self.part.range_of(rank).0;
            let es = self.ty.size_in_bytes();
            for (k, &disp) in disps.iter().enumerate() {
                let linear = first + disp as usize;
                self.write_local(linear, &bytes[k * es..(k + 1) * es]);
            }
            return;
        }
        self.win.lock(LockKind::Exclusive, rank);
        self.win.put_indexed(rank, disps, bytes, self.ty);
        self.win.unlock(rank);
    }

    /// Collective synchronous store; every rank must call with the same
    /// arguments. The owner writes inside a fence epoch.
    pub fn sequential_store(
        &mut self,
        ctx: &CommContext,
        linear: usize,
        bytes: &[u8],
    ) -> RuntimeResult<()> {
        let (owner, _disp) = self.owner_of(linear)?;
        self.win.fence();
        if owner == ctx.rank() {
            self.write_local(linear, bytes);
        }
        self.win.fence();
        Ok(())
    }

    /// Collective synchronous load; every rank gets the element.
    pub fn sequential_load(
        &self,
        ctx: &CommContext,
        linear: usize,
        out: &mut [u8],
    ) -> RuntimeResult<()> {
        let (owner, disp) = self.owner_of(linear)?;
        self.win.fence();
        if owner == ctx.rank() {
            self.read_local(linear, out);
        } else {
            self.win.get(owner, disp, out, self.ty);
        }
        self.win.fence();
        Ok(())
    }

    /// Record a raw address in the pointer mirror; only meaningful for
    /// abstractions of pointer depth >= 2.
    pub fn pointer_store(&mut self, index: usize, addr: u64) -> RuntimeResult<()> {
        if index >= self.elems {
            return Err(RuntimeError::OffsetOutOfRange {
                addr: self.base_addr(),
                index: index as i64,
            });
        }
        if self.pointers.is_empty() {
            return Err(RuntimeError::MissingPointer {
                addr: self.base_addr(),
                index,
            });
        }
        self.pointers[index] = addr;
        Ok(())
    }

    pub fn pointer_at(&self, index: usize) -> RuntimeResult<u64> {
        match self.pointers.get(index) {
            Some(&ptr) if ptr != 0 => Ok(ptr),
            _ => Err(RuntimeError::MissingPointer {
                addr: self.base_addr(),
                index,
            }),
        }
    }

    /// Whether this abstraction carries a pointer mirror at all.
    #[inline(always)]
    pub fn has_pointers(&self) -> bool {
        !self.pointers.is_empty()
    }

    /// The first recorded pointer, if any.
    pub fn first_pointer(&self) -> Option<u64> {
        self.pointers.iter().copied().find(|&ptr| ptr != 0)
    }

    /// Byte spacing between consecutive recorded pointers, or `None` when
    /// fewer than two are set or they do not ascend.
    pub fn pointer_spacing(&self) -> Option<u64> {
        let mut prev: Option<(usize, u64)> = None;
        for (slot, &ptr) in self.pointers.iter().enumerate() {
            if ptr == 0 {
                continue;
            }
            if let Some((at, first)) = prev {
                let gap = ptr.checked_sub(first)?;
                return Some(gap / (slot - at) as u64);
            }
            prev = Some((slot, ptr));
        }
        None
    }
}
