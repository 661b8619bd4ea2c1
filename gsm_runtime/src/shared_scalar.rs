use mpi_fabric::{CommContext, ElemType, LockKind, MemWindow};

/// A single shared value with one authoritative copy on the coordinator
/// process (rank 0).
///
/// Store and load target the coordinator directly; `synchronize` is the
/// collective step that pulls the authoritative value into every rank's
/// mirror. The usage contract is one `synchronize` at the end of the owning
/// parallel region, before the value is read sequentially again; skipping it
/// leaves non-coordinator mirrors stale, and nothing here enforces that.
pub struct SharedScalar {
    win: MemWindow,
    // One element; authoritative on the coordinator, a mirror elsewhere.
    local: Vec<u8>,
    ty: ElemType,
    coordinator: i32,
    // Address of the program variable this scalar shadows; doubles as the
    // registry key and is where the value is finalized at region exit.
    home: u64,
}

impl SharedScalar {
    pub const COORDINATOR: i32 = 0;

    /// Collective: the coordinator exposes its element, every rank seeds its
    /// mirror with the program variable's current contents.
    pub fn new(ctx: &CommContext, home: u64, ty: ElemType, initial: &[u8]) -> Self {
        let es = ty.size_in_bytes();
        let mut local = vec![0u8; es];
        local.copy_from_slice(&initial[..es]);
        let coordinator = Self::COORDINATOR;
        let exposed = if ctx.rank() == coordinator { es } else { 0 };
        let win = MemWindow::create(ctx, &mut local[..exposed], es);
        Self {
            win,
            local,
            ty,
            coordinator,
            home,
        }
    }

    #[inline(always)]
    pub fn ty(&self) -> ElemType {
        self.ty
    }

    #[inline(always)]
    pub fn base_addr(&self) -> u64 {
        self.home
    }

    pub fn store(&mut self, ctx: &CommContext, bytes: &[u8]) {
        self.local.copy_from_slice(bytes);
        if ctx.rank() != self.coordinator {
            self.win.lock(LockKind::Exclusive, self.coordinator);
            self.win.put(self.coordinator, 0, bytes, self.ty);
            self.win.unlock(self.coordinator);
        }
    }

    pub fn load(&self, ctx: &CommContext, out: &mut [u8]) {
        if ctx.rank() == self.coordinator {
            out.copy_from_slice(&self.local);
            return;
        }
        self.win.lock(LockKind::Exclusive, self.coordinator);
        self.win.get(self.coordinator, 0, out, self.ty);
        self.win.unlock(self.coordinator);
    }

    /// Collective: barrier, then every non-coordinator pulls the
    /// coordinator's current value into its mirror. Returns the synchronized
    /// value so the caller can finalize it into ordinary memory.
    pub fn synchronize(&mut self, ctx: &CommContext) -> &[u8] {
        ctx.barrier();
        if ctx.rank() != self.coordinator {
            let mut pulled = vec![0u8; self.local.len()];
            self.win.lock(LockKind::Shared, self.coordinator);
            self.win.get(self.coordinator, 0, &mut pulled, self.ty);
            self.win.unlock(self.coordinator);
            self.local.copy_from_slice(&pulled);
        }
        &self.local
    }
}
