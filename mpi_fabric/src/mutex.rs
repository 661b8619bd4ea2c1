use log::trace;

use crate::{CommContext, ElemType, LockKind, MemWindow};

/// Base tag for ownership hand-off tokens; each mutex offsets it by its own
/// identifier so tokens never cross between mutexes.
const HANDOFF_TAG: i32 = 0x4d58;

/// Slot states in the waitlist.
const FREE: u8 = 0;
const WAITING: u8 = 1;
const GRANTED: u8 = 2;

/// Distributed mutual exclusion over one-sided operations.
///
/// The home rank exposes a `world_size`-byte waitlist; slot `r` is non-zero
/// while rank `r` wants (or holds) the lock. Acquisition puts the caller's
/// own slot and reads everyone else's inside one exclusive epoch; contention
/// blocks on a tagged token that the current holder sends on release.
///
/// A releasing holder marks the chosen successor's slot [`GRANTED`] in the
/// same epoch that reads the waitlist, so a rank withdrawing a failed
/// `try_lock` can tell whether a hand-off raced in and consume it instead of
/// stranding the token.
///
/// Every `lock` must be paired with exactly one `unlock` from the same rank.
/// There are no timeouts: a holder that never unlocks stalls all waiters.
pub struct DistributedMutex {
    win: MemWindow,
    // Backing storage for the waitlist; only the home rank contributes bytes.
    // Declared after `win` so the collective window free runs first.
    _slots: Vec<u8>,
    home: i32,
    tag: i32,
}

impl DistributedMutex {
    /// Collective. `home` is the rank that physically holds the waitlist;
    /// `id` must be unique among the mutexes alive in the job, it keys the
    /// hand-off tag.
    pub fn new(ctx: &CommContext, home: i32, id: i32) -> Self {
        let mut slots = if ctx.rank() == home {
            vec![FREE; ctx.size() as usize]
        } else {
            Vec::new()
        };
        let win = MemWindow::create(ctx, &mut slots, 1);
        Self {
            win,
            _slots: slots,
            home,
            tag: HANDOFF_TAG + id,
        }
    }

    /// Declare intent and read the remaining waitlist in one exclusive epoch.
    /// Returns the observed slots (own slot position left untouched at 0).
    fn probe(&self, ctx: &CommContext) -> Vec<u8> {
        let me = ctx.rank() as usize;
        let size = ctx.size() as usize;
        let mut list = vec![FREE; size];
        self.win.lock(LockKind::Exclusive, self.home);
        self.win.put(self.home, me, &[WAITING], ElemType::U8);
        if me > 0 {
            self.win.get(self.home, 0, &mut list[..me], ElemType::U8);
        }
        if me + 1 < size {
            self.win
                .get(self.home, me + 1, &mut list[me + 1..], ElemType::U8);
        }
        self.win.unlock(self.home);
        list
    }

    /// Acquire, blocking until the previous holder hands ownership over.
    pub fn lock(&self, ctx: &CommContext) {
        let list = self.probe(ctx);
        let contended = list.iter().any(|&slot| slot != FREE);
        if contended {
            trace!("rank {} waiting for mutex hand-off", ctx.rank());
            ctx.wait_token(self.tag);
        }
    }

    /// Try to acquire without blocking. On contention the caller's slot is
    /// cleared again; if the previous holder granted this rank in the
    /// meantime, the queued token is consumed and ownership is handed
    /// straight on, so a failed attempt leaves no mark and loses no hand-off.
    pub fn try_lock(&self, ctx: &CommContext) -> bool {
        let list = self.probe(ctx);
        if list.iter().all(|&slot| slot == FREE) {
            return true;
        }

        // Withdraw, atomically learning whether a grant raced in. The flush
        // orders the get of the own slot before the clearing put.
        let me = ctx.rank() as usize;
        let mut own = [WAITING];
        self.win.lock(LockKind::Exclusive, self.home);
        self.win.get(self.home, me, &mut own, ElemType::U8);
        self.win.flush(self.home);
        self.win.put(self.home, me, &[FREE], ElemType::U8);
        self.win.unlock(self.home);

        if own[0] == GRANTED {
            // The releasing holder picked this rank before the withdrawal
            // landed; its epoch has completed, so the token is already on the
            // way. Take it and pass the mutex on.
            trace!("rank {} absorbs a raced mutex hand-off", ctx.rank());
            ctx.wait_token(self.tag);
            self.unlock(ctx);
        }
        false
    }

    /// Release, waking the first waiting rank in cyclic order after the
    /// caller. The successor's slot is marked in the same epoch that reads
    /// the waitlist, so no withdrawal can slip between the choice and the
    /// token.
    pub fn unlock(&self, ctx: &CommContext) {
        let me = ctx.rank() as usize;
        let size = ctx.size() as usize;
        let mut list = vec![FREE; size];
        self.win.lock(LockKind::Exclusive, self.home);
        self.win.put(self.home, me, &[FREE], ElemType::U8);
        if me > 0 {
            self.win.get(self.home, 0, &mut list[..me], ElemType::U8);
        }
        if me + 1 < size {
            self.win
                .get(self.home, me + 1, &mut list[me + 1..], ElemType::U8);
        }
        self.win.flush(self.home);
        let next = (1..size)
            .map(|step| (me + step) % size)
            .find(|&next| list[next] == WAITING);
        if let Some(next) = next {
            self.win.put(self.home, next, &[GRANTED], ElemType::U8);
        }
        self.win.unlock(self.home);

        if let Some(next) = next {
            trace!("rank {} hands mutex to rank {next}", ctx.rank());
            ctx.send_token(next as i32, self.tag);
        }
    }

    /// Collective teardown; the home's waitlist memory is released with the
    /// window.
    pub fn destroy(self, ctx: &CommContext) {
        ctx.barrier();
        drop(self);
    }
}
