use std::ffi::{c_int, c_void};

use mpi::ffi;

use crate::{check, CommContext, ElemType};

/// Lock flavor for passive-target access to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Read-write access, no other lock may be held on the target.
    Exclusive,
    /// Read-only access, concurrent shared locks are allowed.
    Shared,
}

impl LockKind {
    #[inline]
    fn as_mpi(self) -> c_int {
        match self {
            LockKind::Exclusive => ffi::MPI_LOCK_EXCLUSIVE as c_int,
            LockKind::Shared => ffi::MPI_LOCK_SHARED as c_int,
        }
    }
}

/// One-sided remote-access window over a caller-owned byte segment.
///
/// Creation and drop are collective over the world communicator; every rank
/// must create and free its windows in the same order. Displacements are in
/// elements of the window's `disp_unit`.
///
/// The wrapper is deliberately not `Send`/`Sync`: the runtime is
/// single-threaded per process and MPI windows have their own thread rules.
pub struct MemWindow {
    win: ffi::MPI_Win,
    _not_send: std::marker::PhantomData<*mut u8>,
}

impl MemWindow {
    /// Expose `segment` for remote access. A rank that contributes no storage
    /// passes an empty segment.
    pub fn create(ctx: &CommContext, segment: &mut [u8], disp_unit: usize) -> Self {
        // MPI_Win is an opaque handle whose representation differs between
        // MPI implementations; zeroed is the portable null.
        let mut win: ffi::MPI_Win = unsafe { std::mem::zeroed() };
        let base = if segment.is_empty() {
            std::ptr::null_mut()
        } else {
            segment.as_mut_ptr() as *mut c_void
        };
        unsafe {
            check(
                "MPI_Win_create",
                ffi::MPI_Win_create(
                    base,
                    segment.len() as ffi::MPI_Aint,
                    disp_unit as c_int,
                    ffi::RSMPI_INFO_NULL,
                    ctx.comm(),
                    &mut win,
                ),
            );
        }
        Self {
            win,
            _not_send: std::marker::PhantomData,
        }
    }

    #[inline]
    pub fn lock(&self, kind: LockKind, rank: i32) {
        unsafe {
            check(
                "MPI_Win_lock",
                ffi::MPI_Win_lock(kind.as_mpi(), rank, 0, self.win),
            );
        }
    }

    #[inline]
    pub fn unlock(&self, rank: i32) {
        unsafe {
            check("MPI_Win_unlock", ffi::MPI_Win_unlock(rank, self.win));
        }
    }

    /// Complete all pending operations on `rank` without closing the epoch.
    /// Required between a get and a put of the same target location inside
    /// one lock epoch, and before reading a buffer filled by a get mid-epoch.
    #[inline]
    pub fn flush(&self, rank: i32) {
        unsafe {
            check("MPI_Win_flush", ffi::MPI_Win_flush(rank, self.win));
        }
    }

    /// Contiguous one-sided write of `bytes` starting at element `disp` of
    /// `rank`'s segment. Must be issued inside a lock or fence epoch.
    pub fn put(&self, rank: i32, disp: usize, bytes: &[u8], ty: ElemType) {
        let count = (bytes.len() / ty.size_in_bytes()) as c_int;
        unsafe {
            check(
                "MPI_Put",
                ffi::MPI_Put(
                    bytes.as_ptr() as *const c_void,
                    count,
                    ty.as_mpi(),
                    rank,
                    disp as ffi::MPI_Aint,
                    count,
                    ty.as_mpi(),
                    self.win,
                ),
            );
        }
    }

    /// Contiguous one-sided read into `bytes` starting at element `disp` of
    /// `rank`'s segment. Must be issued inside a lock or fence epoch.
    pub fn get(&self, rank: i32, disp: usize, bytes: &mut [u8], ty: ElemType) {
        let count = (bytes.len() / ty.size_in_bytes()) as c_int;
        unsafe {
            check(
                "MPI_Get",
                ffi::MPI_Get(
                    bytes.as_mut_ptr() as *mut c_void,
                    count,
                    ty.as_mpi(),
                    rank,
                    disp as ffi::MPI_Aint,
                    count,
                    ty.as_mpi(),
                    self.win,
                ),
            );
        }
    }

    /// Fetch `count` elements spaced `stride` apart starting at element
    /// `disp` of `rank`'s segment, packed contiguously into `out`, as a
    /// single remote operation. Backs the read-ahead path.
    pub fn get_strided(
        &self,
        rank: i32,
        disp: usize,
        stride: usize,
        count: usize,
        ty: ElemType,
        out: &mut [u8],
    ) {
        debug_assert!(out.len() >= count * ty.size_in_bytes());
        unsafe {
            let mut strided = ty.as_mpi();
            check(
                "MPI_Type_vector",
                ffi::MPI_Type_vector(
                    count as c_int,
                    1,
                    stride as c_int,
                    ty.as_mpi(),
                    &mut strided,
                ),
            );
            check("MPI_Type_commit", ffi::MPI_Type_commit(&mut strided));
            check(
                "MPI_Get",
                ffi::MPI_Get(
                    out.as_mut_ptr() as *mut c_void,
                    count as c_int,
                    ty.as_mpi(),
                    rank,
                    disp as ffi::MPI_Aint,
                    1,
                    strided,
                    self.win,
                ),
            );
            check("MPI_Type_free", ffi::MPI_Type_free(&mut strided));
        }
    }

    /// Scatter the packed elements of `bytes` to the element displacements in
    /// `disps` of `rank`'s segment, as a single remote operation. Backs the
    /// write-aggregation flush.
    pub fn put_indexed(&self, rank: i32, disps: &[c_int], bytes: &[u8], ty: ElemType) {
        debug_assert_eq!(bytes.len(), disps.len() * ty.size_in_bytes());
        unsafe {
            let mut scatter = ty.as_mpi();
            check(
                "MPI_Type_create_indexed_block",
                ffi::MPI_Type_create_indexed_block(
                    disps.len() as c_int,
                    1,
                    disps.as_ptr(),
                    ty.as_mpi(),
                    &mut scatter,
                ),
            );
            check("MPI_Type_commit", ffi::MPI_Type_commit(&mut scatter));
            check(
                "MPI_Put",
                ffi::MPI_Put(
                    bytes.as_ptr() as *const c_void,
                    disps.len() as c_int,
                    ty.as_mpi(),
                    rank,
                    0,
                    1,
                    scatter,
                    self.win,
                ),
            );
            check("MPI_Type_free", ffi::MPI_Type_free(&mut scatter));
        }
    }

    /// Active-target epoch boundary; collective over the world communicator.
    /// The sequential store/load variants bracket their access with two of
    /// these.
    #[inline]
    pub fn fence(&self) {
        unsafe {
            check("MPI_Win_fence", ffi::MPI_Win_fence(0, self.win));
        }
    }
}

impl Drop for MemWindow {
    fn drop(&mut self) {
        // Collective; the registry tears abstractions down in creation order
        // so the free calls line up across ranks.
        unsafe {
            check("MPI_Win_free", ffi::MPI_Win_free(&mut self.win));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_kind_mapping() {
        assert_ne!(
            LockKind::Exclusive.as_mpi(),
            LockKind::Shared.as_mpi(),
            "exclusive and shared must map to distinct MPI lock types"
        );
    }

    #[test]
    fn lock_kind_equality() {
        assert_eq!(LockKind::Exclusive, LockKind::Exclusive);
        assert_ne!(LockKind::Exclusive, LockKind::Shared);
    }
}
