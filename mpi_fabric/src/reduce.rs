use std::ffi::{c_int, c_void};

use mpi::ffi;

use crate::{check, CommContext, ElemType, ReduceOp};

/// All-to-all reduction of the typed value in `bytes`; every rank ends up
/// with the identical combined result in place.
///
/// This combines local partials only. Folding the result into any
/// pre-existing authoritative value (a shared scalar's initial contents, for
/// instance) is the caller's business.
pub fn all_reduce(ctx: &CommContext, bytes: &mut [u8], ty: ElemType, op: ReduceOp) {
    debug_assert_eq!(bytes.len() % ty.size_in_bytes(), 0);
    if ctx.is_single_process() {
        return;
    }
    let mut combined = vec![0u8; bytes.len()];
    let count = (bytes.len() / ty.size_in_bytes()) as c_int;
    unsafe {
        check(
            "MPI_Allreduce",
            ffi::MPI_Allreduce(
                bytes.as_ptr() as *const c_void,
                combined.as_mut_ptr() as *mut c_void,
                count,
                ty.as_mpi(),
                op.as_mpi(),
                ctx.comm(),
            ),
        );
    }
    bytes.copy_from_slice(&combined);
}
