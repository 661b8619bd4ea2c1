//! Message-passing fabric toolkit for the shared-memory emulation runtime.
//!
//! - `CommContext`: process identity (rank, world size) and the collective
//!   operations every component leans on
//! - `MemWindow`: one-sided remote memory access over `MPI_Win`, including
//!   strided gets and indexed scatter puts
//! - `DistributedMutex`: a waitlist mutex built from one-sided operations
//!   and a tagged wake-up message
//! - `all_reduce`: single-value allreduce over raw typed bytes
//!
//! The safe rsmpi API is used wherever it covers the need; everything it does
//! not wrap (windows, passive-target locks, derived datatypes, allreduce over
//! untyped buffers) goes through `mpi::ffi` directly.

mod context;
mod datatype;
mod mutex;
mod reduce;
mod window;

pub use context::{check, CommContext};
pub use datatype::{ElemType, ReduceOp};
pub use mutex::DistributedMutex;
pub use reduce::all_reduce;
pub use window::{LockKind, MemWindow};

/// Print only on the root process.
#[macro_export]
macro_rules! root_println {
    ($ctx: expr, $($arg:tt)*) => {
        if $ctx.is_root() {
            println!($($arg)*);
        }
    };
}
