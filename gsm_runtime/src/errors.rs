use std::collections::TryReserveError;

use thiserror::Error;

/// Error taxonomy of the runtime.
///
/// Usage violations (unknown addresses, out-of-range offsets,
/// over-partitioning) are programming-model violations: the binary surface
/// turns them into a diagnostic followed by process exit. Cache allocation
/// failure is the one catchable resource condition. Fabric errors never show
/// up here; non-zero MPI codes are logged at their call sites.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("address {0:#x} is not a registered shared abstraction")]
    UnknownAddress(u64),

    #[error("index {index} falls outside every partition of abstraction {addr:#x}")]
    OffsetOutOfRange { addr: u64, index: i64 },

    #[error("cannot distribute {elems} elements over {procs} processes")]
    OverPartitioned { elems: usize, procs: usize },

    #[error("resolution reached address {0:#x} which matches no registered abstraction")]
    Unresolvable(u64),

    #[error("abstraction {addr:#x} holds no pointer at index {index}")]
    MissingPointer { addr: u64, index: usize },

    #[error("abstraction {0:#x} is an array, not a shared scalar")]
    NotAScalar(u64),

    #[error("abstraction {0:#x} is a shared scalar, not an array")]
    NotAnArray(u64),

    #[error("unknown datatype code {0}")]
    BadDatatype(i32),

    #[error("unknown reduction code {0}")]
    BadReduceOp(i32),

    #[error("mutex handle {0} is unknown")]
    UnknownMutex(u64),

    #[error("cache allocation failed: {0}")]
    CacheAlloc(#[from] TryReserveError),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
