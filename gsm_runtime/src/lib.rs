//! Runtime that emulates globally shared memory over a message-passing
//! fabric.
//!
//! Programs written against a shared-memory parallel-loop model are rewritten
//! (by an external IR component) into calls against this runtime, which
//! provides:
//!
//! - block-distributed shared arrays and coordinator-owned shared scalars
//! - a registry resolving multi-dimensional pointer-chasing accesses down to
//!   one (abstraction, linear index) pair
//! - three independent caches (value, address resolution, write aggregation)
//!   kept coherent by an epoch-based strong flush
//! - a distributed mutex and an all-to-all reduction for critical sections
//!   and reductions
//!
//! Naming notes:
//! - `Runtime` is the context object whose lifetime brackets
//!   initialize/finalize; nothing else in this crate is process-global
//! - "linear index" is always a fully resolved 1-D element index; raw
//!   multi-dimensional index tuples stop existing once the registry has
//!   resolved them

mod cache;
mod errors;
mod partition;
mod registry;
mod runtime;
mod settings;
mod shared_array;
mod shared_scalar;

pub use cache::{AccessKey, CacheSet, PendingWrite, Resolved, ResolveCache, ValueCache, WriteBatch};
pub use errors::{RuntimeError, RuntimeResult};
pub use partition::PartitionTable;
pub use registry::{Abstraction, Registry};
pub use runtime::Runtime;
pub use settings::Settings;
pub use shared_array::SharedArray;
pub use shared_scalar::SharedScalar;

pub use mpi_fabric::{CommContext, ElemType, ReduceOp};
