use std::ffi::c_int;

use log::error;
use mpi::{
    environment::Universe,
    ffi,
    raw::AsRaw,
    topology::{Process, SimpleCommunicator},
    traits::*,
};

static mut UNIVERSE: Option<Universe> = None;
static mut WORLD: Option<SimpleCommunicator> = None;

/// Log a non-zero MPI return code and hand it back.
///
/// The fabric never retries or rolls back a failed call; the code is
/// surfaced and execution continues (or dies at the call site).
#[inline]
pub fn check(what: &str, code: c_int) -> c_int {
    if code != 0 {
        error!("{what} returned MPI error code {code}");
    }
    code
}

/// Process identity and the collective toolkit.
///
/// Constructed once at runtime initialization and passed by reference into
/// every component; its lifetime brackets `init`/`finalize`.
#[derive(Clone)]
pub struct CommContext {
    world: Option<&'static SimpleCommunicator>,
    world_size: i32,
    world_rank: i32,
}

impl std::fmt::Debug for CommContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommContext")
            .field("world_size", &self.world_size)
            .field("world_rank", &self.world_rank)
            .finish()
    }
}

impl CommContext {
    pub const ROOT_RANK: i32 = 0;

    // OK if already initialized, mpi::initialize() will return None
    #[allow(static_mut_refs)]
    fn init() {
        unsafe {
            if WORLD.is_none() {
                UNIVERSE = mpi::initialize();
                WORLD = Some(SimpleCommunicator::world());
            }
        }
    }

    #[allow(static_mut_refs)]
    pub fn new() -> Self {
        Self::init();
        let world = unsafe { WORLD.as_ref() };
        let (world_size, world_rank) = match world {
            Some(world) => (world.size(), world.rank()),
            None => (1, 0),
        };
        Self {
            world,
            world_size,
            world_rank,
        }
    }

    /// Tear down the MPI environment. Must be the last fabric call of the
    /// process; all windows have to be freed before this point.
    #[inline]
    pub fn finalize() {
        unsafe {
            let mut finalized: c_int = 0;
            ffi::MPI_Finalized(&mut finalized);
            if finalized == 0 {
                check("MPI_Finalize", ffi::MPI_Finalize());
            }
        }
    }

    #[inline(always)]
    pub fn rank(&self) -> i32 {
        self.world_rank
    }

    #[inline(always)]
    pub fn size(&self) -> i32 {
        self.world_size
    }

    #[inline(always)]
    pub fn is_root(&self) -> bool {
        self.world_rank == Self::ROOT_RANK
    }

    #[inline(always)]
    pub fn is_single_process(&self) -> bool {
        self.world_size == 1
    }

    #[inline(always)]
    pub fn world(&self) -> &'static SimpleCommunicator {
        self.world.unwrap()
    }

    /// Raw communicator handle for `mpi::ffi` calls.
    #[inline(always)]
    pub fn comm(&self) -> ffi::MPI_Comm {
        self.world().as_raw()
    }

    #[inline(always)]
    pub fn process_at(&self, rank: i32) -> Process {
        self.world().process_at_rank(rank)
    }

    #[inline(always)]
    pub fn barrier(&self) {
        if let Some(world) = self.world {
            world.barrier();
        }
    }

    /// Send one wake-up token to `rank`.
    #[inline]
    pub fn send_token(&self, rank: i32, tag: i32) {
        self.process_at(rank).send_with_tag(&1u8, tag);
    }

    /// Block until a wake-up token with `tag` arrives from any rank.
    #[inline]
    pub fn wait_token(&self, tag: i32) {
        let (_token, _status) = self.world().any_process().receive_with_tag::<u8>(tag);
    }
}

impl Default for CommContext {
    fn default() -> Self {
        Self::new()
    }
}
