//! Fixed binary call surface.
//!
//! The intermediate-representation rewriter replaces shared-memory
//! constructs in the target program with direct calls to these symbols, so
//! their names and argument shapes are frozen. Index lists arrive as
//! `(count, *const i64)`; value transfers are raw byte pointers sized by the
//! datatype of the abstraction the access resolves to, which may sit below
//! integer pointer levels of a different type.
//!
//! Usage violations (unknown address, bad datatype code, access before
//! `gsm_initialize`) terminate the process with a diagnostic. The rewritten
//! program has no way to recover from them, and silently continuing would
//! corrupt memory on the far side of a raw pointer.

use std::slice;

use gsm_runtime::{ElemType, ReduceOp, Runtime, RuntimeError, RuntimeResult};
use log::error;

static mut RUNTIME: Option<Runtime> = None;

fn die(msg: &str) -> ! {
    error!("{msg}");
    eprintln!("gsm runtime: {msg}");
    std::process::exit(1);
}

#[allow(static_mut_refs)]
fn runtime() -> &'static mut Runtime {
    unsafe {
        match RUNTIME.as_mut() {
            Some(rt) => rt,
            None => die("runtime call before gsm_initialize"),
        }
    }
}

fn ok_or_die<T>(what: &str, result: RuntimeResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => die(&format!("{what}: {err}")),
    }
}

fn elem_type(code: i32) -> ElemType {
    match ElemType::from_code(code) {
        Some(ty) => ty,
        None => die(&RuntimeError::BadDatatype(code).to_string()),
    }
}

unsafe fn index_list<'a>(count: i32, indices: *const i64) -> &'a [i64] {
    if count <= 0 || indices.is_null() {
        die("element access without indices");
    }
    slice::from_raw_parts(indices, count as usize)
}

/// Bring up the runtime. Must be the first call of the process; `logging`
/// non-zero also installs the env_logger backend.
#[no_mangle]
#[allow(static_mut_refs)]
pub unsafe extern "C" fn gsm_initialize(logging: i32) {
    if RUNTIME.is_some() {
        die("gsm_initialize called twice");
    }
    RUNTIME = Some(Runtime::initialize(logging != 0));
}

/// Tear everything down. Must be the last call of the process.
#[no_mangle]
#[allow(static_mut_refs)]
pub unsafe extern "C" fn gsm_finalize() {
    match RUNTIME.take() {
        Some(rt) => rt.finalize(),
        None => die("gsm_finalize without gsm_initialize"),
    }
}

#[no_mangle]
pub extern "C" fn gsm_rank() -> i32 {
    runtime().rank()
}

#[no_mangle]
pub extern "C" fn gsm_size() -> i32 {
    runtime().size()
}

#[no_mangle]
pub extern "C" fn gsm_barrier() {
    runtime().barrier()
}

#[no_mangle]
pub extern "C" fn gsm_allocate_array(size_bytes: u64, datatype: i32, dimensions: u32) -> u64 {
    let ty = elem_type(datatype);
    ok_or_die(
        "allocate_array",
        runtime().allocate_array(size_bytes as usize, ty, dimensions),
    )
}

#[no_mangle]
pub extern "C" fn gsm_free(address: u64) {
    ok_or_die("free", runtime().free(address));
}

#[no_mangle]
pub unsafe extern "C" fn gsm_store(
    address: u64,
    value: *const u8,
    index_count: i32,
    indices: *const i64,
) {
    let rt = runtime();
    let indices = index_list(index_count, indices);
    let es = ok_or_die("store", rt.target_elem_size(address, indices));
    let bytes = slice::from_raw_parts(value, es);
    ok_or_die("store", rt.store(address, indices, bytes));
}

#[no_mangle]
pub unsafe extern "C" fn gsm_load(
    address: u64,
    dest: *mut u8,
    index_count: i32,
    indices: *const i64,
) {
    let rt = runtime();
    let indices = index_list(index_count, indices);
    let es = ok_or_die("load", rt.target_elem_size(address, indices));
    let out = slice::from_raw_parts_mut(dest, es);
    ok_or_die("load", rt.load(address, indices, out));
}

#[no_mangle]
pub unsafe extern "C" fn gsm_sequential_store(
    address: u64,
    value: *const u8,
    index_count: i32,
    indices: *const i64,
) {
    let rt = runtime();
    let indices = index_list(index_count, indices);
    let es = ok_or_die("sequential_store", rt.target_elem_size(address, indices));
    let bytes = slice::from_raw_parts(value, es);
    ok_or_die("sequential_store", rt.sequential_store(address, indices, bytes));
}

#[no_mangle]
pub unsafe extern "C" fn gsm_sequential_load(
    address: u64,
    dest: *mut u8,
    index_count: i32,
    indices: *const i64,
) {
    let rt = runtime();
    let indices = index_list(index_count, indices);
    let es = ok_or_die("sequential_load", rt.target_elem_size(address, indices));
    let out = slice::from_raw_parts_mut(dest, es);
    ok_or_die("sequential_load", rt.sequential_load(address, indices, out));
}

#[no_mangle]
pub extern "C" fn gsm_pointer_store(dest_address: u64, source_address: u64, dest_index: i64) {
    if dest_index < 0 {
        die("pointer_store with negative index");
    }
    ok_or_die(
        "pointer_store",
        runtime().pointer_store(dest_address, source_address, dest_index as usize),
    );
}

/// Register the program variable at `address` as a shared scalar, seeded
/// with its current contents.
#[no_mangle]
pub unsafe extern "C" fn gsm_allocate_scalar(address: u64, datatype: i32) -> u64 {
    let ty = elem_type(datatype);
    let initial = slice::from_raw_parts(address as *const u8, ty.size_in_bytes());
    runtime().allocate_scalar(address, ty, initial)
}

#[no_mangle]
pub unsafe extern "C" fn gsm_scalar_store(address: u64, value: *const u8) {
    let rt = runtime();
    let es = ok_or_die("scalar_store", rt.elem_size_of(address));
    let bytes = slice::from_raw_parts(value, es);
    ok_or_die("scalar_store", rt.scalar_store(address, bytes));
}

#[no_mangle]
pub unsafe extern "C" fn gsm_scalar_load(address: u64, dest: *mut u8) {
    let rt = runtime();
    let es = ok_or_die("scalar_load", rt.elem_size_of(address));
    let out = slice::from_raw_parts_mut(dest, es);
    ok_or_die("scalar_load", rt.scalar_load(address, out));
}

/// Collective: synchronize the scalar and write the agreed value back into
/// the program variable it shadows.
#[no_mangle]
pub unsafe extern "C" fn gsm_scalar_synchronize(address: u64) {
    let rt = runtime();
    let es = ok_or_die("scalar_synchronize", rt.elem_size_of(address));
    let out = slice::from_raw_parts_mut(address as *mut u8, es);
    ok_or_die("scalar_synchronize", rt.scalar_synchronize(address, out));
}

#[no_mangle]
pub extern "C" fn gsm_mutex_init() -> u64 {
    runtime().mutex_init()
}

#[no_mangle]
pub extern "C" fn gsm_mutex_enter(handle: u64) {
    ok_or_die("mutex_enter", runtime().mutex_enter(handle));
}

#[no_mangle]
pub extern "C" fn gsm_mutex_leave(handle: u64) {
    ok_or_die("mutex_leave", runtime().mutex_leave(handle));
}

#[no_mangle]
pub extern "C" fn gsm_mutex_finalize(handle: u64) {
    ok_or_die("mutex_finalize", runtime().mutex_finalize(handle));
}

#[no_mangle]
pub unsafe extern "C" fn gsm_reduce_local(value: *mut u8, operation: i32, datatype: i32) {
    let ty = elem_type(datatype);
    let op = match ReduceOp::from_code(operation) {
        Some(op) => op,
        None => die(&RuntimeError::BadReduceOp(operation).to_string()),
    };
    let bytes = slice::from_raw_parts_mut(value, ty.size_in_bytes());
    runtime().reduce_local(bytes, ty, op);
}

#[no_mangle]
pub extern "C" fn gsm_strong_flush() {
    ok_or_die("strong_flush", runtime().strong_flush());
}
