//! Runtime integration tests.
//!
//! One orchestrator test drives every helper sequentially (MPI initializes
//! once per process) and finalizes at the end. Helpers build their own
//! `Runtime` with the settings they exercise and free every abstraction
//! before returning, in program order, so the collective window frees line
//! up across ranks. The suite is also valid under `mpirun -n 4 cargo test`.

use gsm_runtime::{CommContext, ElemType, ReduceOp, Runtime, Settings};

fn all_caches() -> Settings {
    Settings {
        value_cache: true,
        resolve_cache: true,
        write_batch: true,
        readahead: 4,
        readahead_stride: 1,
        write_batch_limit: 64,
    }
}

/// Single writer per element, readers strictly after the epoch boundary.
/// Returns the loaded trace so callers can compare across settings.
fn round_trip(ctx: &CommContext, settings: Settings) -> Vec<i64> {
    const ELEMS: usize = 24;
    let es = ElemType::I64.size_in_bytes();
    let mut rt = Runtime::new(ctx.clone(), settings);
    let addr = rt.allocate_array(ELEMS * es, ElemType::I64, 1).unwrap();

    let me = ctx.rank() as usize;
    let procs = ctx.size() as usize;
    for i in (me..ELEMS).step_by(procs) {
        let v = (i * 7 + 1) as i64;
        rt.store(addr, &[i as i64], &v.to_ne_bytes()).unwrap();
    }
    rt.strong_flush().unwrap();
    ctx.barrier();

    let mut trace = Vec::with_capacity(ELEMS);
    for i in 0..ELEMS {
        let mut out = [0u8; 8];
        rt.load(addr, &[i as i64], &mut out).unwrap();
        let v = i64::from_ne_bytes(out);
        assert_eq!(v, (i * 7 + 1) as i64, "element {i}");
        trace.push(v);
    }
    ctx.barrier();
    rt.free(addr).unwrap();
    trace
}

fn cache_transparency(ctx: &CommContext) {
    let with = round_trip(ctx, all_caches());
    let without = round_trip(ctx, Settings::uncached());
    assert_eq!(with, without, "caches must not change a race-free trace");
}

/// The ten-slot scenario: rank r's value lands in slot 3r via collective
/// sequential stores, untouched slots stay stable within the run.
fn sequential_scenario(ctx: &CommContext) {
    const SLOTS: usize = 10;
    let mut rt = Runtime::new(ctx.clone(), Settings::uncached());
    let addr = rt
        .allocate_array(SLOTS * ElemType::I32.size_in_bytes(), ElemType::I32, 1)
        .unwrap();

    let writers = (ctx.size() as usize).min(4);
    for r in 0..writers {
        rt.sequential_store(addr, &[(r * 3) as i64], &(r as i32).to_ne_bytes())
            .unwrap();
    }
    ctx.barrier();

    let mut first = Vec::with_capacity(SLOTS);
    for i in 0..SLOTS {
        let mut out = [0u8; 4];
        rt.sequential_load(addr, &[i as i64], &mut out).unwrap();
        first.push(i32::from_ne_bytes(out));
    }
    for r in 0..writers {
        assert_eq!(first[r * 3], r as i32, "slot {}", r * 3);
    }
    for i in 0..SLOTS {
        let mut out = [0u8; 4];
        rt.sequential_load(addr, &[i as i64], &mut out).unwrap();
        assert_eq!(
            i32::from_ne_bytes(out),
            first[i],
            "untouched slot {i} must be stable within the run"
        );
    }
    rt.free(addr).unwrap();
}

/// A 4x4x5 array built fully nested and again with a single intermediate
/// pointer block over one contiguous buffer; the same (i, j, k) must land on
/// the same value in both.
fn resolution_equivalence(ctx: &CommContext) {
    const DI: usize = 4;
    const DJ: usize = 4;
    const DK: usize = 5;
    if ctx.size() as usize > DI {
        // dimension sizes assume at most four ranks
        return;
    }
    let es = ElemType::I64.size_in_bytes();
    let mut rt = Runtime::new(ctx.clone(), all_caches());

    // fully nested: a real abstraction per level
    let top_n = rt.allocate_array(DI * es, ElemType::I64, 3).unwrap();
    let mut mids = Vec::with_capacity(DI);
    let mut leaves = Vec::with_capacity(DI * DJ);
    for i in 0..DI {
        let mid = rt.allocate_array(DJ * es, ElemType::I64, 2).unwrap();
        rt.pointer_store(top_n, mid, i).unwrap();
        for j in 0..DJ {
            let leaf = rt.allocate_array(DK * es, ElemType::I64, 1).unwrap();
            rt.pointer_store(mid, leaf, j).unwrap();
            leaves.push(leaf);
        }
        mids.push(mid);
    }

    // flattened innermost: pointer block over one contiguous buffer, the
    // interior pointers carry the row offsets
    let top_f = rt.allocate_array(DI * es, ElemType::I64, 3).unwrap();
    let block = rt.allocate_array(DI * DJ * es, ElemType::I64, 2).unwrap();
    let data = rt
        .allocate_array(DI * DJ * DK * es, ElemType::I64, 1)
        .unwrap();
    for i in 0..DI {
        rt.pointer_store(top_f, block + (i * DJ * es) as u64, i)
            .unwrap();
        for j in 0..DJ {
            let row = (i * DJ + j) * DK;
            rt.pointer_store(block, data + (row * es) as u64, i * DJ + j)
                .unwrap();
        }
    }

    // disjoint writers over the flattened index space
    let me = ctx.rank() as usize;
    let procs = ctx.size() as usize;
    for flat in 0..DI * DJ * DK {
        if flat % procs != me {
            continue;
        }
        let (i, j, k) = (flat / (DJ * DK), flat / DK % DJ, flat % DK);
        let v = (flat * 3 + 11) as i64;
        let idx = [i as i64, j as i64, k as i64];
        rt.store(top_n, &idx, &v.to_ne_bytes()).unwrap();
        rt.store(top_f, &idx, &v.to_ne_bytes()).unwrap();
    }
    rt.strong_flush().unwrap();
    ctx.barrier();

    for flat in 0..DI * DJ * DK {
        let (i, j, k) = (flat / (DJ * DK), flat / DK % DJ, flat % DK);
        let idx = [i as i64, j as i64, k as i64];
        let mut nested = [0u8; 8];
        let mut flattened = [0u8; 8];
        rt.load(top_n, &idx, &mut nested).unwrap();
        rt.load(top_f, &idx, &mut flattened).unwrap();
        assert_eq!(
            i64::from_ne_bytes(nested),
            (flat * 3 + 11) as i64,
            "nested ({i},{j},{k})"
        );
        assert_eq!(nested, flattened, "layouts disagree at ({i},{j},{k})");
    }
    ctx.barrier();

    rt.free(top_n).unwrap();
    for mid in mids {
        rt.free(mid).unwrap();
    }
    for leaf in leaves {
        rt.free(leaf).unwrap();
    }
    rt.free(top_f).unwrap();
    rt.free(block).unwrap();
    rt.free(data).unwrap();
}

/// Offset-style layout: only the outermost pointer array and one contiguous
/// innermost buffer are real for rows past the first; the first row keeps a
/// materialized intermediate level, which is what makes the dimension
/// extents discoverable. Accesses through the top must agree with direct
/// flat-index access to the buffer. A variant with no materialized
/// intermediate level at all cannot name its extents and must be rejected.
fn flattened_offset_rows(ctx: &CommContext) {
    const DI: usize = 4;
    const DJ: usize = 4;
    const DK: usize = 5;
    if ctx.size() as usize > DI {
        // dimension sizes assume at most four ranks
        return;
    }
    let es = ElemType::I64.size_in_bytes();
    let mut rt = Runtime::new(ctx.clone(), all_caches());

    let top = rt.allocate_array(DI * es, ElemType::I64, 3).unwrap();
    let mid0 = rt.allocate_array(DJ * es, ElemType::I64, 2).unwrap();
    let data = rt
        .allocate_array(DI * DJ * DK * es, ElemType::I64, 1)
        .unwrap();
    rt.pointer_store(top, mid0, 0).unwrap();
    for i in 1..DI {
        rt.pointer_store(top, data + (i * DJ * DK * es) as u64, i)
            .unwrap();
    }
    for j in 0..DJ {
        rt.pointer_store(mid0, data + (j * DK * es) as u64, j)
            .unwrap();
    }

    // disjoint writers straight into the buffer's flat index space
    let me = ctx.rank() as usize;
    let procs = ctx.size() as usize;
    for flat in 0..DI * DJ * DK {
        if flat % procs == me {
            let v = (flat * 5 + 3) as i64;
            rt.store(data, &[flat as i64], &v.to_ne_bytes()).unwrap();
        }
    }
    rt.strong_flush().unwrap();
    ctx.barrier();

    for flat in 0..DI * DJ * DK {
        let (i, j, k) = (flat / (DJ * DK), flat / DK % DJ, flat % DK);
        let mut out = [0u8; 8];
        rt.load(top, &[i as i64, j as i64, k as i64], &mut out)
            .unwrap();
        assert_eq!(
            i64::from_ne_bytes(out),
            (flat * 5 + 3) as i64,
            "offset rows ({i},{j},{k})"
        );
    }
    ctx.barrier();

    // no first row materialized anywhere: the extents of the two inner
    // dimensions are unknowable and the access must fail, not guess
    let bare = rt.allocate_array(DI * es, ElemType::I64, 3).unwrap();
    for i in 0..DI {
        rt.pointer_store(bare, data + (i * DJ * DK * es) as u64, i)
            .unwrap();
    }
    let mut out = [0u8; 8];
    assert!(
        rt.load(bare, &[1, 1, 1], &mut out).is_err(),
        "underdetermined extents must be rejected"
    );

    rt.free(top).unwrap();
    rt.free(mid0).unwrap();
    rt.free(bare).unwrap();
    rt.free(data).unwrap();
}

/// A chain whose pointer levels are 8-byte integers over 4-byte float
/// leaves; transfers through the chain must be sized by the leaf type.
fn mixed_type_chain(ctx: &CommContext) {
    const DI: usize = 4;
    const DK: usize = 5;
    if ctx.size() as usize > DI {
        return;
    }
    let mut rt = Runtime::new(ctx.clone(), Settings::uncached());
    let top = rt
        .allocate_array(DI * ElemType::I64.size_in_bytes(), ElemType::I64, 2)
        .unwrap();
    let mut rows = Vec::with_capacity(DI);
    for i in 0..DI {
        let row = rt
            .allocate_array(DK * ElemType::F32.size_in_bytes(), ElemType::F32, 1)
            .unwrap();
        rt.pointer_store(top, row, i).unwrap();
        rows.push(row);
    }

    assert_eq!(rt.elem_size_of(top).unwrap(), 8);
    assert_eq!(rt.target_elem_size(top, &[0, 0]).unwrap(), 4);
    assert_eq!(rt.target_elem_size(top, &[0]).unwrap(), 8);

    let me = ctx.rank() as usize;
    let procs = ctx.size() as usize;
    for flat in 0..DI * DK {
        if flat % procs == me {
            let v = flat as f32 * 0.5 + 1.0;
            rt.store(top, &[(flat / DK) as i64, (flat % DK) as i64], &v.to_ne_bytes())
                .unwrap();
        }
    }
    rt.strong_flush().unwrap();
    ctx.barrier();

    for flat in 0..DI * DK {
        let mut out = [0u8; 4];
        rt.load(top, &[(flat / DK) as i64, (flat % DK) as i64], &mut out)
            .unwrap();
        assert_eq!(
            f32::from_ne_bytes(out),
            flat as f32 * 0.5 + 1.0,
            "leaf element {flat}"
        );
    }
    ctx.barrier();

    rt.free(top).unwrap();
    for row in rows {
        rt.free(row).unwrap();
    }
}

/// Read-ahead fills the value cache past the requested element, the cache
/// serves stale values until the epoch boundary, and a strong flush makes
/// remote updates visible again.
fn epoch_cache_semantics(ctx: &CommContext) {
    if ctx.is_single_process() {
        return; // needs a remote side to prefetch from
    }
    let settings = Settings {
        value_cache: true,
        resolve_cache: true,
        write_batch: false,
        readahead: 3,
        readahead_stride: 1,
        write_batch_limit: 64,
    };
    let per_rank = 4usize;
    let elems = per_rank * ctx.size() as usize;
    let es = ElemType::I64.size_in_bytes();
    let mut rt = Runtime::new(ctx.clone(), settings);
    let addr = rt.allocate_array(elems * es, ElemType::I64, 1).unwrap();

    let me = ctx.rank() as usize;
    let mine = me * per_rank..(me + 1) * per_rank;
    for i in mine.clone() {
        rt.store(addr, &[i as i64], &((i * 2) as i64).to_ne_bytes())
            .unwrap();
    }
    ctx.barrier();

    let peer_first = ((me + 1) % ctx.size() as usize) * per_rank;
    let mut out = [0u8; 8];
    rt.load(addr, &[peer_first as i64], &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), (peer_first * 2) as i64);
    ctx.barrier();

    // the owner rewrites its elements locally
    for i in mine {
        rt.store(addr, &[i as i64], &((i * 2 + 1) as i64).to_ne_bytes())
            .unwrap();
    }
    ctx.barrier();

    // stale: the requested element was cached by the first load
    rt.load(addr, &[peer_first as i64], &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), (peer_first * 2) as i64);
    // stale for the next element too, proving the read-ahead populated it
    rt.load(addr, &[peer_first as i64 + 1], &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), ((peer_first + 1) * 2) as i64);

    rt.strong_flush().unwrap();
    rt.load(addr, &[peer_first as i64], &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), (peer_first * 2 + 1) as i64);

    ctx.barrier();
    rt.free(addr).unwrap();
}

/// Aggregated remote writes stay invisible to their owner until the writer
/// flushes.
fn write_batch_visibility(ctx: &CommContext) {
    if ctx.is_single_process() {
        return;
    }
    let settings = Settings {
        value_cache: false,
        resolve_cache: true,
        write_batch: true,
        readahead: 0,
        readahead_stride: 1,
        write_batch_limit: 64,
    };
    let es = ElemType::I64.size_in_bytes();
    let elems = ctx.size() as usize;
    let mut rt = Runtime::new(ctx.clone(), settings);
    let addr = rt.allocate_array(elems * es, ElemType::I64, 1).unwrap();

    let me = ctx.rank() as i64;
    rt.store(addr, &[me], &(100 + me).to_ne_bytes()).unwrap();
    ctx.barrier();

    let peer = (me + 1) % ctx.size() as i64;
    rt.store(addr, &[peer], &(200 + me).to_ne_bytes()).unwrap();
    ctx.barrier();

    let mut out = [0u8; 8];
    rt.load(addr, &[me], &mut out).unwrap();
    assert_eq!(
        i64::from_ne_bytes(out),
        100 + me,
        "a batched write must not land before the flush"
    );
    ctx.barrier();

    rt.strong_flush().unwrap();
    ctx.barrier();
    let pred = (me + ctx.size() as i64 - 1) % ctx.size() as i64;
    rt.load(addr, &[me], &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), 200 + pred);

    ctx.barrier();
    rt.free(addr).unwrap();
}

fn scalar_family(ctx: &CommContext) {
    let mut rt = Runtime::new(ctx.clone(), Settings::uncached());
    let mut shadow: i64 = 7;
    let home = &mut shadow as *mut i64 as u64;
    let addr = rt.allocate_scalar(home, ElemType::I64, &7i64.to_ne_bytes());
    assert_eq!(addr, home);

    let mut out = [0u8; 8];
    rt.scalar_load(addr, &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), 7);

    if ctx.rank() == ctx.size() - 1 {
        rt.scalar_store(addr, &42i64.to_ne_bytes()).unwrap();
    }
    ctx.barrier();

    rt.scalar_synchronize(addr, &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), 42);
    rt.scalar_load(addr, &mut out).unwrap();
    assert_eq!(i64::from_ne_bytes(out), 42);

    rt.free(addr).unwrap();
}

fn mutex_family(ctx: &CommContext) {
    let mut rt = Runtime::new(ctx.clone(), Settings::uncached());
    let handle = rt.mutex_init();
    for _ in 0..3 {
        rt.mutex_enter(handle).unwrap();
        rt.mutex_leave(handle).unwrap();
    }
    ctx.barrier();
    if ctx.is_single_process() {
        assert!(rt.mutex_try_enter(handle).unwrap());
        rt.mutex_leave(handle).unwrap();
    }
    rt.mutex_finalize(handle).unwrap();
    assert!(
        rt.mutex_enter(handle).is_err(),
        "finalized handle must be rejected"
    );
}

fn reductions(ctx: &CommContext) {
    let rt = Runtime::new(ctx.clone(), Settings::uncached());
    let n = ctx.size() as i64;
    let mut partial = (ctx.rank() as i64 + 1).to_ne_bytes();
    rt.reduce_local(&mut partial, ElemType::I64, ReduceOp::Sum);
    assert_eq!(i64::from_ne_bytes(partial), n * (n + 1) / 2);
}

#[test]
fn runtime_suite() {
    env_logger::try_init().ok();
    let ctx = CommContext::new();

    cache_transparency(&ctx);
    sequential_scenario(&ctx);
    resolution_equivalence(&ctx);
    flattened_offset_rows(&ctx);
    mixed_type_chain(&ctx);
    epoch_cache_semantics(&ctx);
    write_batch_visibility(&ctx);
    scalar_family(&ctx);
    mutex_family(&ctx);
    reductions(&ctx);

    ctx.barrier();
    CommContext::finalize();
}
