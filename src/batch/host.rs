//! Host backend: the Cartesian pair space is collapsed into one flat index
//! range and dispatched to a worker pool on a guided schedule. Workers claim
//! shrinking chunks off a shared cursor, so the tail of the pair space load
//! balances without a fixed chunk size. Pools are cached process-wide per
//! worker count and built lazily on first use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::batch::{check_operands, check_output, CountOptions, MAX_WORKERS};
use crate::pack::BitsetPack;
use crate::setops::{self, SetOp};

/// Guided-schedule floor: a worker never claims fewer pairs than this
const MIN_CHUNK: usize = 64;

/// Compute the batched set-operation-count matrix, allocating the result
pub fn setop_counts(op: SetOp, a: &BitsetPack, b: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
    let mut counts = vec![0i32; a.nelem() * b.nelem()];
    setop_counts_into(op, a, b, &mut counts, opts);

    counts
}

/// Compute the batched set-operation-count matrix into a caller buffer
///
/// `counts` must hold at least `a.nelem() * b.nelem()` entries and is filled
/// row-major: entry `(i, j)` lands at `i * b.nelem() + j`.
pub fn setop_counts_into(
    op: SetOp,
    a: &BitsetPack,
    b: &BitsetPack,
    counts: &mut [i32],
    opts: &CountOptions,
) {
    check_operands(a, b);
    check_output(a, b, counts);

    let workers = resolve_workers(opts.worker_count);
    debug!(
        "host {:?} counts: {}x{} pairs of {} words on {} workers",
        op,
        a.nelem(),
        b.nelem(),
        a.stride(),
        workers
    );

    run(op, a, b, counts, workers);
}

fn run(op: SetOp, a: &BitsetPack, b: &BitsetPack, counts: &mut [i32], workers: usize) {
    let cols = b.nelem();
    let total = a.nelem() * cols;
    let stride = a.stride();
    let a_words = a.words();
    let b_words = b.words();

    let pool = pool_for(workers);
    let cursor = AtomicUsize::new(0);
    let out = SendPtr(counts.as_mut_ptr());

    pool.broadcast(|_| {
        let out = out;

        loop {
            let claimed = cursor.load(Ordering::Relaxed);
            if claimed >= total {
                break;
            }

            // Guided schedule: chunks shrink as the remaining space shrinks
            let chunk = ((total - claimed) / (workers * 2)).max(MIN_CHUNK);
            let start = cursor.fetch_add(chunk, Ordering::Relaxed);
            if start >= total {
                break;
            }

            let end = (start + chunk).min(total);
            for pair in start..end {
                let row = pair / cols;
                let col = pair % cols;
                let count = setops::combine_count(
                    op,
                    &a_words[row * stride..(row + 1) * stride],
                    &b_words[col * stride..(col + 1) * stride],
                );

                // Each flat index is claimed by exactly one worker, so the
                // writes are disjoint
                unsafe {
                    *out.0.add(pair) = count as i32;
                }
            }
        }
    });
}

fn resolve_workers(worker_count: i32) -> usize {
    if worker_count <= 0 {
        thread::available_parallelism().map_or(1, usize::from).min(MAX_WORKERS)
    } else {
        let workers = worker_count as usize;
        assert!(workers <= MAX_WORKERS, "worker count {} exceeds the hard cap of {}", workers, MAX_WORKERS);

        workers
    }
}

fn pool_for(workers: usize) -> Arc<ThreadPool> {
    static POOLS: OnceLock<Mutex<HashMap<usize, Arc<ThreadPool>>>> = OnceLock::new();

    let pools = POOLS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut pools = pools.lock().expect("worker pool registry poisoned");

    pools
        .entry(workers)
        .or_insert_with(|| {
            debug!("building host worker pool with {} workers", workers);
            let pool = ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .expect("failed to build host worker pool");

            Arc::new(pool)
        })
        .clone()
}

#[derive(Clone, Copy)]
struct SendPtr(*mut i32);

// The kernel partitions the output by flat index; no two workers touch the
// same cell
unsafe impl Send for SendPtr {}
unsafe impl Sync for SendPtr {}
