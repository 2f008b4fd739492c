//! Device backend: identical contract to the host backend, executed on an
//! accelerator abstraction with an explicit buffer-residency lifecycle.
//!
//! Residency is tracked per (device, host buffer) with a reference count.
//! A call uploads whatever is not yet resident, honors the `update_*` flags
//! for buffers that are, launches the kernel against the device copies, and
//! copies the result matrix back unconditionally. The `release_*` flags drop
//! residency references afterwards; a buffer whose count reaches zero is
//! deallocated on the device. This lets a caller stream probe containers
//! against a pinned reference container without re-uploading it on every
//! call.
//!
//! The concrete accelerator is a virtual device: device buffers are distinct
//! allocations owned by a process-wide registry and kernels run on the
//! device executor with one team per probe row. The residency contract is
//! exactly the one a discrete accelerator runtime enforces: a caller that
//! skips an `update_*` flag after mutating host memory reads the stale
//! device copy.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;
use std::sync::{Mutex, MutexGuard, OnceLock};

use log::debug;
use rayon::prelude::*;

use crate::batch::{check_operands, check_output, CountOptions};
use crate::pack::BitsetPack;
use crate::popcount;
use crate::setops::SetOp;

/// Number of accelerator devices exposed by this backend
pub const DEVICE_COUNT: usize = 1;

/// The number of available accelerator devices
pub fn device_count() -> usize {
    DEVICE_COUNT
}

/// Check whether the buffer backing `pack` has a live copy on `device_id`
pub fn is_resident(pack: &BitsetPack, device_id: usize) -> bool {
    check_device(device_id);

    registry().contains_key(&BufferKey { device: device_id, host: pack.host_addr() })
}

/// The residency reference count of the buffer backing `pack` on `device_id`
pub fn resident_refs(pack: &BitsetPack, device_id: usize) -> usize {
    check_device(device_id);

    registry()
        .get(&BufferKey { device: device_id, host: pack.host_addr() })
        .map_or(0, |buffer| buffer.refs)
}

/// Compute the batched set-operation-count matrix on a device, allocating
/// the result
pub fn setop_counts(op: SetOp, a: &BitsetPack, b: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
    let mut counts = vec![0i32; a.nelem() * b.nelem()];
    setop_counts_into(op, a, b, &mut counts, opts);

    counts
}

/// Compute the batched set-operation-count matrix on a device into a caller
/// buffer
///
/// The host buffer behind `counts` is itself subject to the residency
/// protocol: reusing one buffer across calls keeps its device allocation
/// alive until a call passes `release_counts`.
pub fn setop_counts_into(
    op: SetOp,
    a: &BitsetPack,
    b: &BitsetPack,
    counts: &mut [i32],
    opts: &CountOptions,
) {
    check_device(opts.device_id);
    check_operands(a, b);
    check_output(a, b, counts);

    let rows = a.nelem();
    let cols = b.nelem();
    let cells = rows * cols;
    let stride = a.stride();

    let a_key = BufferKey { device: opts.device_id, host: a.host_addr() };
    let b_key = BufferKey { device: opts.device_id, host: b.host_addr() };
    let c_key = BufferKey { device: opts.device_id, host: counts.as_ptr() as usize };
    let same_operand = a_key == b_key;

    // Host-to-device phase: upload anything absent, refresh what the caller
    // asked for, reuse the rest as-is. The device copies are taken out of
    // the registry for the kernel and put back afterwards.
    let (dev_a, dev_b, mut dev_c) = {
        let mut map = registry();

        ensure_words_resident(&mut map, a_key, a.words(), opts.update_first);
        if !same_operand {
            ensure_words_resident(&mut map, b_key, b.words(), opts.update_second);
        }
        ensure_counts_resident(&mut map, c_key, &counts[..cells]);

        let dev_a = take_words(&mut map, a_key);
        let dev_b = if same_operand { None } else { Some(take_words(&mut map, b_key)) };
        let dev_c = take_counts(&mut map, c_key);

        (dev_a, dev_b, dev_c)
    };

    let b_slice = dev_b.as_deref().unwrap_or(&dev_a);
    match op {
        SetOp::Or => launch(&dev_a, b_slice, &mut dev_c, cols, stride, |x, y| x | y),
        SetOp::And => launch(&dev_a, b_slice, &mut dev_c, cols, stride, |x, y| x & y),
        SetOp::AndNot => launch(&dev_a, b_slice, &mut dev_c, cols, stride, |x, y| x & !y),
        SetOp::Xor => launch(&dev_a, b_slice, &mut dev_c, cols, stride, |x, y| x ^ y),
    }

    // The result matrix always travels device-to-host
    counts[..cells].copy_from_slice(&dev_c);

    let mut map = registry();
    restore_words(&mut map, a_key, dev_a);
    if let Some(dev_b) = dev_b {
        restore_words(&mut map, b_key, dev_b);
    }
    restore_counts(&mut map, c_key, dev_c);

    if opts.release_first {
        release(&mut map, a_key);
    }
    if opts.release_second && !same_operand {
        release(&mut map, b_key);
    }
    if opts.release_counts {
        release(&mut map, c_key);
    }
}

/// Drop every device copy of the host buffer at `host_addr`, on all devices
///
/// Called when a host container is destroyed so a still-resident buffer is
/// reclaimed rather than leaked.
pub(crate) fn force_release(host_addr: usize) {
    let mut map = registry();
    for device in 0..DEVICE_COUNT {
        let key = BufferKey { device, host: host_addr };
        if map.remove(&key).is_some() {
            log::warn!(
                "device {}: buffer {:#x} was still resident when its host container was destroyed; force-released",
                device,
                host_addr
            );
        }
    }
}

/// Kernel launch: one team per probe row; within a team, workers iterate the
/// reference axis and reduce each pair over its words
fn launch<F>(a: &[u64], b: &[u64], counts: &mut [i32], cols: usize, stride: usize, combine: F)
where
    F: Fn(u64, u64) -> u64 + Sync,
{
    counts.par_chunks_mut(cols).enumerate().for_each(|(row, out)| {
        let a_slot = &a[row * stride..(row + 1) * stride];

        for (col, cell) in out.iter_mut().enumerate() {
            let b_slot = &b[col * stride..(col + 1) * stride];

            let mut total = 0u32;
            for word in 0..stride {
                total += popcount::count_word(combine(a_slot[word], b_slot[word]));
            }

            *cell = total as i32;
        }
    });
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    device: usize,
    host: usize,
}

enum DeviceData {
    Words(Vec<u64>),
    Counts(Vec<i32>),
}

struct DeviceBuffer {
    data: DeviceData,
    refs: usize,
}

fn registry() -> MutexGuard<'static, HashMap<BufferKey, DeviceBuffer>> {
    static REGISTRY: OnceLock<Mutex<HashMap<BufferKey, DeviceBuffer>>> = OnceLock::new();

    REGISTRY
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .expect("device residency registry poisoned")
}

fn ensure_words_resident(
    map: &mut HashMap<BufferKey, DeviceBuffer>,
    key: BufferKey,
    host: &[u64],
    update: bool,
) {
    match map.entry(key) {
        Entry::Occupied(mut entry) => match &mut entry.get_mut().data {
            DeviceData::Words(device) if device.len() == host.len() => {
                if update {
                    debug!("device {}: refreshing buffer {:#x} ({} words)", key.device, key.host, host.len());
                    device.copy_from_slice(host);
                }
            }
            _ => {
                // The entry belongs to a previous occupant of this host
                // address that was dropped without a release; recycle it
                debug!("device {}: recycling stale buffer {:#x} ({} words)", key.device, key.host, host.len());
                entry.insert(DeviceBuffer { data: DeviceData::Words(host.to_vec()), refs: 1 });
            }
        },
        Entry::Vacant(entry) => {
            debug!("device {}: uploading buffer {:#x} ({} words)", key.device, key.host, host.len());
            entry.insert(DeviceBuffer { data: DeviceData::Words(host.to_vec()), refs: 1 });
        }
    }
}

fn ensure_counts_resident(map: &mut HashMap<BufferKey, DeviceBuffer>, key: BufferKey, host: &[i32]) {
    match map.entry(key) {
        Entry::Occupied(mut entry) => match &entry.get().data {
            DeviceData::Counts(device) if device.len() == host.len() => {}
            _ => {
                debug!("device {}: recycling stale count buffer {:#x} ({} entries)", key.device, key.host, host.len());
                entry.insert(DeviceBuffer { data: DeviceData::Counts(host.to_vec()), refs: 1 });
            }
        },
        Entry::Vacant(entry) => {
            debug!("device {}: uploading count buffer {:#x} ({} entries)", key.device, key.host, host.len());
            entry.insert(DeviceBuffer { data: DeviceData::Counts(host.to_vec()), refs: 1 });
        }
    }
}

fn take_words(map: &mut HashMap<BufferKey, DeviceBuffer>, key: BufferKey) -> Vec<u64> {
    match map.get_mut(&key) {
        Some(DeviceBuffer { data: DeviceData::Words(words), .. }) => mem::take(words),
        _ => panic!("device {}: operand buffer {:#x} is not resident", key.device, key.host),
    }
}

fn take_counts(map: &mut HashMap<BufferKey, DeviceBuffer>, key: BufferKey) -> Vec<i32> {
    match map.get_mut(&key) {
        Some(DeviceBuffer { data: DeviceData::Counts(counts), .. }) => mem::take(counts),
        _ => panic!("device {}: count buffer {:#x} is not resident", key.device, key.host),
    }
}

fn restore_words(map: &mut HashMap<BufferKey, DeviceBuffer>, key: BufferKey, words: Vec<u64>) {
    if let Some(DeviceBuffer { data: DeviceData::Words(slot), .. }) = map.get_mut(&key) {
        *slot = words;
    }
}

fn restore_counts(map: &mut HashMap<BufferKey, DeviceBuffer>, key: BufferKey, counts: Vec<i32>) {
    if let Some(DeviceBuffer { data: DeviceData::Counts(slot), .. }) = map.get_mut(&key) {
        *slot = counts;
    }
}

fn release(map: &mut HashMap<BufferKey, DeviceBuffer>, key: BufferKey) {
    if let Some(buffer) = map.get_mut(&key) {
        buffer.refs -= 1;
        if buffer.refs == 0 {
            debug!("device {}: releasing buffer {:#x}", key.device, key.host);
            map.remove(&key);
        }
    }
}

fn check_device(device_id: usize) {
    assert!(
        device_id < DEVICE_COUNT,
        "invalid device id {} ({} device(s) available)",
        device_id,
        DEVICE_COUNT
    );
}
