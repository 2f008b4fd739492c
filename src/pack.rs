use std::fmt;

use crate::batch::{device, host, CountOptions};
use crate::bitset::{word_len, Bitset, MAX_LENGTH};
use crate::popcount;
use crate::setops::SetOp;

/// A packed container of equal-capacity bitsets
///
/// Slots are laid out back to back in one contiguous word block, so batch
/// kernels stream the whole container linearly and a slot is addressable as
/// `[i * stride, (i + 1) * stride)` without chasing pointers. Slots are
/// written by copy-in and read by copy-out; the padding bits of every slot
/// stay zero.
pub struct BitsetPack {
    length: usize,
    nelem: usize,
    stride: usize,
    words: Box<[u64]>,
}

impl BitsetPack {
    /// Create a new zeroed container of `nelem` bitsets of `length` bits each
    pub fn new(length: usize, nelem: usize) -> Self {
        assert!(length > 0, "element length must be positive");
        assert!(length <= MAX_LENGTH, "element length {} exceeds the maximum of {}", length, MAX_LENGTH);
        assert!(nelem > 0, "element count must be positive");
        assert!(nelem <= MAX_LENGTH, "element count {} exceeds the maximum of {}", nelem, MAX_LENGTH);

        let stride = word_len(length);

        Self {
            length,
            nelem,
            stride,
            words: vec![0u64; nelem * stride].into_boxed_slice(),
        }
    }

    /// The capacity of each element in bits
    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    /// The number of elements in the container
    #[inline]
    pub fn nelem(&self) -> usize {
        self.nelem
    }

    /// Copy slot `index` out into a freshly allocated bitset
    pub fn get(&self, index: usize) -> Bitset {
        self.check_index(index);

        let mut set = Bitset::new(self.length);
        set.words_mut().copy_from_slice(self.slot_words(index));

        set
    }

    /// Copy `set` into slot `index`
    pub fn put(&mut self, index: usize, set: &Bitset) {
        self.check_index(index);
        assert!(
            set.length() == self.length,
            "bitset of length {} cannot be stored in a container of element length {}",
            set.length(),
            self.length
        );

        self.slot_words_mut(index).copy_from_slice(set.words());
    }

    /// Copy slot `index` into `buffer` as little-endian bytes, returning the
    /// number of bytes written
    pub fn extract(&self, index: usize, buffer: &mut [u8]) -> usize {
        self.check_index(index);

        let size = self.stride * 8;
        assert!(
            buffer.len() >= size,
            "extract buffer holds {} bytes, container slot needs {}",
            buffer.len(),
            size
        );

        buffer[..size].copy_from_slice(self.slot_bytes(index));

        size
    }

    /// Overwrite slot `index` from a little-endian byte buffer
    pub fn replace(&mut self, index: usize, buffer: &[u8]) {
        self.check_index(index);

        let size = self.stride * 8;
        assert!(
            buffer.len() >= size,
            "replace buffer holds {} bytes, container slot needs {}",
            buffer.len(),
            size
        );

        self.slot_bytes_mut(index).copy_from_slice(&buffer[..size]);
        self.clear_slot_padding(index);
    }

    /// Zero slot `index`
    pub fn clear_slot(&mut self, index: usize) {
        self.check_index(index);

        self.slot_words_mut(index).fill(0);
    }

    /// Zero every slot in the container
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// The number of set bits in slot `index`
    pub fn count_at(&self, index: usize) -> u32 {
        self.check_index(index);

        popcount::count_words(self.slot_words(index)) as u32
    }

    /// The number of set bits in every slot
    pub fn count_all(&self) -> Vec<u32> {
        self.words
            .chunks_exact(self.stride)
            .map(|slot| popcount::count_words(slot) as u32)
            .collect()
    }

    /// Batched union counts against `other` on the host backend
    pub fn union_counts(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        host::setop_counts(SetOp::Or, self, other, opts)
    }

    /// Batched intersection counts against `other` on the host backend
    pub fn intersection_counts(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        host::setop_counts(SetOp::And, self, other, opts)
    }

    /// Batched difference counts against `other` on the host backend
    pub fn difference_counts(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        host::setop_counts(SetOp::AndNot, self, other, opts)
    }

    /// Batched symmetric-difference counts against `other` on the host backend
    pub fn symmetric_difference_counts(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        host::setop_counts(SetOp::Xor, self, other, opts)
    }

    /// Batched union counts against `other` on the device backend
    pub fn union_counts_device(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        device::setop_counts(SetOp::Or, self, other, opts)
    }

    /// Batched intersection counts against `other` on the device backend
    pub fn intersection_counts_device(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        device::setop_counts(SetOp::And, self, other, opts)
    }

    /// Batched difference counts against `other` on the device backend
    pub fn difference_counts_device(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        device::setop_counts(SetOp::AndNot, self, other, opts)
    }

    /// Batched symmetric-difference counts against `other` on the device backend
    pub fn symmetric_difference_counts_device(&self, other: &BitsetPack, opts: &CountOptions) -> Vec<i32> {
        device::setop_counts(SetOp::Xor, self, other, opts)
    }

    /// Words per slot
    #[inline]
    pub(crate) fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    pub(crate) fn words(&self) -> &[u64] {
        &self.words
    }

    /// Identity of the backing host buffer, used as the device residency key
    #[inline]
    pub(crate) fn host_addr(&self) -> usize {
        self.words.as_ptr() as usize
    }

    #[inline]
    fn slot_words(&self, index: usize) -> &[u64] {
        &self.words[index * self.stride..(index + 1) * self.stride]
    }

    #[inline]
    fn slot_words_mut(&mut self, index: usize) -> &mut [u64] {
        &mut self.words[index * self.stride..(index + 1) * self.stride]
    }

    #[inline]
    fn slot_bytes(&self, index: usize) -> &[u8] {
        bytemuck::cast_slice(self.slot_words(index))
    }

    #[inline]
    fn slot_bytes_mut(&mut self, index: usize) -> &mut [u8] {
        let stride = self.stride;
        bytemuck::cast_slice_mut(&mut self.words[index * stride..(index + 1) * stride])
    }

    /// Zero the padding bits past `length` in a slot's final word
    fn clear_slot_padding(&mut self, index: usize) {
        let tail = self.length % 64;
        if tail != 0 {
            let last = (index + 1) * self.stride - 1;
            self.words[last] &= (1u64 << tail) - 1;
        }
    }

    #[inline]
    fn check_index(&self, index: usize) {
        assert!(
            index < self.nelem,
            "slot index {} out of range for container of {} elements",
            index,
            self.nelem
        );
    }
}

impl Drop for BitsetPack {
    /// Force-release any device copies still resident when the host
    /// container goes away, so device memory is never silently leaked
    fn drop(&mut self) {
        device::force_release(self.host_addr());
    }
}

impl fmt::Debug for BitsetPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitsetPack")
            .field("length", &self.length)
            .field("nelem", &self.nelem)
            .finish()
    }
}
