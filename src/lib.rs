#![deny(bare_trait_objects)]

//! Dense fixed-capacity bitsets with packed containers and batched
//! set-operation-count kernels
//!
//! # How it works
//! A [`Bitset`] is an uncompressed bit array over 64-bit words; bit `i`
//! lives in byte `i / 8` at position `i % 8`. Pairwise set algebra (union,
//! intersection, difference, symmetric difference) comes in value-producing
//! and count-only forms, where a `None` operand stands for the empty set of
//! the other operand's length.
//!
//! A [`BitsetPack`] lays `nelem` equal-capacity bitsets out back to back in
//! one contiguous block, which is the layout the batched kernels in
//! [`batch`] stream over: given two packs they fill a row-major matrix of
//! set-operation population counts over the full Cartesian product of slots,
//! either on a host worker pool ([`batch::host`]) or through the
//! device-offload backend with its reference-counted buffer-residency
//! protocol ([`batch::device`]).
//!
//! # Failure model
//! Violated preconditions (out-of-range indices, mismatched lengths, null
//! operand pairs, oversized worker counts) and resource failures are fatal;
//! the library panics with a one-line diagnostic rather than surfacing
//! recoverable errors. This is inherited from the ADT the design descends
//! from.
//!
//! # Performance Remarks
//! The popcount primitive defaults to the portable Wilkes-Wheeler-Gill
//! reduction; building with the `simd` feature routes bulk counts through an
//! AVX2 Harley-Seal kernel when the CPU supports it, with bit-identical
//! results. Batched kernels never allocate per pair.

mod bitset;
mod pack;
mod popcount;
mod setops;

pub mod batch;


pub use self::batch::{CountOptions, MAX_WORKERS};
pub use self::bitset::{Bitset, MAX_LENGTH};
pub use self::pack::BitsetPack;
pub use self::popcount::{count_bytes, count_word, count_words};
pub use self::setops::{
    difference, difference_count, intersection, intersection_count, setop, setop_count,
    symmetric_difference, symmetric_difference_count, union, union_count, SetOp,
};
