//! Pairwise set algebra over two bitsets
//!
//! Each operation exists in a value-producing form and a count form. A `None`
//! operand denotes the empty set of the other operand's length, which avoids
//! allocating a zero bitset on the hot path. Passing `None` for both operands
//! is a fatal error.

use std::ptr;

use crate::bitset::Bitset;
use crate::popcount;

/// The type of set operation to perform
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOp {
    /// Union of the two input sets
    Or,

    /// Intersection of the two input sets
    And,

    /// Difference of the two input sets (relative complement)
    AndNot,

    /// Symmetric difference of the two input sets
    Xor,
}

macro_rules! word_op {
    ($name:ident, $($op:tt)*) => {
        #[inline]
        fn $name(a: u64, b: u64) -> u64 {
            a $($op)* b
        }
    };
}

word_op!(or_words, |);

word_op!(and_words, &);

word_op!(and_not_words, & !);

word_op!(xor_words, ^);

/// The shapes a pair of nullable operands can take
enum Operands<'a> {
    /// Both operands are the same bitset
    Same(&'a Bitset),

    /// The first operand is the empty set
    FirstNull(&'a Bitset),

    /// The second operand is the empty set
    SecondNull(&'a Bitset),

    /// Two distinct non-null bitsets
    Distinct(&'a Bitset, &'a Bitset),
}

fn operands<'a>(s: Option<&'a Bitset>, t: Option<&'a Bitset>) -> Operands<'a> {
    match (s, t) {
        (Some(s), Some(t)) if ptr::eq(s, t) => Operands::Same(s),
        (Some(s), Some(t)) => Operands::Distinct(s, t),
        (None, Some(t)) => Operands::FirstNull(t),
        (Some(s), None) => Operands::SecondNull(s),
        (None, None) => panic!("set operation invoked with two null operands"),
    }
}

/// Combine two equal-length bitsets elementwise into a new bitset
fn combine_new<F>(s: &Bitset, t: &Bitset, combine: F) -> Bitset
where
    F: Fn(u64, u64) -> u64,
{
    assert!(
        s.length() == t.length(),
        "bitsets have mismatched lengths ({} vs {})",
        s.length(),
        t.length()
    );

    let mut out = Bitset::new(s.length());
    for ((word, &a), &b) in out.words_mut().iter_mut().zip(s.words()).zip(t.words()) {
        *word = combine(a, b);
    }

    out
}

/// Union of two bitsets, producing a new bitset
pub fn union(s: Option<&Bitset>, t: Option<&Bitset>) -> Bitset {
    match operands(s, t) {
        Operands::Same(s) => s.clone(),
        Operands::FirstNull(t) => t.clone(),
        Operands::SecondNull(s) => s.clone(),
        Operands::Distinct(s, t) => combine_new(s, t, or_words),
    }
}

/// Intersection of two bitsets, producing a new bitset
pub fn intersection(s: Option<&Bitset>, t: Option<&Bitset>) -> Bitset {
    match operands(s, t) {
        Operands::Same(s) => s.clone(),
        Operands::FirstNull(t) => Bitset::new(t.length()),
        Operands::SecondNull(s) => Bitset::new(s.length()),
        Operands::Distinct(s, t) => combine_new(s, t, and_words),
    }
}

/// Difference of two bitsets (members of `s` not in `t`), producing a new bitset
pub fn difference(s: Option<&Bitset>, t: Option<&Bitset>) -> Bitset {
    match operands(s, t) {
        Operands::Same(s) => Bitset::new(s.length()),
        Operands::FirstNull(t) => Bitset::new(t.length()),
        Operands::SecondNull(s) => s.clone(),
        Operands::Distinct(s, t) => combine_new(s, t, and_not_words),
    }
}

/// Symmetric difference of two bitsets, producing a new bitset
pub fn symmetric_difference(s: Option<&Bitset>, t: Option<&Bitset>) -> Bitset {
    match operands(s, t) {
        Operands::Same(s) => Bitset::new(s.length()),
        Operands::FirstNull(t) => t.clone(),
        Operands::SecondNull(s) => s.clone(),
        Operands::Distinct(s, t) => combine_new(s, t, xor_words),
    }
}

/// Population count of the union without materializing it
pub fn union_count(s: Option<&Bitset>, t: Option<&Bitset>) -> u32 {
    match operands(s, t) {
        Operands::Same(s) => s.count(),
        Operands::FirstNull(t) => t.count(),
        Operands::SecondNull(s) => s.count(),
        Operands::Distinct(s, t) => distinct_count(SetOp::Or, s, t),
    }
}

/// Population count of the intersection without materializing it
pub fn intersection_count(s: Option<&Bitset>, t: Option<&Bitset>) -> u32 {
    match operands(s, t) {
        Operands::Same(s) => s.count(),
        Operands::FirstNull(_) | Operands::SecondNull(_) => 0,
        Operands::Distinct(s, t) => distinct_count(SetOp::And, s, t),
    }
}

/// Population count of the difference without materializing it
pub fn difference_count(s: Option<&Bitset>, t: Option<&Bitset>) -> u32 {
    match operands(s, t) {
        Operands::Same(_) | Operands::FirstNull(_) => 0,
        Operands::SecondNull(s) => s.count(),
        Operands::Distinct(s, t) => distinct_count(SetOp::AndNot, s, t),
    }
}

/// Population count of the symmetric difference without materializing it
pub fn symmetric_difference_count(s: Option<&Bitset>, t: Option<&Bitset>) -> u32 {
    match operands(s, t) {
        Operands::Same(_) => 0,
        Operands::FirstNull(t) => t.count(),
        Operands::SecondNull(s) => s.count(),
        Operands::Distinct(s, t) => distinct_count(SetOp::Xor, s, t),
    }
}

/// Perform the selected set operation, producing a new bitset
pub fn setop(op: SetOp, s: Option<&Bitset>, t: Option<&Bitset>) -> Bitset {
    match op {
        SetOp::Or => union(s, t),
        SetOp::And => intersection(s, t),
        SetOp::AndNot => difference(s, t),
        SetOp::Xor => symmetric_difference(s, t),
    }
}

/// Population count of the selected set operation without materializing it
pub fn setop_count(op: SetOp, s: Option<&Bitset>, t: Option<&Bitset>) -> u32 {
    match op {
        SetOp::Or => union_count(s, t),
        SetOp::And => intersection_count(s, t),
        SetOp::AndNot => difference_count(s, t),
        SetOp::Xor => symmetric_difference_count(s, t),
    }
}

fn distinct_count(op: SetOp, s: &Bitset, t: &Bitset) -> u32 {
    assert!(
        s.length() == t.length(),
        "bitsets have mismatched lengths ({} vs {})",
        s.length(),
        t.length()
    );

    combine_count(op, s.words(), t.words()) as u32
}

/// Population count of an elementwise combination of two word slices
///
/// The operator dispatch happens here, once per call; the word loop is
/// monomorphized per combinator.
pub(crate) fn combine_count(op: SetOp, a: &[u64], b: &[u64]) -> u64 {
    match op {
        SetOp::Or => combine_count_with(a, b, or_words),
        SetOp::And => combine_count_with(a, b, and_words),
        SetOp::AndNot => combine_count_with(a, b, and_not_words),
        SetOp::Xor => combine_count_with(a, b, xor_words),
    }
}

/// Number of words combined per bulk-popcount tile
#[cfg(feature = "simd")]
const COUNT_TILE_WORDS: usize = 1024;

#[cfg(feature = "simd")]
fn combine_count_with<F>(a: &[u64], b: &[u64], combine: F) -> u64
where
    F: Fn(u64, u64) -> u64,
{
    // Combined words are staged in a fixed stack tile so the vectorized bulk
    // popcount can run over whole tiles; the remainder is counted scalar
    let mut tile = [0u64; COUNT_TILE_WORDS];
    let limit = a.len() - a.len() % COUNT_TILE_WORDS;

    let mut count = 0;
    let mut i = 0;
    while i < limit {
        for j in 0..COUNT_TILE_WORDS {
            tile[j] = combine(a[i + j], b[i + j]);
        }
        count += popcount::count_words(&tile);

        i += COUNT_TILE_WORDS;
    }

    for j in i..a.len() {
        count += u64::from(popcount::count_word(combine(a[j], b[j])));
    }

    count
}

#[cfg(not(feature = "simd"))]
fn combine_count_with<F>(a: &[u64], b: &[u64], combine: F) -> u64
where
    F: Fn(u64, u64) -> u64,
{
    let mut count = 0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        count += u64::from(popcount::count_word(combine(x, y)));
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{self, BOUNDARY_LENGTHS, SEED};

    const OPS: [SetOp; 4] = [SetOp::Or, SetOp::And, SetOp::AndNot, SetOp::Xor];

    #[test]
    fn basic_intersection_count() {
        let mut s = Bitset::new(1024);
        let mut t = Bitset::new(1024);
        s.set_many(&[42, 100]);
        t.set_many(&[42, 200]);

        assert_eq!(intersection_count(Some(&s), Some(&t)), 1);
        assert_eq!(union_count(Some(&s), Some(&t)), 3);
        assert_eq!(symmetric_difference_count(Some(&s), Some(&t)), 2);
        assert_eq!(difference_count(Some(&s), Some(&t)), 1);
    }

    #[test]
    fn null_operand_edges() {
        let mut s = Bitset::new(64);
        s.set_many(&[1, 3]);

        assert_eq!(union(Some(&s), None).count(), 2);
        assert_eq!(intersection(Some(&s), None).count(), 0);
        assert_eq!(difference(Some(&s), None).count(), 2);
    }

    #[test]
    fn null_operand_value_algebra() {
        let mut s = Bitset::new(192);
        s.set_many(&[0, 65, 191]);

        // Second operand null
        assert!(union(Some(&s), None).eq(&s));
        assert_eq!(intersection(Some(&s), None).length(), 192);
        assert_eq!(intersection(Some(&s), None).count(), 0);
        assert!(difference(Some(&s), None).eq(&s));
        assert!(symmetric_difference(Some(&s), None).eq(&s));

        // First operand null
        assert!(union(None, Some(&s)).eq(&s));
        assert_eq!(intersection(None, Some(&s)).count(), 0);
        assert_eq!(difference(None, Some(&s)).count(), 0);
        assert_eq!(difference(None, Some(&s)).length(), 192);
        assert!(symmetric_difference(None, Some(&s)).eq(&s));
    }

    #[test]
    fn null_operand_count_algebra() {
        let mut s = Bitset::new(192);
        s.set_many(&[0, 65, 191]);

        assert_eq!(union_count(Some(&s), None), 3);
        assert_eq!(union_count(None, Some(&s)), 3);
        assert_eq!(intersection_count(Some(&s), None), 0);
        assert_eq!(intersection_count(None, Some(&s)), 0);
        assert_eq!(symmetric_difference_count(Some(&s), None), 3);
        assert_eq!(symmetric_difference_count(None, Some(&s)), 3);
        assert_eq!(difference_count(Some(&s), None), 3);
        assert_eq!(difference_count(None, Some(&s)), 0);
    }

    #[test]
    fn same_operand_algebra() {
        let mut s = Bitset::new(1000);
        s.set_range(100, 900);

        assert!(union(Some(&s), Some(&s)).eq(&s));
        assert!(intersection(Some(&s), Some(&s)).eq(&s));
        assert_eq!(symmetric_difference(Some(&s), Some(&s)).count(), 0);
        assert_eq!(difference(Some(&s), Some(&s)).count(), 0);

        assert_eq!(union_count(Some(&s), Some(&s)), 801);
        assert_eq!(intersection_count(Some(&s), Some(&s)), 801);
        assert_eq!(symmetric_difference_count(Some(&s), Some(&s)), 0);
        assert_eq!(difference_count(Some(&s), Some(&s)), 0);
    }

    #[test]
    #[should_panic(expected = "two null operands")]
    fn both_null_is_rejected() {
        union(None, None);
    }

    #[test]
    #[should_panic(expected = "mismatched lengths")]
    fn mismatched_lengths_are_rejected() {
        let s = Bitset::new(64);
        let t = Bitset::new(128);
        union(Some(&s), Some(&t));
    }

    #[test]
    fn results_match_the_membership_reference() {
        for &length in BOUNDARY_LENGTHS {
            let a = test::generate_indices(length, length / 2 + 1, SEED);
            let b = test::generate_indices(length, length / 2 + 1, SEED ^ 0xABCD);
            let s = test::bitset_from(length, &a);
            let t = test::bitset_from(length, &b);

            for op in OPS {
                let expected = test::expected_members(&a, &b, op);
                let found = setop(op, Some(&s), Some(&t));

                assert_eq!(
                    found.count() as usize,
                    expected.len(),
                    "{:?} cardinality mismatch at length {}",
                    op,
                    length
                );
                for &index in &expected {
                    assert!(found.get(index), "{:?} missing bit {} at length {}", op, index, length);
                }
            }
        }
    }

    #[test]
    fn count_agrees_with_the_materialized_result() {
        for &length in BOUNDARY_LENGTHS {
            let a = test::generate_indices(length, length / 3 + 1, SEED);
            let b = test::generate_indices(length, length / 3 + 1, SEED ^ 0xF00D);
            let s = test::bitset_from(length, &a);
            let t = test::bitset_from(length, &b);

            for op in OPS {
                assert_eq!(
                    setop_count(op, Some(&s), Some(&t)),
                    setop(op, Some(&s), Some(&t)).count(),
                    "{:?} count disagreement at length {}",
                    op,
                    length
                );
            }
        }
    }

    #[test]
    fn idempotence_and_commutativity() {
        let a = test::generate_indices(4096, 1000, SEED);
        let b = test::generate_indices(4096, 1000, SEED ^ 0x5A5A);
        let s = test::bitset_from(4096, &a);
        let t = test::bitset_from(4096, &b);

        assert!(union(Some(&s), Some(&s)).eq(&s));
        assert!(intersection(Some(&s), Some(&s)).eq(&s));

        assert!(union(Some(&s), Some(&t)).eq(&union(Some(&t), Some(&s))));
        assert!(intersection(Some(&s), Some(&t)).eq(&intersection(Some(&t), Some(&s))));
        assert!(symmetric_difference(Some(&s), Some(&t)).eq(&symmetric_difference(Some(&t), Some(&s))));
    }

    #[test]
    fn equal_but_distinct_operands_take_the_elementwise_path() {
        let mut s = Bitset::new(256);
        s.set_many(&[5, 128]);
        let t = s.clone();

        assert!(union(Some(&s), Some(&t)).eq(&s));
        assert_eq!(symmetric_difference(Some(&s), Some(&t)).count(), 0);
        assert_eq!(setop_count(SetOp::And, Some(&s), Some(&t)), 2);
    }
}
