//! Population count primitives
//!
//! The portable path is the Wilkes-Wheeler-Gill SWAR reduction. With the
//! `simd` feature enabled a Harley-Seal carry-save-adder routine is used for
//! bulk counts on x86-64 when AVX2 is detected at runtime. Both paths produce
//! bit-identical results.

const C1_WWG: u64 = 0x5555_5555_5555_5555;
const C2_WWG: u64 = 0x3333_3333_3333_3333;
const C3_WWG: u64 = 0x0F0F_0F0F_0F0F_0F0F;
const C4_WWG: u64 = 0x0101_0101_0101_0101;

/// Count the number of set bits in a single word
///
/// Wilkes-Wheeler-Gill reduction: subtract odd bits, pair-sum, nibble-sum,
/// then a broadcast multiply pulls the byte sums into the high byte.
#[inline]
pub fn count_word(mut x: u64) -> u32 {
    x -= (x >> 1) & C1_WWG;
    x = ((x >> 2) & C2_WWG) + (x & C2_WWG);
    x = (x + (x >> 4)) & C3_WWG;
    x = x.wrapping_mul(C4_WWG);

    (x >> 56) as u32
}

/// Count the number of set bits in a slice of words
pub fn count_words(words: &[u64]) -> u64 {
    #[cfg(all(feature = "simd", target_arch = "x86_64"))]
    {
        if simd::available() && words.len() >= simd::BLOCK_WORDS {
            // Safety: AVX2 support was verified by the cached feature probe
            return unsafe { simd::harley_seal(words) };
        }
    }

    scalar_count(words)
}

/// Count the number of set bits in a byte span
///
/// The span is treated as its little-endian word view; a trailing tail of
/// fewer than eight bytes is zero-extended into a word.
pub fn count_bytes(bytes: &[u8]) -> u64 {
    let words = bytes.chunks_exact(8);
    let tail = words.remainder();

    let mut count: u64 = words.map(|w| u64::from(count_word(load_le_word(w)))).sum();
    if !tail.is_empty() {
        count += u64::from(count_word(load_le_word(tail)));
    }

    count
}

fn scalar_count(words: &[u64]) -> u64 {
    let mut count = 0;
    for &word in words {
        count += u64::from(count_word(word));
    }

    count
}

/// Load up to eight bytes as a zero-extended little-endian word
#[inline]
fn load_le_word(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word[..bytes.len()].copy_from_slice(bytes);

    u64::from_le_bytes(word)
}

#[cfg(all(feature = "simd", target_arch = "x86_64"))]
mod simd {
    use std::arch::x86_64::{
        __m256i,

        _mm256_add_epi64,
        _mm256_add_epi8,
        _mm256_and_si256,
        _mm256_extract_epi64,
        _mm256_loadu_si256,
        _mm256_or_si256,
        _mm256_sad_epu8,
        _mm256_set1_epi8,
        _mm256_setr_epi8,
        _mm256_setzero_si256,
        _mm256_shuffle_epi8,
        _mm256_slli_epi64,
        _mm256_srli_epi32,
        _mm256_xor_si256,
    };
    use std::sync::OnceLock;

    use super::count_word;

    /// Words consumed per Harley-Seal iteration (16 vectors of 4 words)
    pub const BLOCK_WORDS: usize = 64;

    /// One-time CPU feature probe, cached process-wide
    pub fn available() -> bool {
        static AVX2: OnceLock<bool> = OnceLock::new();

        *AVX2.get_or_init(|| {
            let detected = std::arch::is_x86_feature_detected!("avx2");
            log::debug!("popcount probe: avx2 {}", if detected { "enabled" } else { "unavailable" });
            detected
        })
    }

    /// Count the number of set bits in a 256 bit vector
    #[target_feature(enable = "avx2")]
    unsafe fn popcount256(v: __m256i) -> __m256i {
        let lookup = _mm256_setr_epi8(
            0, 1, 1, 2, 1, 2, 2, 3,
            1, 2, 2, 3, 2, 3, 3, 4,
            0, 1, 1, 2, 1, 2, 2, 3,
            1, 2, 2, 3, 2, 3, 3, 4,
        );

        let low_mask = _mm256_set1_epi8(0x0F);
        let lo = _mm256_and_si256(v, low_mask);
        let hi = _mm256_and_si256(_mm256_srli_epi32::<4>(v), low_mask);
        let popcnt1 = _mm256_shuffle_epi8(lookup, lo);
        let popcnt2 = _mm256_shuffle_epi8(lookup, hi);
        let total = _mm256_add_epi8(popcnt1, popcnt2);

        _mm256_sad_epu8(total, _mm256_setzero_si256())
    }

    /// AVX carry save adder
    #[target_feature(enable = "avx2")]
    unsafe fn csa(a: __m256i, b: __m256i, c: __m256i) -> (__m256i, __m256i) {
        let u = _mm256_xor_si256(a, b);
        let h = _mm256_or_si256(_mm256_and_si256(a, b), _mm256_and_si256(u, c));
        let l = _mm256_xor_si256(u, c);

        (h, l)
    }

    /// Harley-Seal algorithm for counting the number of bits in a word slice
    ///
    /// Whole blocks of 16 vectors are accumulated through the carry-save
    /// tree; the remainder falls back to the scalar reduction.
    ///
    /// # Safety
    /// The caller must ensure AVX2 is supported.
    #[target_feature(enable = "avx2")]
    pub unsafe fn harley_seal(words: &[u64]) -> u64 {
        let blocks = words.len() / BLOCK_WORDS;
        let d = words.as_ptr() as *const __m256i;

        let mut total = _mm256_setzero_si256();
        let mut ones = _mm256_setzero_si256();
        let mut twos = _mm256_setzero_si256();
        let mut fours = _mm256_setzero_si256();
        let mut eights = _mm256_setzero_si256();
        let mut sixteens = _mm256_setzero_si256();

        let mut twos_a = _mm256_setzero_si256();
        let mut twos_b = _mm256_setzero_si256();
        let mut fours_a = _mm256_setzero_si256();
        let mut fours_b = _mm256_setzero_si256();
        let mut eights_a = _mm256_setzero_si256();
        let mut eights_b = _mm256_setzero_si256();

        for block in 0..blocks {
            let i = block * 16;

            (twos_a, ones) = csa(ones, _mm256_loadu_si256(d.add(i)), _mm256_loadu_si256(d.add(i + 1)));
            (twos_b, ones) = csa(ones, _mm256_loadu_si256(d.add(i + 2)), _mm256_loadu_si256(d.add(i + 3)));
            (fours_a, twos) = csa(twos, twos_a, twos_b);
            (twos_a, ones) = csa(ones, _mm256_loadu_si256(d.add(i + 4)), _mm256_loadu_si256(d.add(i + 5)));
            (twos_b, ones) = csa(ones, _mm256_loadu_si256(d.add(i + 6)), _mm256_loadu_si256(d.add(i + 7)));
            (fours_b, twos) = csa(twos, twos_a, twos_b);
            (eights_a, fours) = csa(fours, fours_a, fours_b);
            (twos_a, ones) = csa(ones, _mm256_loadu_si256(d.add(i + 8)), _mm256_loadu_si256(d.add(i + 9)));
            (twos_b, ones) = csa(ones, _mm256_loadu_si256(d.add(i + 10)), _mm256_loadu_si256(d.add(i + 11)));
            (fours_a, twos) = csa(twos, twos_a, twos_b);
            (twos_a, ones) = csa(ones, _mm256_loadu_si256(d.add(i + 12)), _mm256_loadu_si256(d.add(i + 13)));
            (twos_b, ones) = csa(ones, _mm256_loadu_si256(d.add(i + 14)), _mm256_loadu_si256(d.add(i + 15)));
            (fours_b, twos) = csa(twos, twos_a, twos_b);
            (eights_b, fours) = csa(fours, fours_a, fours_b);
            (sixteens, eights) = csa(eights, eights_a, eights_b);

            total = _mm256_add_epi64(total, popcount256(sixteens));
        }

        total = _mm256_slli_epi64::<4>(total);
        total = _mm256_add_epi64(total, _mm256_slli_epi64::<3>(popcount256(eights)));
        total = _mm256_add_epi64(total, _mm256_slli_epi64::<2>(popcount256(fours)));
        total = _mm256_add_epi64(total, _mm256_slli_epi64::<1>(popcount256(twos)));
        total = _mm256_add_epi64(total, popcount256(ones));

        let mut count = _mm256_extract_epi64::<0>(total) as u64;
        count += _mm256_extract_epi64::<1>(total) as u64;
        count += _mm256_extract_epi64::<2>(total) as u64;
        count += _mm256_extract_epi64::<3>(total) as u64;

        for &word in &words[blocks * BLOCK_WORDS..] {
            count += u64::from(count_word(word));
        }

        count
    }
}
