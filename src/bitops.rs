//! Bit-vector primitives.
//!
//! Every higher-level similarity computation in this crate bottoms out in
//! one of the three functions here. Correctness is defined purely in terms
//! of bit counts; none of them allocate on the hot path, and all of them
//! process data in 64-bit words so that `u64::count_ones()`, which lowers
//! to the native `POPCNT` instruction on targets built with
//! `target-feature=+popcnt` (or AVX2, a superset), does the actual
//! counting instead of a bit-by-bit loop.

use crate::error::{Error, Result};

/// Number of set bits in `bytes`.
///
/// Processes 8 bytes at a time as a `u64`; the 0-7 byte remainder (CLKs are
/// always a multiple of 8 bits, i.e. a whole number of bytes, but this
/// function is also used on blocking-table slices that needn't be) is
/// counted byte-wise.
#[inline]
#[must_use]
pub fn popcount(bytes: &[u8]) -> u64 {
    let mut total = 0u64;
    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        // SAFETY-free: `chunks_exact(8)` guarantees exactly 8 bytes.
        let word = u64::from_le_bytes(chunk.try_into().unwrap());
        total += word.count_ones() as u64;
    }
    for &b in chunks.remainder() {
        total += b.count_ones() as u64;
    }
    total
}

/// Popcount of `a AND b`, bit for bit. `a` and `b` must have equal length.
///
/// This is the inner loop of both similarity kernels: for Dice it supplies
/// the intersection term, for SMC the same primitive is applied to an XOR
/// instead (see [`and_popcount_with`]).
#[inline]
#[must_use]
pub fn and_popcount(a: &[u8], b: &[u8]) -> u32 {
    and_popcount_with(a, b, |x, y| x & y)
}

/// Popcount of `a XOR b`. Used by the SMC kernel to get Hamming distance.
#[inline]
#[must_use]
pub fn xor_popcount(a: &[u8], b: &[u8]) -> u32 {
    and_popcount_with(a, b, |x, y| x ^ y)
}

/// Shared fixed-stride accumulator: combine `a` and `b` word-by-word with
/// `combine`, then popcount the result. `a.len()` must equal `b.len()`.
#[inline]
fn and_popcount_with(a: &[u8], b: &[u8], combine: fn(u64, u64) -> u64) -> u32 {
    debug_assert_eq!(a.len(), b.len(), "and_popcount_with: length mismatch");

    let mut total = 0u32;
    let mut a_chunks = a.chunks_exact(8);
    let mut b_chunks = b.chunks_exact(8);
    for (ca, cb) in (&mut a_chunks).zip(&mut b_chunks) {
        let wa = u64::from_le_bytes(ca.try_into().unwrap());
        let wb = u64::from_le_bytes(cb.try_into().unwrap());
        total += combine(wa, wb).count_ones();
    }
    for (&x, &y) in a_chunks.remainder().iter().zip(b_chunks.remainder()) {
        total += combine(x as u64, y as u64).count_ones();
    }
    total
}

/// Popcount of every `element_size`-byte element of `bytes`.
///
/// `element_size` must evenly divide `bytes.len()`; this is the vectorized
/// precomputation path used when a dataset is large enough
/// that per-record scalar counting would show up in profiles (the caller
/// picks the threshold; see [`crate::similarity::dice::VECTORIZE_THRESHOLD`]).
pub fn popcount_array(bytes: &[u8], element_size: usize) -> Result<Vec<u32>> {
    if element_size == 0 || bytes.len() % element_size != 0 {
        return Err(Error::InvalidParameter {
            name: "element_size",
            reason: format!(
                "element_size {element_size} must evenly divide byte length {}",
                bytes.len()
            ),
        });
    }
    Ok(bytes
        .chunks_exact(element_size)
        .map(|clk| popcount(clk) as u32)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popcount_all_zero() {
        assert_eq!(popcount(&[0x00; 32]), 0);
    }

    #[test]
    fn popcount_all_one() {
        assert_eq!(popcount(&[0xFF; 32]), 32 * 8);
    }

    #[test]
    fn popcount_matches_scalar_count_ones() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        let expected: u64 = bytes.iter().map(|b| b.count_ones() as u64).sum();
        assert_eq!(popcount(&bytes), expected);
    }

    #[test]
    fn popcount_odd_length_remainder() {
        // 7 bytes: exercises the scalar remainder path.
        let bytes = [0xFFu8; 7];
        assert_eq!(popcount(&bytes), 56);
    }

    #[test]
    fn and_popcount_identical_is_self_popcount() {
        let a = [0xAAu8; 16];
        assert_eq!(and_popcount(&a, &a), popcount(&a) as u32);
    }

    #[test]
    fn and_popcount_disjoint_is_zero() {
        let a = [0xF0u8; 16];
        let b = [0x0Fu8; 16];
        assert_eq!(and_popcount(&a, &b), 0);
    }

    #[test]
    fn xor_popcount_identical_is_zero() {
        let a = [0x5Au8; 16];
        assert_eq!(xor_popcount(&a, &a), 0);
    }

    #[test]
    fn xor_popcount_opposite_is_full_width() {
        let a = [0x00u8; 16];
        let b = [0xFFu8; 16];
        assert_eq!(xor_popcount(&a, &b), 128);
    }

    #[test]
    fn popcount_array_splits_evenly() {
        let bytes = [0xFFu8, 0x00, 0x0F, 0xF0];
        let counts = popcount_array(&bytes, 2).unwrap();
        assert_eq!(counts, vec![8, 8]);
    }

    #[test]
    fn popcount_array_rejects_indivisible_size() {
        let bytes = [0u8; 5];
        assert!(popcount_array(&bytes, 2).is_err());
    }
}
