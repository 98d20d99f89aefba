//! Simple Matching Coefficient kernel.
//!
//! Same shape as [`dice`](super::dice::dice): per-row top-k above a
//! threshold, canonical output order. Only the score function differs:
//! `1 - popcount(A[i] XOR B[j]) / L`, i.e. agreement over the whole bit
//! vector rather than just the set bits.

use rayon::prelude::*;

use crate::bitops::xor_popcount;
use crate::candidate::{CandidateList, CandidatePair, Dataset};
use crate::error::Result;

use super::{topk_threshold, validate_inputs, ROW_PARALLELIZATION_THRESHOLD};

/// For every record in dataset A, find the top-`k` records in dataset B
/// with SMC similarity `>= threshold`. `k` defaults to `datasets[1].len()`.
pub fn smc(datasets: &[Dataset<'_>], threshold: f64, k: Option<usize>) -> Result<CandidateList> {
    let (a, b) = validate_inputs(datasets)?;
    let k = k.unwrap_or(b.len());
    // L in bits: `validate_inputs` already guaranteed every CLK in a and b
    // shares this length, so any record's byte length works.
    let l_bits = (a.first().or_else(|| b.first()).map_or(0, |clk| clk.len())) * 8;

    let pairs: Vec<CandidatePair> = if a.len() >= ROW_PARALLELIZATION_THRESHOLD {
        a.par_iter()
            .enumerate()
            .flat_map_iter(|(i, clk_a)| smc_row(i, clk_a, b, l_bits, threshold, k))
            .collect()
    } else {
        a.iter()
            .enumerate()
            .flat_map(|(i, clk_a)| smc_row(i, clk_a, b, l_bits, threshold, k))
            .collect()
    };

    let mut list = CandidateList::from_pairs(pairs);
    list.sort_and_dedup();
    Ok(list)
}

fn smc_row(
    i: usize,
    clk_a: &[u8],
    b: Dataset<'_>,
    l_bits: usize,
    threshold: f64,
    k: usize,
) -> Vec<CandidatePair> {
    let scores = b.iter().enumerate().map(|(j, clk_b)| {
        let score = if l_bits == 0 {
            0.0
        } else {
            1.0 - xor_popcount(clk_a, clk_b) as f64 / l_bits as f64
        };
        (j as u32, score)
    });
    topk_threshold(scores, k, threshold)
        .into_iter()
        .map(|(j, score)| CandidatePair::new(score, 0, 1, i as u32, j))
        .collect()
}
