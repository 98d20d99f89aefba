//! Chunking / sharding of multiparty problems.
//!
//! Splitting and running chunks is the only parallelism primitive this
//! crate exposes internally; the actual distribution across workers is
//! the caller's harness's job. A `Chunk` is a self-contained,
//! JSON-serializable description of one rectangular sub-problem: a pair
//! of `(dataset_index, range)` descriptors naming the two index ranges to
//! compare.

use serde::{Deserialize, Serialize};

use crate::aggregate::SimilarityFn;
use crate::candidate::{CandidateList, CandidatePair, Dataset};
use crate::error::{Error, Result};

/// One dataset's contribution to a chunk: compare indices `range.0
/// ..range.1` (half-open) of dataset `dataset_index`.
///
/// Serializes to the external JSON shape `{"datasetIndex": int, "range":
/// [int, int]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRange {
    pub dataset_index: u32,
    pub range: (u32, u32),
}

/// A self-contained rectangular sub-problem: compare one range of one
/// dataset against one range of another. Plain data, safe to serialize
/// and hand to a remote worker. Serializes as a two-element JSON array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "[ChunkRange; 2]", from = "[ChunkRange; 2]")]
pub struct Chunk {
    pub a: ChunkRange,
    pub b: ChunkRange,
}

impl From<Chunk> for [ChunkRange; 2] {
    fn from(c: Chunk) -> Self {
        [c.a, c.b]
    }
}

impl From<[ChunkRange; 2]> for Chunk {
    fn from(parts: [ChunkRange; 2]) -> Self {
        Chunk { a: parts[0], b: parts[1] }
    }
}

/// For every unordered pair of non-empty datasets, split each side into
/// near-equal contiguous ranges sized so that each chunk costs roughly
/// `target_comparisons`, and emit their Cartesian product.
///
/// `c0 = max(1, round(n0 / sqrt(target)))`, then `c1 = max(1, round(n1 *
/// (n0 / c0) / target))`. The union of the returned chunks covers every
/// cross-dataset pair exactly once.
pub fn split_to_chunks(target_comparisons: f64, dataset_sizes: &[usize]) -> Result<Vec<Chunk>> {
    if !(target_comparisons.is_finite() && target_comparisons > 0.0) {
        return Err(Error::InvalidParameter {
            name: "target_comparisons",
            reason: "must be positive and finite".to_string(),
        });
    }

    let mut chunks = Vec::new();
    for d0 in 0..dataset_sizes.len() {
        for d1 in (d0 + 1)..dataset_sizes.len() {
            let n0 = dataset_sizes[d0];
            let n1 = dataset_sizes[d1];
            if n0 == 0 || n1 == 0 {
                continue;
            }
            let c0 = ((n0 as f64 / target_comparisons.sqrt()).round() as usize).max(1);
            let c1 = ((n1 as f64 * (n0 as f64 / c0 as f64) / target_comparisons).round() as usize).max(1);

            let ranges0 = split_range(n0, c0);
            let ranges1 = split_range(n1, c1);
            tracing::debug!(
                d0, d1, n0, n1, c0, c1, target_comparisons,
                "split dataset pair into {} x {} chunk ranges", ranges0.len(), ranges1.len()
            );

            for &r0 in &ranges0 {
                for &r1 in &ranges1 {
                    chunks.push(Chunk {
                        a: ChunkRange { dataset_index: d0 as u32, range: r0 },
                        b: ChunkRange { dataset_index: d1 as u32, range: r1 },
                    });
                }
            }
        }
    }
    Ok(chunks)
}

/// Split `0..n` into `parts` near-equal contiguous half-open ranges.
fn split_range(n: usize, parts: usize) -> Vec<(u32, u32)> {
    let parts = parts.min(n.max(1));
    let base = n / parts;
    let remainder = n % parts;
    let mut ranges = Vec::with_capacity(parts);
    let mut start = 0usize;
    for i in 0..parts {
        let size = base + usize::from(i < remainder);
        let end = start + size;
        if size > 0 {
            ranges.push((start as u32, end as u32));
        }
        start = end;
    }
    ranges
}

/// Run one chunk: validate that `sub_datasets` matches the chunk's shape,
/// call `similarity_fn` over the two sub-datasets, then offset the
/// returned local record indices back into the chunk's original ranges
/// and tag them with the chunk's dataset indices.
pub fn process_chunk(
    chunk: &Chunk,
    sub_datasets: &[Dataset<'_>],
    similarity_fn: &SimilarityFn<'_>,
    threshold: f64,
    k: Option<usize>,
) -> Result<CandidateList> {
    if sub_datasets.len() != 2 {
        return Err(Error::InvalidChunk {
            reason: format!("expected 2 sub-datasets, found {}", sub_datasets.len()),
        });
    }
    let expected_a = (chunk.a.range.1 - chunk.a.range.0) as usize;
    let expected_b = (chunk.b.range.1 - chunk.b.range.0) as usize;
    if sub_datasets[0].len() != expected_a || sub_datasets[1].len() != expected_b {
        return Err(Error::InvalidChunk {
            reason: format!(
                "sub-dataset lengths ({}, {}) do not match chunk ranges ({}, {})",
                sub_datasets[0].len(),
                sub_datasets[1].len(),
                expected_a,
                expected_b
            ),
        });
    }

    tracing::trace!(
        a_dataset = chunk.a.dataset_index, b_dataset = chunk.b.dataset_index,
        a_range = ?chunk.a.range, b_range = ?chunk.b.range,
        "processing chunk"
    );
    let local = similarity_fn(sub_datasets, threshold, k)?;
    let mut out = CandidateList::with_capacity(local.len());
    for pair in local.iter() {
        out.push(CandidatePair::new(
            pair.similarity,
            chunk.a.dataset_index,
            chunk.b.dataset_index,
            chunk.a.range.0 + pair.rec_i0,
            chunk.b.range.0 + pair.rec_i1,
        ));
    }
    Ok(out)
}
