//! Blocking oracle interface.
//!
//! A blocking function is a pure map `(dataset_index, record_index,
//! record) -> zero or more block IDs`. The aggregator treats
//! blocking purely as an optimization: two records are only compared if
//! they share a block ID, so blocking can only reduce recall, never
//! inflate precision.
//!
//! Blocking functions are represented as `Fn(u32, u32, &[u8]) -> Vec<BlockId>`
//! trait objects rather than a dedicated trait, matching the
//! similarity-function-contract-style external interface elsewhere in this
//! crate, and it lets callers hand in an ordinary closure.

use std::sync::OnceLock;

use rand::seq::index::sample;
use rand::SeedableRng;

use crate::error::{Error, Result};

/// A hashable block identifier. Blocking functions may yield any of these;
/// [`and`] and [`or`] build composite IDs out of their inputs'.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    Int(i64),
    Bytes(Vec<u8>),
    /// Produced by [`or`]: the index of the contributing function, paired
    /// with that function's block ID.
    Tagged(usize, Box<BlockId>),
    /// Produced by [`and`]: one block ID from each contributing function,
    /// in order.
    Composite(Vec<BlockId>),
}

/// A blocking oracle as the aggregator consumes it.
pub type BlockingOracle<'a> = dyn Fn(u32, u32, &[u8]) -> Vec<BlockId> + Sync + 'a;

/// Product of several blocking functions: a pair of records shares an
/// `and`-block iff they share a block in *every* constituent function.
/// Implemented as the per-record Cartesian product of each function's
/// block-ID set; if any constituent yields no blocks for a record, the
/// record contributes no composite blocks at all (so it compares against
/// nothing), which is exactly the "share one in every function" rule.
#[must_use]
pub fn and<'a>(
    fns: Vec<Box<BlockingOracle<'a>>>,
) -> impl Fn(u32, u32, &[u8]) -> Vec<BlockId> + Sync + 'a {
    move |dataset_index, record_index, record| {
        let mut combos: Vec<Vec<BlockId>> = vec![Vec::new()];
        for f in &fns {
            let ids = f(dataset_index, record_index, record);
            if ids.is_empty() {
                return Vec::new();
            }
            let mut next = Vec::with_capacity(combos.len() * ids.len());
            for combo in &combos {
                for id in &ids {
                    let mut c = combo.clone();
                    c.push(id.clone());
                    next.push(c);
                }
            }
            combos = next;
        }
        combos.into_iter().map(BlockId::Composite).collect()
    }
}

/// Disjoint union of several blocking functions, each tagged by its index:
/// a pair of records shares an `or`-block iff they share a block in *some*
/// constituent function.
#[must_use]
pub fn or<'a>(
    fns: Vec<Box<BlockingOracle<'a>>>,
) -> impl Fn(u32, u32, &[u8]) -> Vec<BlockId> + Sync + 'a {
    move |dataset_index, record_index, record| {
        fns.iter()
            .enumerate()
            .flat_map(|(idx, f)| {
                f(dataset_index, record_index, record)
                    .into_iter()
                    .map(move |id| BlockId::Tagged(idx, Box::new(id)))
            })
            .collect()
    }
}

/// A record's block ID is formed from `g` independently-chosen random
/// `r`-subsets of its bit positions, one per table, each tagged by table
/// index. The selected bits are packed one-per-byte rather than into a
/// fixed-width integer, so identity is preserved for any `r` up to the
/// CLK's bit length, not just `r <= 64`.
///
/// The subsets are drawn once, deterministically from `seed`, on the
/// first call; every subsequent call must present a record of the same
/// bit length the first call saw, or [`Error::InconsistentLength`] is
/// returned. This memoized table is local to the `BitBlocking` instance,
/// no process-wide state is introduced.
pub struct BitBlocking {
    g: usize,
    r: usize,
    seed: u64,
    tables: OnceLock<Vec<Vec<usize>>>,
    l_bits: OnceLock<usize>,
}

impl BitBlocking {
    pub fn new(g: usize, r: usize, seed: u64) -> Result<Self> {
        if g == 0 {
            return Err(Error::InvalidParameter {
                name: "g",
                reason: "number of tables must be positive".to_string(),
            });
        }
        if r == 0 {
            return Err(Error::InvalidParameter {
                name: "r",
                reason: "subset size must be positive".to_string(),
            });
        }
        Ok(Self {
            g,
            r,
            seed,
            tables: OnceLock::new(),
            l_bits: OnceLock::new(),
        })
    }

    /// Evaluate this oracle on one record. Can be wrapped in a closure and
    /// passed to the aggregator as a [`BlockingOracle`].
    pub fn call(&self, _dataset_index: u32, _record_index: u32, record: &[u8]) -> Result<Vec<BlockId>> {
        let l_bits = *self.l_bits.get_or_init(|| record.len() * 8);
        if record.len() * 8 != l_bits {
            return Err(Error::InconsistentLength {
                expected: l_bits,
                found: record.len() * 8,
            });
        }
        if self.tables.get().is_none() && self.r > l_bits {
            return Err(Error::InvalidParameter {
                name: "r",
                reason: format!("subset size {} exceeds CLK length {} bits", self.r, l_bits),
            });
        }
        let tables = self.tables.get_or_init(|| {
            let mut rng = rand::rngs::StdRng::seed_from_u64(self.seed);
            (0..self.g)
                .map(|_| sample(&mut rng, l_bits, self.r).into_vec())
                .collect()
        });

        Ok(tables
            .iter()
            .enumerate()
            .map(|(t, positions)| BlockId::Tagged(t, Box::new(BlockId::Bytes(positions_to_bytes(record, positions)))))
            .collect())
    }
}

fn bit_at(record: &[u8], pos: usize) -> bool {
    let byte = record[pos / 8];
    let shift = 7 - (pos % 8);
    (byte >> shift) & 1 == 1
}

/// Packs the bits at `positions` (in order) into a byte vector, one bit
/// per position. Unlike packing into a fixed-width integer, this keeps a
/// distinct identity for every `r`, even when `r` exceeds 64: `r` bits
/// need `ceil(r / 8)` bytes, not `ceil(r / 64)` 64-bit words.
fn positions_to_bytes(record: &[u8], positions: &[usize]) -> Vec<u8> {
    let mut bytes = vec![0u8; (positions.len() + 7) / 8];
    for (i, &p) in positions.iter().enumerate() {
        if bit_at(record, p) {
            bytes[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    bytes
}

/// Maps a record's associated real value `x` to two overlapping buckets:
/// `floor(x / (2r)) * 2` (even) and `floor((x + r) / (2r)) * 2 + 1` (odd).
/// Two values within `radius` of each other always share at least one
/// bucket; two values more than `2 * radius` apart never do.
pub fn continuous_blocking(radius: f64, x: f64) -> Result<Vec<BlockId>> {
    if !(radius.is_finite() && radius > 0.0) {
        return Err(Error::InvalidParameter {
            name: "radius",
            reason: "radius must be positive and finite".to_string(),
        });
    }
    if !x.is_finite() {
        return Err(Error::InvalidParameter {
            name: "x",
            reason: "blocked value must be finite".to_string(),
        });
    }
    let even = ((x / (2.0 * radius)).floor() as i64) * 2;
    let odd = (((x + radius) / (2.0 * radius)).floor() as i64) * 2 + 1;
    Ok(vec![BlockId::Int(even), BlockId::Int(odd)])
}

/// Returns a blocking function that looks up a precomputed block ID per
/// `(dataset_index, record_index)` in `ids`, one inner `Vec` per dataset.
/// A dataset index or record index beyond the end of `ids` gets no block
/// (so it's never compared) rather than an error, since plain `Fn`
/// closures have no way to signal failure to the aggregator.
#[must_use]
pub fn list_blocking(ids: Vec<Vec<BlockId>>) -> impl Fn(u32, u32, &[u8]) -> Vec<BlockId> + Sync {
    move |dataset_index, record_index, _record| {
        match ids.get(dataset_index as usize).and_then(|per_dataset| per_dataset.get(record_index as usize)) {
            Some(id) => vec![id.clone()],
            None => Vec::new(),
        }
    }
}
