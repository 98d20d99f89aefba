//! Binary candidate-list codec.
//!
//! Version-1 format, little-endian throughout: a 4-byte header
//! (`version | sim_bytes | dset_i_bytes | rec_i_bytes`) followed by
//! zero or more fixed-stride entries. There is no length field; the
//! count of entries is recoverable from the stream length, and a
//! streaming reader simply reads until end-of-file.
//!
//! All operations here work against generic `Read`/`Write` so the
//! caller can back them with a file, a socket, or an in-memory buffer.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{Read, Write};

use crate::candidate::{CandidateList, CandidatePair};
use crate::error::{Error, Result};

const VERSION: u8 = 1;
const HEADER_BYTES: usize = 4;

/// The three field widths (in bytes) a version-1 header declares.
/// `sim_bytes` is one of `{2, 4, 8}`; `dset_i_bytes`/`rec_i_bytes` are
/// each one of `{1, 2, 4, 8}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldWidths {
    pub sim_bytes: u8,
    pub dset_i_bytes: u8,
    pub rec_i_bytes: u8,
}

impl FieldWidths {
    fn validate(self) -> Result<Self> {
        if !matches!(self.sim_bytes, 2 | 4 | 8) {
            return Err(Error::UnsupportedWidth { bytes: self.sim_bytes });
        }
        if !matches!(self.dset_i_bytes, 1 | 2 | 4 | 8) {
            return Err(Error::UnsupportedWidth { bytes: self.dset_i_bytes });
        }
        if !matches!(self.rec_i_bytes, 1 | 2 | 4 | 8) {
            return Err(Error::UnsupportedWidth { bytes: self.rec_i_bytes });
        }
        Ok(self)
    }

    fn entry_stride(self) -> usize {
        self.sim_bytes as usize + 2 * self.dset_i_bytes as usize + 2 * self.rec_i_bytes as usize
    }

    fn max(self, other: Self) -> Self {
        Self {
            sim_bytes: self.sim_bytes.max(other.sim_bytes),
            dset_i_bytes: self.dset_i_bytes.max(other.dset_i_bytes),
            rec_i_bytes: self.rec_i_bytes.max(other.rec_i_bytes),
        }
    }
}

// --- half-precision (binary16) support, for reading/merging files that
// declare sim_bytes == 2. No crate in this codebase's dependency stack
// carries f16 support, so the conversion is implemented directly as
// exact power-of-two scaling (no rounding error for values that are
// already exact binary16, which is the only case this codec needs to
// round-trip bit-exactly).

const F16_MIN_NORMAL: f64 = 0.00006103515625; // 2^-14
const TWO_POW_24: f64 = 16_777_216.0;

fn f16_bits_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = (bits >> 10) & 0x1F;
    let mantissa = f64::from(bits & 0x3FF);
    if exponent == 0 {
        sign * mantissa / TWO_POW_24
    } else if exponent == 0x1F {
        if mantissa == 0.0 {
            sign * f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        sign * (1.0 + mantissa / 1024.0) * 2f64.powi(i32::from(exponent) - 15)
    }
}

fn f64_to_f16_bits(value: f64) -> u16 {
    if value == 0.0 {
        return if value.is_sign_negative() { 0x8000 } else { 0 };
    }
    if value.is_nan() {
        return 0x7E00;
    }
    let sign: u16 = if value.is_sign_negative() { 0x8000 } else { 0 };
    let av = value.abs();
    if value.is_infinite() || av >= 65520.0 {
        return sign | 0x7C00;
    }
    if av < F16_MIN_NORMAL {
        let mantissa = (av * TWO_POW_24).round() as u16;
        return sign | mantissa;
    }

    let mut m = av;
    let mut exp: i32 = 0;
    while m >= 2.0 {
        m /= 2.0;
        exp += 1;
    }
    while m < 1.0 {
        m *= 2.0;
        exp -= 1;
    }
    let exp16 = (exp + 15) as u16;
    let mantissa = ((m - 1.0) * 1024.0).round() as u16;
    sign | (exp16 << 10) | mantissa
}

fn fits_f32(value: f64) -> bool {
    f64::from(value as f32) == value
}

fn write_uint(buf: &mut Vec<u8>, value: u64, width: u8) {
    match width {
        1 => buf.push(value as u8),
        2 => buf.extend_from_slice(&(value as u16).to_le_bytes()),
        4 => buf.extend_from_slice(&(value as u32).to_le_bytes()),
        8 => buf.extend_from_slice(&value.to_le_bytes()),
        _ => unreachable!("width validated at header parse time"),
    }
}

fn read_uint(bytes: &[u8], width: u8) -> u64 {
    match width {
        1 => u64::from(bytes[0]),
        2 => u64::from(u16::from_le_bytes(bytes[..2].try_into().unwrap())),
        4 => u64::from(u32::from_le_bytes(bytes[..4].try_into().unwrap())),
        8 => u64::from_le_bytes(bytes[..8].try_into().unwrap()),
        _ => unreachable!("width validated at header parse time"),
    }
}

fn write_sim(buf: &mut Vec<u8>, value: f64, width: u8) {
    match width {
        2 => buf.extend_from_slice(&f64_to_f16_bits(value).to_le_bytes()),
        4 => buf.extend_from_slice(&(value as f32).to_le_bytes()),
        8 => buf.extend_from_slice(&value.to_le_bytes()),
        _ => unreachable!("width validated at header parse time"),
    }
}

fn read_sim(bytes: &[u8], width: u8) -> f64 {
    match width {
        2 => f16_bits_to_f64(u16::from_le_bytes(bytes[..2].try_into().unwrap())),
        4 => f64::from(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
        8 => f64::from_le_bytes(bytes[..8].try_into().unwrap()),
        _ => unreachable!("width validated at header parse time"),
    }
}

fn write_header(buf: &mut Vec<u8>, widths: FieldWidths) {
    buf.push(VERSION);
    buf.push(widths.sim_bytes);
    buf.push(widths.dset_i_bytes);
    buf.push(widths.rec_i_bytes);
}

fn write_entry(buf: &mut Vec<u8>, pair: &CandidatePair, widths: FieldWidths) {
    write_sim(buf, pair.similarity, widths.sim_bytes);
    write_uint(buf, u64::from(pair.dset_i0), widths.dset_i_bytes);
    write_uint(buf, u64::from(pair.dset_i1), widths.dset_i_bytes);
    write_uint(buf, u64::from(pair.rec_i0), widths.rec_i_bytes);
    write_uint(buf, u64::from(pair.rec_i1), widths.rec_i_bytes);
}

fn decode_entry(buf: &[u8], widths: FieldWidths) -> CandidatePair {
    let mut offset = 0usize;
    let similarity = read_sim(&buf[offset..], widths.sim_bytes);
    offset += widths.sim_bytes as usize;
    let dset_i0 = read_uint(&buf[offset..], widths.dset_i_bytes) as u32;
    offset += widths.dset_i_bytes as usize;
    let dset_i1 = read_uint(&buf[offset..], widths.dset_i_bytes) as u32;
    offset += widths.dset_i_bytes as usize;
    let rec_i0 = read_uint(&buf[offset..], widths.rec_i_bytes) as u32;
    offset += widths.rec_i_bytes as usize;
    let rec_i1 = read_uint(&buf[offset..], widths.rec_i_bytes) as u32;
    // Bypass `CandidatePair::new`'s canonical-order debug assertion: this
    // struct was just decoded from an external byte stream the core does
    // not trust, and malformed input must surface as data, not a panic.
    CandidatePair { similarity, dset_i0, dset_i1, rec_i0, rec_i1 }
}

/// Read exactly `buf.len()` bytes, or as many as the source has before
/// hitting EOF. Returns the number of bytes actually read so callers can
/// tell a clean EOF (`0`) from a truncated tail (`0 < n < buf.len()`).
fn read_fully<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match source.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

fn read_header<R: Read>(source: &mut R) -> Result<FieldWidths> {
    let mut hdr = [0u8; HEADER_BYTES];
    let n = read_fully(source, &mut hdr)?;
    if n < HEADER_BYTES {
        return Err(Error::Truncated { expected: HEADER_BYTES, found: n });
    }
    if hdr[0] != VERSION {
        return Err(Error::UnsupportedVersion { version: hdr[0] });
    }
    FieldWidths {
        sim_bytes: hdr[1],
        dset_i_bytes: hdr[2],
        rec_i_bytes: hdr[3],
    }
    .validate()
}

fn read_entry<R: Read>(source: &mut R, widths: FieldWidths, stride: usize) -> Result<Option<CandidatePair>> {
    let mut buf = vec![0u8; stride];
    let n = read_fully(source, &mut buf)?;
    if n == 0 {
        return Ok(None);
    }
    if n < stride {
        return Err(Error::Truncated { expected: stride, found: n });
    }
    Ok(Some(decode_entry(&buf, widths)))
}

fn infer_widths(candidates: &CandidateList) -> FieldWidths {
    let sim_bytes = if candidates.similarities.iter().all(|&v| fits_f32(v)) { 4 } else { 8 };
    let max_dset = candidates
        .dset_i0
        .iter()
        .chain(candidates.dset_i1.iter())
        .copied()
        .max()
        .unwrap_or(0);
    let max_rec = candidates
        .rec_i0
        .iter()
        .chain(candidates.rec_i1.iter())
        .copied()
        .max()
        .unwrap_or(0);
    FieldWidths {
        sim_bytes,
        dset_i_bytes: index_width(u64::from(max_dset)),
        rec_i_bytes: index_width(u64::from(max_rec)),
    }
}

fn index_width(max_value: u64) -> u8 {
    if max_value <= u64::from(u8::MAX) {
        1
    } else if max_value <= u64::from(u16::MAX) {
        2
    } else if max_value <= u64::from(u32::MAX) {
        4
    } else {
        8
    }
}

/// Write `candidates` in the version-1 binary format, inferring the
/// smallest sufficient field widths. Returns the number of bytes written.
pub fn dump<W: Write>(candidates: &CandidateList, mut sink: W) -> Result<u64> {
    let (chunks, total) = dump_iter(candidates);
    for chunk in chunks {
        sink.write_all(&chunk)?;
    }
    Ok(total)
}

/// Streaming form of [`dump`]: yields the header followed by one chunk
/// per entry, alongside the total byte count that will be produced.
pub fn dump_iter(candidates: &CandidateList) -> (impl Iterator<Item = Vec<u8>> + '_, u64) {
    let widths = infer_widths(candidates);
    let stride = widths.entry_stride();
    let total = HEADER_BYTES as u64 + stride as u64 * candidates.len() as u64;

    let mut header = Vec::with_capacity(HEADER_BYTES);
    write_header(&mut header, widths);

    let entries = candidates.iter().map(move |pair| {
        let mut buf = Vec::with_capacity(stride);
        write_entry(&mut buf, &pair, widths);
        buf
    });

    (std::iter::once(header).chain(entries), total)
}

/// Read a version-1 candidate stream to completion.
pub fn load<R: Read>(source: R) -> Result<CandidateList> {
    let mut list = CandidateList::new();
    for pair in load_iter(source)? {
        list.push(pair?);
    }
    Ok(list)
}

/// Read a byte slice already fully in memory, additionally checking that
/// the body length is an integral number of entries up front (rather than
/// discovering a short tail only at the last entry).
pub fn load_bytes(bytes: &[u8]) -> Result<CandidateList> {
    if bytes.len() < HEADER_BYTES {
        return Err(Error::Truncated { expected: HEADER_BYTES, found: bytes.len() });
    }
    let mut cursor = bytes;
    let widths = read_header(&mut cursor)?;
    let stride = widths.entry_stride();
    let body_len = bytes.len() - HEADER_BYTES;
    if stride > 0 && body_len % stride != 0 {
        return Err(Error::NonIntegralEntryCount {
            body_len: body_len as u64,
            stride: stride as u64,
        });
    }
    load(cursor)
}

/// Lazy form of [`load`]: yields one `Result<CandidatePair>` per entry,
/// raising the header error immediately and any body error at the
/// offending entry.
pub fn load_iter<R: Read>(mut source: R) -> Result<LoadIter<R>> {
    let widths = read_header(&mut source)?;
    let stride = widths.entry_stride();
    Ok(LoadIter { source, widths, stride, done: false })
}

pub struct LoadIter<R> {
    source: R,
    widths: FieldWidths,
    stride: usize,
    done: bool,
}

impl<R: Read> Iterator for LoadIter<R> {
    type Item = Result<CandidatePair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_entry(&mut self.source, self.widths, self.stride) {
            Ok(Some(pair)) => Some(Ok(pair)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

struct HeapItem {
    pair: CandidatePair,
    source_idx: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap; we want it to pop the canonically
        // *first* candidate, so reverse the comparison, then break ties
        // deterministically by source index.
        crate::candidate::canonical_cmp(&other.pair, &self.pair)
            .then_with(|| other.source_idx.cmp(&self.source_idx))
    }
}

/// K-way merge several presorted version-1 streams into one canonically
/// ordered stream, using the widest field widths across all inputs so no
/// input value is narrowed. Returns the number of bytes written.
pub fn merge<R: Read, W: Write>(sources: Vec<R>, mut sink: W) -> Result<u64> {
    let (chunks, _) = merge_iter(sources, None)?;
    let mut total = 0u64;
    for chunk in chunks {
        let chunk = chunk?;
        sink.write_all(&chunk)?;
        total += chunk.len() as u64;
    }
    Ok(total)
}

/// Streaming form of [`merge`]. If `input_sizes` (the byte length of each
/// source) is supplied, the total output size is computed up front from
/// each source's header and entry count; otherwise the size is `None`.
pub fn merge_iter<R: Read>(
    mut sources: Vec<R>,
    input_sizes: Option<&[u64]>,
) -> Result<(MergeIter<R>, Option<u64>)> {
    if sources.is_empty() {
        return Err(Error::EmptyInputSet);
    }

    let mut widths_list = Vec::with_capacity(sources.len());
    for source in &mut sources {
        widths_list.push(read_header(source)?);
    }

    let out_widths = widths_list
        .iter()
        .copied()
        .reduce(FieldWidths::max)
        .expect("at least one source validated above");

    let total_size = input_sizes.map(|sizes| {
        let out_stride = out_widths.entry_stride() as u64;
        let total_entries: u64 = sizes
            .iter()
            .zip(&widths_list)
            .map(|(&size, widths)| (size - HEADER_BYTES as u64) / widths.entry_stride() as u64)
            .sum();
        HEADER_BYTES as u64 + out_stride * total_entries
    });

    let mut heap = BinaryHeap::new();
    for (idx, (source, &widths)) in sources.iter_mut().zip(&widths_list).enumerate() {
        let stride = widths.entry_stride();
        if let Some(pair) = read_entry(source, widths, stride)? {
            heap.push(HeapItem { pair, source_idx: idx });
        }
    }

    Ok((
        MergeIter {
            sources,
            widths_list,
            heap,
            out_widths,
            header_emitted: false,
        },
        total_size,
    ))
}

pub struct MergeIter<R> {
    sources: Vec<R>,
    widths_list: Vec<FieldWidths>,
    heap: BinaryHeap<HeapItem>,
    out_widths: FieldWidths,
    header_emitted: bool,
}

impl<R: Read> Iterator for MergeIter<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.header_emitted {
            self.header_emitted = true;
            let mut buf = Vec::with_capacity(HEADER_BYTES);
            write_header(&mut buf, self.out_widths);
            return Some(Ok(buf));
        }

        let item = self.heap.pop()?;
        let widths = self.widths_list[item.source_idx];
        let stride = widths.entry_stride();
        match read_entry(&mut self.sources[item.source_idx], widths, stride) {
            Ok(Some(next_pair)) => self.heap.push(HeapItem { pair: next_pair, source_idx: item.source_idx }),
            Ok(None) => {}
            Err(e) => return Some(Err(e)),
        }

        let mut buf = Vec::with_capacity(self.out_widths.entry_stride());
        write_entry(&mut buf, &item.pair, self.out_widths);
        Some(Ok(buf))
    }
}
