//! The error taxonomy shared by every component in this crate.
//!
//! Nothing here recovers internally: a fallible call either succeeds or
//! returns one of these variants, and the caller decides what to do next.

use thiserror::Error;

/// Every way a public `anonlink` operation can fail.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// A numeric parameter (merge threshold, radius, `r`/`g`, `k`, a
    /// threshold) was out of its valid range or non-finite.
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// A similarity kernel was called with fewer than two datasets.
    #[error("at least two datasets are required, got {found}")]
    NotEnoughDatasets { found: usize },

    /// A similarity kernel was called with more than two datasets.
    #[error("at most two datasets are supported by this kernel, got {found}")]
    TooManyDatasets { found: usize },

    /// A solver or stats helper received candidates spanning a number of
    /// datasets it cannot handle (e.g. a two-party-only helper fed
    /// multiparty candidates).
    #[error("unsupported arity: expected {expected} dataset(s), found {found}")]
    UnsupportedArity { expected: usize, found: usize },

    /// Two CLKs (or a CLK and a blocking table) disagreed on bit length.
    #[error("inconsistent CLK length: expected {expected} bits, found {found} bits")]
    InconsistentLength { expected: usize, found: usize },

    /// A CLK's bit length was not a positive multiple of 8.
    #[error("unsupported CLK length: {bits} bits is not a positive multiple of 8")]
    UnsupportedLength { bits: usize },

    /// A chunk's declared shape did not match the sub-datasets supplied to
    /// `process_chunk`.
    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },

    /// The codec encountered a header version it doesn't understand.
    #[error("unsupported candidate file version: {version}")]
    UnsupportedVersion { version: u8 },

    /// The codec encountered a field width its header declares, that no
    /// supported encoding uses.
    #[error("unsupported field width: {bytes} bytes")]
    UnsupportedWidth { bytes: u8 },

    /// A streaming reader ran out of bytes mid-entry.
    #[error("truncated candidate stream: expected {expected} more bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    /// The body of a candidate file was not an integral number of entries.
    #[error("body size {body_len} is not a multiple of the entry stride {stride}")]
    NonIntegralEntryCount { body_len: u64, stride: u64 },

    /// `merge`/`merge_iter` was called with no input sources.
    #[error("at least one input source is required for a merge")]
    EmptyInputSet,

    /// The solver's parallel candidate arrays did not have matching
    /// lengths.
    #[error("invalid candidate shape: {reason}")]
    InvalidCandidateShape { reason: String },

    /// A stats helper was asked for a nonmatch rank beyond what the
    /// candidate stream contains.
    #[error("requested the {n}-th nonmatch, but only {found} exist")]
    TooFewNonmatches { n: usize, found: usize },

    /// An I/O failure while reading from or writing to a caller-supplied
    /// byte stream during candidate (de)serialization.
    #[error("I/O error during candidate (de)serialization: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
