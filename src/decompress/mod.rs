//! RAR5 decompression core.
//!
//! The pipeline per file:
//!
//! ```text
//! compressed bytes
//!       ↓
//! BitReader        bit-level access with 0xFF look-ahead padding
//!       ↓
//! LZ engine        Huffman blocks -> literals and match copies into the
//!       ↓          sliding window
//! OutputStager     window -> filter staging -> sink, with size clamping
//!       ↓
//! unpacked bytes
//! ```
//!
//! The decoder object owns the sliding dictionary and survives across
//! files: a solid archive chain must be decoded serially on one
//! [`Rar5Decoder`], without calling [`Rar5Decoder::reset`] between files.

mod bit_reader;
mod filter;
mod huffman;
mod lz;
mod stager;

pub use lz::Rar5Decoder;

use std::fmt;
use std::io;

/// Decompression errors (closed taxonomy).
#[derive(Debug)]
pub enum DecodeError {
    /// The packed stream violates the format: bad Kraft sum, bad block
    /// checksum, table over-read, invalid distance, size mismatch.
    /// Fatal to the current file.
    CorruptedData(&'static str),

    /// Unknown filter type, overlapping filter ranges, or filter queue
    /// saturation. Fatal to the current file.
    UnsupportedFilter,

    /// The stream requests a capability outside this decoder
    /// (e.g. a dictionary above 4 GiB).
    Unsupported(&'static str),

    /// A required buffer could not be sized.
    OutOfMemory(&'static str),

    /// The source or sink reported an error; surfaced unchanged.
    Io(io::Error),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptedData(what) => write!(f, "corrupted data: {}", what),
            Self::UnsupportedFilter => write!(f, "unsupported filter"),
            Self::Unsupported(what) => write!(f, "unsupported: {}", what),
            Self::OutOfMemory(what) => write!(f, "allocation failed: {}", what),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
