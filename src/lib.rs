//! RAR5 archive extraction.
//!
//! This crate reads archives in the RAR5 container format and reconstructs
//! each stored file bit-identically: block parsing, AES-256 decryption of
//! headers and file data, the full LZ + Huffman decompression engine with
//! DELTA/E8/E8E9/ARM post-processing filters, solid-archive dictionary
//! reuse, and CRC32 verification (plain or HMAC-masked for encrypted
//! files).
//!
//! ## Extracting an archive
//!
//! ```rust,ignore
//! use std::path::Path;
//! use unrar5::{Archive, Extractor};
//!
//! let archive = Archive::open(Path::new("backup.rar"), Some("secret"))?;
//! let mut extractor = Extractor::new(Some("secret".into()));
//! let report = extractor.extract(&archive, Path::new("out/"))?;
//! println!("{}/{} files extracted", report.succeeded, report.total_files);
//! ```
//!
//! ## Layers
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`parsing`] | signature, vints, the five block header shapes |
//! | [`crypto`] | PBKDF2 key derivation, password checks, AES-256-CBC |
//! | [`decompress`] | bit reader, Huffman decoders, LZ engine, filters |
//! | [`extract`] | per-file orchestration, checksums, path safety |
//!
//! Writing archives, recovery records, BLAKE2sp verification, RAR4 and
//! multi-volume sets are out of scope.

mod crc32;
pub mod crypto;
pub mod decompress;
pub mod error;
pub mod extract;
pub mod parsing;

pub use crc32::{crc32, Crc32};
pub use decompress::{DecodeError, Rar5Decoder};
pub use error::{RarError, Result};
pub use extract::{Archive, ExtractionReport, Extractor, PasswordStatus};
