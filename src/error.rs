//! Error types for RAR5 parsing, decryption and extraction.
//!
//! [`RarError`] is the crate-level error returned by the archive reader and
//! the extractor. The decompression core has its own [`DecodeError`] with the
//! closed taxonomy the decoder needs (corrupted data, unsupported filter,
//! I/O, out of memory); it converts into `RarError` at the orchestrator
//! boundary.
//!
//! [`DecodeError`]: crate::decompress::DecodeError

use std::fmt;
use std::io;

use crate::crypto::CryptoError;
use crate::decompress::DecodeError;

/// Error type for RAR5 archive operations.
#[derive(Debug)]
pub enum RarError {
    /// The file does not start with the RAR5 signature
    /// `52 61 72 21 1A 07 01 00`.
    InvalidSignature,

    /// A block header is malformed, truncated, or inconsistent.
    InvalidHeader,

    /// The archive uses a feature this extractor does not implement.
    ///
    /// The string names the feature (e.g. multi-volume sets, split blocks,
    /// unknown compression algorithm version).
    UnsupportedArchive(&'static str),

    /// The archive (or a file in it) is encrypted and no password was given.
    PasswordRequired,

    /// The supplied password failed the stored password check.
    WrongPassword,

    /// The decompressed data does not match the stored checksum.
    ChecksumMismatch {
        /// CRC32 stored in the file header (possibly HMAC-masked).
        expected: u32,
        /// CRC32 computed over the extracted bytes.
        computed: u32,
    },

    /// A file name in the archive would escape the output directory.
    UnsafePath(String),

    /// The decompression core rejected the packed stream.
    Decode(DecodeError),

    /// A cryptographic operation failed.
    Crypto(CryptoError),

    /// An I/O error from the archive file or an output file.
    Io(io::Error),
}

impl fmt::Display for RarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSignature => write!(f, "not a RAR5 archive (bad signature)"),
            Self::InvalidHeader => write!(f, "invalid or malformed block header"),
            Self::UnsupportedArchive(what) => write!(f, "unsupported archive feature: {}", what),
            Self::PasswordRequired => write!(f, "archive is encrypted, password required"),
            Self::WrongPassword => write!(f, "wrong password"),
            Self::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {:08X}, computed {:08X}",
                    expected, computed
                )
            }
            Self::UnsafePath(name) => write!(f, "unsafe path in archive: {:?}", name),
            Self::Decode(e) => write!(f, "decompression failed: {}", e),
            Self::Crypto(e) => write!(f, "decryption failed: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for RarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Crypto(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RarError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for RarError {
    fn from(e: DecodeError) -> Self {
        // Surface the underlying I/O error unchanged rather than
        // double-wrapping it as a decode failure.
        match e {
            DecodeError::Io(io_err) => Self::Io(io_err),
            other => Self::Decode(other),
        }
    }
}

impl From<CryptoError> for RarError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

pub type Result<T> = std::result::Result<T, RarError>;
