//! Cryptographic support for encrypted RAR5 archives.
//!
//! RAR5 encrypts with AES-256 in CBC mode. Keys come from
//! PBKDF2-HMAC-SHA256 with a per-file (or per-archive) 16-byte salt and a
//! configurable iteration count stored as log2. Three related values are
//! derived from one password:
//!
//! | Value | Iterations | Use |
//! |---|---|---|
//! | AES key + hash key | `2^n` (64 contiguous bytes) | data decryption, MAC |
//! | CRC mask key | `2^n + 16` | HMAC masking of stored CRC32s |
//! | Password check | `2^n + 32` | fast wrong-password detection |
//!
//! The password check is the 32-byte PBKDF2 output folded by XOR into
//! 8 bytes; it lets the extractor reject a wrong password without touching
//! any ciphertext.

mod rar5;

pub use rar5::{
    decrypt_headers, derive_keys, derive_password_check, masked_crc_matches, verify_check_value,
    DecryptingReader, DerivedKeys, CHECK_VALUE_SIZE, INIT_VECTOR_SIZE, SALT_SIZE,
};

use crate::parsing::VintReader;

use std::fmt;

const CRYPTO_FLAG_PASSWORD_CHECK: u64 = 0x01;
const CRYPTO_FLAG_TWEAKED_CHECKSUMS: u64 = 0x02;

/// Error type for cryptographic operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext length is not a multiple of the AES block size.
    Misaligned,
    /// The encryption algorithm version is not AES-256 (version 0).
    UnsupportedAlgorithm(u64),
    /// The PBKDF2 iteration exponent exceeds the sane maximum.
    IterationCountTooLarge(u8),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Misaligned => write!(f, "encrypted data is not block-aligned"),
            Self::UnsupportedAlgorithm(v) => {
                write!(f, "unsupported encryption algorithm version {}", v)
            }
            Self::IterationCountTooLarge(n) => {
                write!(f, "KDF iteration exponent {} too large", n)
            }
        }
    }
}

impl std::error::Error for CryptoError {}

/// Encryption parameters from a file header's crypto extra record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEncryptionRecord {
    /// Algorithm version; only 0 (AES-256) is defined.
    pub algorithm: u64,
    /// Record flags.
    pub flags: u64,
    /// log2 of the PBKDF2 iteration count.
    pub kdf_exponent: u8,
    /// KDF salt, unique per file.
    pub salt: [u8; SALT_SIZE],
    /// CBC initialization vector for the file data.
    pub init_vector: [u8; INIT_VECTOR_SIZE],
    /// Password check value: 8 check bytes + 4 checksum bytes.
    pub check_value: Option<[u8; CHECK_VALUE_SIZE]>,
}

impl FileEncryptionRecord {
    /// Parse a crypto extra record:
    /// `vint(algorithm) ‖ vint(flags) ‖ u8(kdf exponent) ‖ salt[16] ‖
    /// iv[16] ‖ [check[12]]`.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let mut r = VintReader::new(data);

        let algorithm = r.read()?;
        let flags = r.read()?;
        let kdf_exponent = r.read_u8()?;

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(r.read_bytes(SALT_SIZE)?);

        let mut init_vector = [0u8; INIT_VECTOR_SIZE];
        init_vector.copy_from_slice(r.read_bytes(INIT_VECTOR_SIZE)?);

        let check_value = if flags & CRYPTO_FLAG_PASSWORD_CHECK != 0 {
            let mut check = [0u8; CHECK_VALUE_SIZE];
            check.copy_from_slice(r.read_bytes(CHECK_VALUE_SIZE)?);
            Some(check)
        } else {
            None
        };

        Some(Self {
            algorithm,
            flags,
            kdf_exponent,
            salt,
            init_vector,
            check_value,
        })
    }

    /// A stored check value is available for password verification.
    pub fn has_password_check(&self) -> bool {
        self.flags & CRYPTO_FLAG_PASSWORD_CHECK != 0
    }

    /// Stored CRC32s are HMAC-masked rather than plain.
    pub fn uses_tweaked_checksums(&self) -> bool {
        self.flags & CRYPTO_FLAG_TWEAKED_CHECKSUMS != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_with_check() {
        let mut data = vec![0x00, 0x03, 0x0F];
        data.extend_from_slice(&[0x11; SALT_SIZE]);
        data.extend_from_slice(&[0x22; INIT_VECTOR_SIZE]);
        data.extend_from_slice(&[0x33; CHECK_VALUE_SIZE]);

        let rec = FileEncryptionRecord::parse(&data).unwrap();
        assert_eq!(rec.algorithm, 0);
        assert_eq!(rec.kdf_exponent, 15);
        assert!(rec.has_password_check());
        assert!(rec.uses_tweaked_checksums());
        assert_eq!(rec.init_vector, [0x22; INIT_VECTOR_SIZE]);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let data = vec![0x00, 0x01, 0x0F, 0xAA, 0xBB];
        assert!(FileEncryptionRecord::parse(&data).is_none());
    }
}
