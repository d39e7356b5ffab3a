//! RAR5 archive encryption header parsing.
//!
//! When an archive is created with encrypted headers (`rar -hp`), this block
//! immediately follows the signature. Every later block is stored as a
//! 16-byte IV followed by the AES-256-CBC ciphertext of the header.

use super::VintReader;
use crate::error::{RarError, Result};

const CRYPTO_FLAG_PASSWORD_CHECK: u64 = 0x01;

const SALT_SIZE: usize = 16;
const CHECK_VALUE_SIZE: usize = 12;

/// Parsed archive encryption header.
#[derive(Debug, Clone)]
pub struct EncryptionHeader {
    /// Encryption algorithm version; only 0 (AES-256) is defined.
    pub version: u64,
    /// Encryption flags.
    pub flags: u64,
    /// log2 of the PBKDF2 iteration count.
    pub kdf_exponent: u8,
    /// KDF salt.
    pub salt: [u8; SALT_SIZE],
    /// Password check value: 8 check bytes + 4 checksum bytes.
    pub check_value: Option<[u8; CHECK_VALUE_SIZE]>,
}

impl EncryptionHeader {
    /// A stored check value allows verifying the password before any
    /// decryption work.
    pub fn has_password_check(&self) -> bool {
        self.flags & CRYPTO_FLAG_PASSWORD_CHECK != 0
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = VintReader::new(payload);

        let version = r.read().ok_or(RarError::InvalidHeader)?;
        let flags = r.read().ok_or(RarError::InvalidHeader)?;
        let kdf_exponent = r.read_u8().ok_or(RarError::InvalidHeader)?;

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(r.read_bytes(SALT_SIZE).ok_or(RarError::InvalidHeader)?);

        let check_value = if flags & CRYPTO_FLAG_PASSWORD_CHECK != 0 {
            let bytes = r
                .read_bytes(CHECK_VALUE_SIZE)
                .ok_or(RarError::InvalidHeader)?;
            let mut check = [0u8; CHECK_VALUE_SIZE];
            check.copy_from_slice(bytes);
            Some(check)
        } else {
            None
        };

        Ok(Self {
            version,
            flags,
            kdf_exponent,
            salt,
            check_value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_check_value() {
        let mut payload = vec![0x00, 0x01, 0x0F];
        payload.extend_from_slice(&[0xAB; SALT_SIZE]);
        payload.extend_from_slice(&[0xCD; CHECK_VALUE_SIZE]);

        let h = EncryptionHeader::parse(&payload).unwrap();
        assert_eq!(h.version, 0);
        assert_eq!(h.kdf_exponent, 15);
        assert!(h.has_password_check());
        assert_eq!(h.salt, [0xAB; SALT_SIZE]);
        assert_eq!(h.check_value, Some([0xCD; CHECK_VALUE_SIZE]));
    }

    #[test]
    fn parses_without_check_value() {
        let mut payload = vec![0x00, 0x00, 0x12];
        payload.extend_from_slice(&[0u8; SALT_SIZE]);

        let h = EncryptionHeader::parse(&payload).unwrap();
        assert!(!h.has_password_check());
        assert_eq!(h.check_value, None);
    }

    #[test]
    fn truncated_salt_is_invalid() {
        let payload = vec![0x00, 0x00, 0x0F, 0x01, 0x02];
        assert!(EncryptionHeader::parse(&payload).is_err());
    }
}
