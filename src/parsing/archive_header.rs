//! RAR5 main archive header parsing.

use super::VintReader;
use crate::error::{RarError, Result};

const ARC_FLAG_VOLUME: u64 = 0x01;
const ARC_FLAG_VOLUME_NUMBER: u64 = 0x02;
const ARC_FLAG_SOLID: u64 = 0x04;
const ARC_FLAG_RECOVERY: u64 = 0x08;
const ARC_FLAG_LOCKED: u64 = 0x10;

/// Parsed main archive header.
#[derive(Debug, Clone, Default)]
pub struct MainHeader {
    /// Raw archive flags.
    pub flags: u64,
    /// Volume number, when this is a non-first volume.
    pub volume_number: Option<u64>,
}

impl MainHeader {
    /// Archive is part of a multi-volume set.
    pub fn is_volume(&self) -> bool {
        self.flags & ARC_FLAG_VOLUME != 0
    }

    /// Archive-wide solid flag.
    pub fn is_solid(&self) -> bool {
        self.flags & ARC_FLAG_SOLID != 0
    }

    /// Archive carries a recovery record.
    pub fn has_recovery(&self) -> bool {
        self.flags & ARC_FLAG_RECOVERY != 0
    }

    /// Archive is locked against modification.
    pub fn is_locked(&self) -> bool {
        self.flags & ARC_FLAG_LOCKED != 0
    }

    /// Parse the type-specific payload (archive flags, optional volume
    /// number; locator/metadata extra records are skipped).
    pub fn parse(payload: &[u8], _extra_size: u64) -> Result<Self> {
        let mut r = VintReader::new(payload);
        let flags = r.read().ok_or(RarError::InvalidHeader)?;

        let volume_number = if flags & ARC_FLAG_VOLUME_NUMBER != 0 {
            Some(r.read().ok_or(RarError::InvalidHeader)?)
        } else {
            None
        };

        Ok(Self {
            flags,
            volume_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_decode() {
        let h = MainHeader::parse(&[ARC_FLAG_SOLID as u8 | ARC_FLAG_LOCKED as u8], 0).unwrap();
        assert!(h.is_solid());
        assert!(h.is_locked());
        assert!(!h.is_volume());
        assert_eq!(h.volume_number, None);
    }

    #[test]
    fn volume_number_present() {
        let flags = (ARC_FLAG_VOLUME | ARC_FLAG_VOLUME_NUMBER) as u8;
        let h = MainHeader::parse(&[flags, 0x07], 0).unwrap();
        assert!(h.is_volume());
        assert_eq!(h.volume_number, Some(7));
    }
}
