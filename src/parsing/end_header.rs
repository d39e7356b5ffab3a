//! RAR5 end-of-archive header parsing.

use super::VintReader;
use crate::error::{RarError, Result};

const END_FLAG_MORE_VOLUMES: u64 = 0x01;

/// Parsed end-of-archive header.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndHeader {
    /// Raw end-of-archive flags.
    pub flags: u64,
}

impl EndHeader {
    /// The set continues in a following volume.
    pub fn more_volumes(&self) -> bool {
        self.flags & END_FLAG_MORE_VOLUMES != 0
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut r = VintReader::new(payload);
        let flags = r.read().ok_or(RarError::InvalidHeader)?;
        Ok(Self { flags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_volume() {
        let h = EndHeader::parse(&[0x00]).unwrap();
        assert!(!h.more_volumes());
    }

    #[test]
    fn continues() {
        let h = EndHeader::parse(&[0x01]).unwrap();
        assert!(h.more_volumes());
    }
}
