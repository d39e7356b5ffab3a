//! RAR5 block structure parsing.
//!
//! A RAR5 archive is the 8-byte signature followed by a sequence of blocks.
//! Every block starts with the same envelope:
//!
//! ```text
//! CRC32 (4 bytes) ‖ vint(header size) ‖ vint(type) ‖ vint(flags)
//!   ‖ [vint(extra size)] ‖ [vint(data size)] ‖ type-specific fields
//!   ‖ [extra area] ‖ [data area]
//! ```
//!
//! Parsing returns a [`Block`] tagged variant over the five concrete block
//! shapes rather than a base object with runtime type checks.

mod vint;

pub mod archive_header;
pub mod encryption_header;
pub mod end_header;
pub mod file_header;

pub use archive_header::MainHeader;
pub use encryption_header::EncryptionHeader;
pub use end_header::EndHeader;
pub use file_header::{CompressionInfo, FileHeader};
pub use vint::{read_vint, VintReader};

use crate::error::{RarError, Result};

/// RAR5 archive signature: `Rar!\x1A\x07\x01\x00`.
pub const RAR5_SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

/// Block type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderType {
    /// Main archive header
    Main = 1,
    /// File header
    File = 2,
    /// Service header (comments, NTFS streams, ...)
    Service = 3,
    /// Archive encryption header
    Encryption = 4,
    /// End of archive
    End = 5,
}

impl TryFrom<u64> for HeaderType {
    type Error = ();

    fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Main),
            2 => Ok(Self::File),
            3 => Ok(Self::Service),
            4 => Ok(Self::Encryption),
            5 => Ok(Self::End),
            _ => Err(()),
        }
    }
}

/// Flags shared by every block header.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderFlags {
    /// Extra area follows the type-specific fields
    pub has_extra_area: bool,
    /// Data area follows the header
    pub has_data_area: bool,
    /// Block may be skipped when the type is unknown
    pub skip_if_unknown: bool,
    /// Data continues from the previous volume
    pub split_before: bool,
    /// Data continues in the next volume
    pub split_after: bool,
}

impl From<u64> for HeaderFlags {
    fn from(flags: u64) -> Self {
        Self {
            has_extra_area: flags & 0x0001 != 0,
            has_data_area: flags & 0x0002 != 0,
            skip_if_unknown: flags & 0x0004 != 0,
            split_before: flags & 0x0008 != 0,
            split_after: flags & 0x0010 != 0,
        }
    }
}

impl HeaderFlags {
    /// Block is split across volume boundaries.
    pub fn is_split(&self) -> bool {
        self.split_before || self.split_after
    }
}

/// Type-specific body of a parsed block.
#[derive(Debug, Clone)]
pub enum Block {
    Main(MainHeader),
    File(FileHeader),
    /// Service blocks share the file header shape.
    Service(FileHeader),
    Encryption(EncryptionHeader),
    End(EndHeader),
}

/// One block with its position inside the archive.
#[derive(Debug, Clone)]
pub struct ScannedBlock {
    /// Stored header CRC32 (carried, not verified).
    pub crc32: u32,
    /// Envelope flags.
    pub flags: HeaderFlags,
    /// Offset of the block in the archive.
    pub start: u64,
    /// Offset of the data area (equals `data_end` when there is none).
    pub data_start: u64,
    /// End of the data area; the next block starts here.
    pub data_end: u64,
    /// Parsed body.
    pub body: Block,
}

/// Envelope fields plus the type-specific payload slice.
struct RawHeader<'a> {
    crc32: u32,
    header_type: u64,
    flags: HeaderFlags,
    extra_size: u64,
    data_size: u64,
    /// Type-specific fields followed by the extra area.
    payload: &'a [u8],
    /// Total header bytes from the block start (CRC through extra area).
    header_len: usize,
}

fn read_raw_header(data: &[u8], pos: usize) -> Result<RawHeader<'_>> {
    let buf = &data[pos..];
    if buf.len() < 7 {
        return Err(RarError::InvalidHeader);
    }

    let crc32 = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let (header_size, size_len) =
        read_vint(&buf[4..]).ok_or(RarError::InvalidHeader)?;
    let header_size = usize::try_from(header_size).map_err(|_| RarError::InvalidHeader)?;

    let body_start = 4 + size_len;
    let body_end = body_start
        .checked_add(header_size)
        .ok_or(RarError::InvalidHeader)?;
    let body = buf.get(body_start..body_end).ok_or(RarError::InvalidHeader)?;

    let mut r = VintReader::new(body);
    let header_type = r.read().ok_or(RarError::InvalidHeader)?;
    let flags_raw = r.read().ok_or(RarError::InvalidHeader)?;
    let flags = HeaderFlags::from(flags_raw);

    let extra_size = if flags.has_extra_area {
        r.read().ok_or(RarError::InvalidHeader)?
    } else {
        0
    };
    let data_size = if flags.has_data_area {
        r.read().ok_or(RarError::InvalidHeader)?
    } else {
        0
    };

    if extra_size > (body.len() - r.position()) as u64 {
        return Err(RarError::InvalidHeader);
    }

    Ok(RawHeader {
        crc32,
        header_type,
        flags,
        extra_size,
        data_size,
        payload: &body[r.position()..],
        header_len: body_start + header_size,
    })
}

/// Parse the block at `pos`, returning it together with the position of the
/// next block.
pub fn parse_block(data: &[u8], pos: usize) -> Result<ScannedBlock> {
    let raw = read_raw_header(data, pos)?;

    let body = match HeaderType::try_from(raw.header_type) {
        Ok(HeaderType::Main) => Block::Main(MainHeader::parse(raw.payload, raw.extra_size)?),
        Ok(HeaderType::File) => {
            Block::File(FileHeader::parse(raw.payload, raw.extra_size, raw.data_size)?)
        }
        Ok(HeaderType::Service) => {
            Block::Service(FileHeader::parse(raw.payload, raw.extra_size, raw.data_size)?)
        }
        Ok(HeaderType::Encryption) => {
            Block::Encryption(EncryptionHeader::parse(raw.payload)?)
        }
        Ok(HeaderType::End) => Block::End(EndHeader::parse(raw.payload)?),
        Err(()) => return Err(RarError::InvalidHeader),
    };

    let data_start = pos as u64 + raw.header_len as u64;
    let data_end = data_start
        .checked_add(raw.data_size)
        .ok_or(RarError::InvalidHeader)?;

    Ok(ScannedBlock {
        crc32: raw.crc32,
        flags: raw.flags,
        start: pos as u64,
        data_start,
        data_end,
        body,
    })
}

/// Verify the signature and walk every block of an in-memory archive image.
///
/// Scanning stops at the end-of-archive block or when fewer than a minimal
/// header's worth of bytes remain.
pub fn scan_blocks(data: &[u8]) -> Result<Vec<ScannedBlock>> {
    if data.len() < RAR5_SIGNATURE.len() || data[..8] != RAR5_SIGNATURE {
        return Err(RarError::InvalidSignature);
    }

    let mut blocks = Vec::new();
    let mut pos = RAR5_SIGNATURE.len();

    while pos + 7 <= data.len() {
        let block = parse_block(data, pos)?;
        let next = usize::try_from(block.data_end).map_err(|_| RarError::InvalidHeader)?;
        if next > data.len() || next <= pos {
            return Err(RarError::InvalidHeader);
        }
        let is_end = matches!(block.body, Block::End(_));
        blocks.push(block);
        pos = next;
        if is_end {
            break;
        }
    }

    Ok(blocks)
}
