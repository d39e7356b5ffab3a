//! RAR5 file and service header parsing.
//!
//! File headers carry the per-file metadata: name, sizes, compression
//! parameters, optional timestamp and checksum, and an extra area with
//! typed records (encryption, hash, times, version, link). Service blocks
//! use the identical layout, so both are parsed into [`FileHeader`].

use super::VintReader;
use crate::crypto::FileEncryptionRecord;
use crate::error::{RarError, Result};

/// Extra record ids inside a file header.
const EXTRA_ID_CRYPTO: u64 = 1;
const EXTRA_ID_HASH: u64 = 2;
const EXTRA_ID_TIME: u64 = 3;
const EXTRA_ID_VERSION: u64 = 4;
const EXTRA_ID_LINK: u64 = 5;

/// Solid flag inside the compression info field.
const METHOD_FLAG_SOLID: u64 = 0x40;
/// Version-1 streams that must still use the version-0 Huffman layout.
const METHOD_FLAG_RAR5_COMPAT: u64 = 0x100000;

/// File-specific flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileFlags {
    /// Entry is a directory
    pub is_directory: bool,
    /// Unix modification time is present
    pub has_mtime: bool,
    /// CRC32 of the unpacked data is present
    pub has_crc32: bool,
    /// Unpacked size is unknown
    pub unknown_size: bool,
}

impl From<u64> for FileFlags {
    fn from(flags: u64) -> Self {
        Self {
            is_directory: flags & 0x01 != 0,
            has_mtime: flags & 0x02 != 0,
            has_crc32: flags & 0x04 != 0,
            unknown_size: flags & 0x08 != 0,
        }
    }
}

/// Decoded compression info field.
///
/// Bit layout of the vint: `0..5` algorithm version, `6` solid, `7..9`
/// method, `10..` dictionary size main (4 bits for version 0, 5 for
/// version 1), `15..19` dictionary size fraction (version 1), `20`
/// compatibility flag (version 1 stream, version 0 table layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionInfo {
    raw: u64,
}

impl From<u64> for CompressionInfo {
    fn from(raw: u64) -> Self {
        Self { raw }
    }
}

impl CompressionInfo {
    /// Declared algorithm version (0 or 1; anything else is unsupported).
    pub fn algo_version(&self) -> u8 {
        (self.raw & 0x3F) as u8
    }

    /// Algorithm version as it applies to the Huffman table layout:
    /// a version-1 stream with the compatibility flag decodes as version 0.
    pub fn effective_version(&self) -> u8 {
        let v = self.algo_version();
        if v == 1 && self.raw & METHOD_FLAG_RAR5_COMPAT != 0 {
            0
        } else {
            v
        }
    }

    /// File uses the v7 table layout (80 distance symbols).
    pub fn is_v7(&self) -> bool {
        self.effective_version() == 1
    }

    /// File continues the solid chain.
    pub fn is_solid(&self) -> bool {
        self.raw & METHOD_FLAG_SOLID != 0
    }

    /// Compression method, 0 (store) through 5 (best).
    pub fn method(&self) -> u8 {
        ((self.raw >> 7) & 0x7) as u8
    }

    /// Dictionary size exponent component.
    pub fn dict_size_main(&self) -> u8 {
        let mask = if self.algo_version() == 0 { 0xF } else { 0x1F };
        ((self.raw >> 10) & mask) as u8
    }

    /// Dictionary size fraction component (version 1 only).
    pub fn dict_size_frac(&self) -> u8 {
        if self.algo_version() == 0 {
            0
        } else {
            ((self.raw >> 15) & 0x1F) as u8
        }
    }

    /// Dictionary window size in bytes; 0 for unsupported versions.
    pub fn window_size(&self) -> u64 {
        if self.algo_version() > 1 {
            return 0;
        }
        (32 + self.dict_size_frac() as u64) << (12 + self.dict_size_main())
    }

    /// The 2-byte property block consumed by the decompression core:
    /// `[pow, (frac << 3) | (v7 << 1) | solid]`.
    pub fn decoder_properties(&self) -> [u8; 2] {
        let v7 = if self.is_v7() { 1 } else { 0 };
        let solid = if self.is_solid() { 1 } else { 0 };
        [
            self.dict_size_main(),
            (self.dict_size_frac() << 3) | (v7 << 1) | solid,
        ]
    }
}

/// BLAKE2sp hash record (carried for information, not verified).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub hash_type: u64,
    pub digest: Vec<u8>,
}

/// Extended timestamps record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRecord {
    pub mtime: Option<u64>,
    pub ctime: Option<u64>,
    pub atime: Option<u64>,
}

/// Symbolic/hard link record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub link_type: u64,
    pub flags: u64,
    pub target: String,
}

/// Parsed file or service header.
#[derive(Debug, Clone)]
pub struct FileHeader {
    /// File-specific flags.
    pub flags: FileFlags,
    /// Unpacked size; `None` when declared unknown.
    pub unpacked_size: Option<u64>,
    /// Host attribute bits.
    pub attributes: u64,
    /// Unix modification time, seconds.
    pub mtime: Option<u32>,
    /// CRC32 of the unpacked data (HMAC-masked for encrypted files).
    pub data_crc32: Option<u32>,
    /// Compression parameters.
    pub compression: CompressionInfo,
    /// Host OS (0 Windows, 1 Unix).
    pub host_os: u64,
    /// File name, forward-slash separated.
    pub name: String,
    /// Packed data size from the block envelope.
    pub packed_size: u64,
    /// Encryption parameters when the file data is encrypted.
    pub encryption: Option<FileEncryptionRecord>,
    /// Optional hash record.
    pub hash: Option<HashRecord>,
    /// Optional extended timestamps.
    pub times: Option<TimeRecord>,
    /// Optional file version number.
    pub version: Option<u64>,
    /// Optional link record.
    pub link: Option<LinkRecord>,
}

impl FileHeader {
    /// True when the file data is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// Parse the type-specific payload of a file/service block.
    /// `payload` covers the fields after the common envelope, with the
    /// extra area as its last `extra_size` bytes.
    pub fn parse(payload: &[u8], extra_size: u64, data_size: u64) -> Result<Self> {
        let mut r = VintReader::new(payload);

        let flags = FileFlags::from(r.read().ok_or(RarError::InvalidHeader)?);
        let size_field = r.read().ok_or(RarError::InvalidHeader)?;
        let unpacked_size = if flags.unknown_size { None } else { Some(size_field) };
        let attributes = r.read().ok_or(RarError::InvalidHeader)?;

        let mtime = if flags.has_mtime {
            Some(r.read_u32_le().ok_or(RarError::InvalidHeader)?)
        } else {
            None
        };
        let data_crc32 = if flags.has_crc32 {
            Some(r.read_u32_le().ok_or(RarError::InvalidHeader)?)
        } else {
            None
        };

        let compression = CompressionInfo::from(r.read().ok_or(RarError::InvalidHeader)?);
        let host_os = r.read().ok_or(RarError::InvalidHeader)?;

        let name_len = r.read().ok_or(RarError::InvalidHeader)?;
        let name_len = usize::try_from(name_len).map_err(|_| RarError::InvalidHeader)?;
        let name_bytes = r.read_bytes(name_len).ok_or(RarError::InvalidHeader)?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        let mut header = Self {
            flags,
            unpacked_size,
            attributes,
            mtime,
            data_crc32,
            compression,
            host_os,
            name,
            packed_size: data_size,
            encryption: None,
            hash: None,
            times: None,
            version: None,
            link: None,
        };

        let extra_size = usize::try_from(extra_size).map_err(|_| RarError::InvalidHeader)?;
        if extra_size > 0 {
            let extra = r.read_bytes(extra_size).ok_or(RarError::InvalidHeader)?;
            header.parse_extra_area(extra)?;
        }

        Ok(header)
    }

    /// Walk the extra area records. Unknown ids are skipped; individually
    /// malformed records are ignored rather than failing the whole header.
    fn parse_extra_area(&mut self, extra: &[u8]) -> Result<()> {
        let mut r = VintReader::new(extra);

        while r.position() < extra.len() {
            let Some(record_size) = r.read() else { break };
            let before_id = r.position();
            let Some(id) = r.read() else { break };
            let id_len = r.position() - before_id;

            let record_size = usize::try_from(record_size).map_err(|_| RarError::InvalidHeader)?;
            let Some(data_len) = record_size.checked_sub(id_len) else { break };
            let Some(data) = r.read_bytes(data_len) else { break };

            match id {
                EXTRA_ID_CRYPTO => self.encryption = FileEncryptionRecord::parse(data),
                EXTRA_ID_HASH => self.hash = parse_hash_record(data),
                EXTRA_ID_TIME => self.times = parse_time_record(data),
                EXTRA_ID_VERSION => self.version = parse_version_record(data),
                EXTRA_ID_LINK => self.link = parse_link_record(data),
                _ => {}
            }
        }

        Ok(())
    }
}

fn parse_hash_record(data: &[u8]) -> Option<HashRecord> {
    let mut r = VintReader::new(data);
    let hash_type = r.read()?;
    let digest = data[r.position()..].to_vec();
    Some(HashRecord { hash_type, digest })
}

fn parse_time_record(data: &[u8]) -> Option<TimeRecord> {
    const FLAG_UNIX: u64 = 0x01;
    const FLAG_MTIME: u64 = 0x02;
    const FLAG_CTIME: u64 = 0x04;
    const FLAG_ATIME: u64 = 0x08;

    let mut r = VintReader::new(data);
    let flags = r.read()?;
    // Unix times are 4 bytes, Windows FILETIME 8.
    let width = if flags & FLAG_UNIX != 0 { 4 } else { 8 };

    let mut read_stamp = |present: bool| -> Option<Option<u64>> {
        if !present {
            return Some(None);
        }
        let bytes = r.read_bytes(width)?;
        let mut v = 0u64;
        for (i, &b) in bytes.iter().enumerate() {
            v |= u64::from(b) << (i * 8);
        }
        Some(Some(v))
    };

    let mtime = read_stamp(flags & FLAG_MTIME != 0)?;
    let ctime = read_stamp(flags & FLAG_CTIME != 0)?;
    let atime = read_stamp(flags & FLAG_ATIME != 0)?;

    Some(TimeRecord { mtime, ctime, atime })
}

fn parse_version_record(data: &[u8]) -> Option<u64> {
    let mut r = VintReader::new(data);
    let _flags = r.read()?;
    r.read()
}

fn parse_link_record(data: &[u8]) -> Option<LinkRecord> {
    let mut r = VintReader::new(data);
    let link_type = r.read()?;
    let flags = r.read()?;
    let target_len = usize::try_from(r.read()?).ok()?;
    let target_bytes = r.read_bytes(target_len)?;
    Some(LinkRecord {
        link_type,
        flags,
        target: String::from_utf8_lossy(target_bytes).into_owned(),
    })
}
