//! Archive-level extraction.
//!
//! [`Archive`] opens and scans a RAR5 archive (decrypting headers into an
//! in-memory image when needed); [`Extractor`] walks the file blocks,
//! decrypts and decompresses each one, verifies checksums and writes the
//! results under a target directory.
//!
//! The extractor owns one [`Rar5Decoder`] so a solid chain decodes on a
//! single dictionary. Two extractors share nothing; concurrent extractions
//! cannot observe each other.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use crate::crc32::Crc32;
use crate::crypto::{self, CryptoError, DecryptingReader};
use crate::decompress::Rar5Decoder;
use crate::error::{RarError, Result};
use crate::parsing::{self, Block, FileHeader, HeaderType, ScannedBlock, RAR5_SIGNATURE};

/// Outcome of password verification across an extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordStatus {
    /// Nothing was encrypted, or no check value was stored.
    NotChecked,
    /// The password matched a stored check value.
    Verified,
    /// The password failed a stored check value.
    Wrong,
}

/// One failed file.
#[derive(Debug)]
pub struct FileFailure {
    pub name: String,
    pub error: RarError,
}

/// Summary of an extraction run.
#[derive(Debug)]
pub struct ExtractionReport {
    pub total_files: usize,
    pub succeeded: usize,
    pub failures: Vec<FileFailure>,
    pub password_status: PasswordStatus,
}

impl ExtractionReport {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A scanned RAR5 archive held in memory with plaintext headers.
#[derive(Debug)]
pub struct Archive {
    image: Vec<u8>,
    blocks: Vec<ScannedBlock>,
    encrypted_headers: bool,
}

impl Archive {
    /// Open and scan an archive file.
    pub fn open(path: &Path, password: Option<&str>) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(data, password)
    }

    /// Scan an archive already loaded into memory.
    ///
    /// When the headers are encrypted the password is verified against the
    /// stored check value first, then every header is decrypted into a
    /// fresh image; file data stays encrypted until extraction.
    pub fn from_bytes(data: Vec<u8>, password: Option<&str>) -> Result<Self> {
        if data.len() < RAR5_SIGNATURE.len() || data[..8] != RAR5_SIGNATURE {
            return Err(RarError::InvalidSignature);
        }

        let first = parsing::parse_block(&data, RAR5_SIGNATURE.len())?;
        let (image, encrypted_headers) = match &first.body {
            Block::Encryption(header) => {
                let password = password.ok_or(RarError::PasswordRequired)?;
                if let Some(check) = &header.check_value {
                    let ok = crypto::verify_check_value(
                        password,
                        &header.salt,
                        header.kdf_exponent,
                        check,
                    )?;
                    if !ok {
                        return Err(RarError::WrongPassword);
                    }
                }
                let pos = first.data_end as usize;
                let image = crypto::decrypt_headers(&data, pos, header, password)?;
                (image, true)
            }
            _ => (data, false),
        };

        let blocks = parsing::scan_blocks(&image)?;

        for block in &blocks {
            if block.flags.is_split() {
                return Err(RarError::UnsupportedArchive("volume-split block"));
            }
            if let Block::Main(main) = &block.body {
                if main.is_volume() {
                    return Err(RarError::UnsupportedArchive("multi-volume set"));
                }
            }
        }

        Ok(Self {
            image,
            blocks,
            encrypted_headers,
        })
    }

    /// Cheap probe: does the file start with an archive encryption block?
    pub fn is_header_encrypted(path: &Path) -> Result<bool> {
        let mut prefix = [0u8; 64];
        let mut file = File::open(path)?;
        let mut read = 0;
        while read < prefix.len() {
            match file.read(&mut prefix[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let prefix = &prefix[..read];

        if prefix.len() < RAR5_SIGNATURE.len() + 7 || prefix[..8] != RAR5_SIGNATURE {
            return Ok(false);
        }
        let mut r = parsing::VintReader::new(&prefix[RAR5_SIGNATURE.len() + 4..]);
        let Some(_header_size) = r.read() else {
            return Ok(false);
        };
        let Some(block_type) = r.read() else {
            return Ok(false);
        };
        Ok(HeaderType::try_from(block_type) == Ok(HeaderType::Encryption))
    }

    /// Headers were encrypted on disk.
    pub fn has_encrypted_headers(&self) -> bool {
        self.encrypted_headers
    }

    /// All scanned blocks, in archive order.
    pub fn blocks(&self) -> &[ScannedBlock] {
        &self.blocks
    }

    /// File entries, in archive order.
    pub fn files(&self) -> impl Iterator<Item = (&ScannedBlock, &FileHeader)> {
        self.blocks.iter().filter_map(|b| match &b.body {
            Block::File(h) => Some((b, h)),
            _ => None,
        })
    }

    fn packed_data(&self, block: &ScannedBlock) -> Result<&[u8]> {
        self.image
            .get(block.data_start as usize..block.data_end as usize)
            .ok_or(RarError::InvalidHeader)
    }
}

/// Streams written bytes through a running CRC32.
struct CrcWriter<W> {
    inner: W,
    crc: Crc32,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            crc: Crc32::new(),
        }
    }

    fn crc(&self) -> u32 {
        self.crc.finish()
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.crc.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Extracts files from scanned archives.
pub struct Extractor {
    password: Option<String>,
    decoder: Rar5Decoder,
}

impl Extractor {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password,
            decoder: Rar5Decoder::new(),
        }
    }

    /// Extract every file entry into `out_dir`.
    ///
    /// Files fail individually; the report collects per-file errors and the
    /// run only aborts for archive-level problems. A failed file leaves no
    /// partial output behind and forces a dictionary reset before the next
    /// file, since a poisoned solid chain cannot continue.
    pub fn extract(&mut self, archive: &Archive, out_dir: &Path) -> Result<ExtractionReport> {
        fs::create_dir_all(out_dir)?;

        let mut report = ExtractionReport {
            total_files: 0,
            succeeded: 0,
            failures: Vec::new(),
            password_status: if archive.has_encrypted_headers() {
                PasswordStatus::Verified
            } else {
                PasswordStatus::NotChecked
            },
        };

        for (block, header) in archive.files() {
            report.total_files += 1;
            match self.extract_file(archive, block, header, out_dir, &mut report) {
                Ok(()) => report.succeeded += 1,
                Err(error) => {
                    self.decoder.reset();
                    report.failures.push(FileFailure {
                        name: header.name.clone(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }

    fn extract_file(
        &mut self,
        archive: &Archive,
        block: &ScannedBlock,
        header: &FileHeader,
        out_dir: &Path,
        report: &mut ExtractionReport,
    ) -> Result<()> {
        if header.flags.is_directory {
            let dir = safe_join(out_dir, &header.name)?;
            fs::create_dir_all(&dir)?;
            return Ok(());
        }

        let target = safe_join(out_dir, &header.name)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let packed = archive.packed_data(block)?;
        if packed.is_empty() && header.unpacked_size.unwrap_or(0) == 0 {
            File::create(&target)?;
            return Ok(());
        }

        match self.unpack_to(&target, packed, header, archive.has_encrypted_headers()) {
            Ok(()) => {
                if header.is_encrypted() && report.password_status == PasswordStatus::NotChecked {
                    report.password_status = PasswordStatus::Verified;
                }
                Ok(())
            }
            Err(e) => {
                if matches!(e, RarError::WrongPassword) {
                    report.password_status = PasswordStatus::Wrong;
                }
                let _ = fs::remove_file(&target);
                Err(e)
            }
        }
    }

    fn unpack_to(
        &mut self,
        target: &Path,
        packed: &[u8],
        header: &FileHeader,
        headers_were_encrypted: bool,
    ) -> Result<()> {
        let method = header.compression.method();
        if method > 5 {
            return Err(RarError::UnsupportedArchive("compression method"));
        }
        if header.compression.algo_version() > 1 {
            return Err(RarError::UnsupportedArchive("compression algorithm version"));
        }

        let mut sink = CrcWriter::new(BufWriter::new(File::create(target)?));

        let crypto_record = header.encryption.as_ref();
        let computed_crc = if let Some(record) = crypto_record {
            let password = self
                .password
                .as_deref()
                .ok_or(RarError::PasswordRequired)?;

            if record.algorithm != 0 {
                return Err(RarError::Crypto(CryptoError::UnsupportedAlgorithm(
                    record.algorithm,
                )));
            }
            if let Some(check) = &record.check_value {
                let ok = crypto::verify_check_value(
                    password,
                    &record.salt,
                    record.kdf_exponent,
                    check,
                )?;
                if !ok {
                    return Err(RarError::WrongPassword);
                }
            }

            let keys = crypto::derive_keys(password, &record.salt, record.kdf_exponent)?;
            let reader = DecryptingReader::new(packed, &keys.aes_key, &record.init_vector);
            self.run_method(method, reader, &mut sink, header)?
        } else {
            self.run_method(method, packed, &mut sink, header)?
        };

        sink.flush()?;
        drop(sink);

        if let Some(stored) = header.data_crc32 {
            let matches = match crypto_record {
                // Encrypted file under plaintext headers: the stored CRC is
                // HMAC-masked so the archive does not leak a checksum of
                // the cleartext.
                Some(record) if !headers_were_encrypted => crypto::masked_crc_matches(
                    self.password.as_deref().unwrap_or(""),
                    &record.salt,
                    record.kdf_exponent,
                    computed_crc,
                    stored,
                )?,
                _ => computed_crc == stored,
            };
            if !matches {
                return Err(RarError::ChecksumMismatch {
                    expected: stored,
                    computed: computed_crc,
                });
            }
        }

        Ok(())
    }

    fn run_method<R: Read, W: Write>(
        &mut self,
        method: u8,
        mut input: R,
        sink: &mut CrcWriter<W>,
        header: &FileHeader,
    ) -> Result<u32> {
        if method == 0 {
            let limit = header.unpacked_size;
            copy_stored(&mut input, sink, limit)?;
        } else {
            if !header.compression.is_solid() {
                self.decoder.reset();
            }
            self.decoder
                .set_properties(header.compression.decoder_properties())?;
            self.decoder
                .decode(&mut input, sink, header.unpacked_size)?;
        }
        Ok(sink.crc())
    }
}

/// Copy a stored (method 0) entry, clamped to the declared size.
fn copy_stored<R: Read, W: Write>(input: &mut R, sink: &mut W, limit: Option<u64>) -> Result<()> {
    let mut remaining = limit;
    let mut buf = [0u8; 8192];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        let take = match &mut remaining {
            None => n,
            Some(rem) => {
                let take = n.min(*rem as usize);
                *rem -= take as u64;
                take
            }
        };
        sink.write_all(&buf[..take])?;
        if remaining == Some(0) {
            break;
        }
    }
    Ok(())
}

/// Join an archive member name onto the output directory, refusing anything
/// that could escape it: absolute paths, parent components, drive prefixes.
fn safe_join(base: &Path, name: &str) -> Result<PathBuf> {
    // Archive names are '/'-separated; normalize Windows separators too.
    let normalized = name.replace('\\', "/");
    let rel = Path::new(&normalized);

    let mut out = base.to_path_buf();
    let mut pushed = 0;
    for comp in rel.components() {
        match comp {
            Component::Normal(part) => {
                let part_str = part.to_string_lossy();
                if part_str.contains(':') {
                    return Err(RarError::UnsafePath(name.to_string()));
                }
                out.push(part);
                pushed += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RarError::UnsafePath(name.to_string()));
            }
        }
    }
    if pushed == 0 {
        return Err(RarError::UnsafePath(name.to_string()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_join_accepts_nested_names() {
        let base = Path::new("/tmp/out");
        let p = safe_join(base, "dir/sub/file.txt").unwrap();
        assert_eq!(p, Path::new("/tmp/out/dir/sub/file.txt"));
    }

    #[test]
    fn safe_join_rejects_escapes() {
        let base = Path::new("/tmp/out");
        assert!(safe_join(base, "../evil").is_err());
        assert!(safe_join(base, "a/../../evil").is_err());
        assert!(safe_join(base, "/etc/passwd").is_err());
        assert!(safe_join(base, "C:/windows/system32").is_err());
        assert!(safe_join(base, "").is_err());
        assert!(safe_join(base, "..\\evil").is_err());
    }

    #[test]
    fn safe_join_ignores_current_dir_components() {
        let base = Path::new("/tmp/out");
        let p = safe_join(base, "./a/./b").unwrap();
        assert_eq!(p, Path::new("/tmp/out/a/b"));
    }

    #[test]
    fn crc_writer_tracks_written_bytes() {
        let mut w = CrcWriter::new(Vec::new());
        w.write_all(b"hel").unwrap();
        w.write_all(b"lo").unwrap();
        assert_eq!(w.crc(), crate::crc32::crc32(b"hello"));
    }
}
