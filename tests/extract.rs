//! End-to-end extraction over synthetic in-memory archives.
//!
//! Archives are assembled byte-by-byte from the block grammar (no binary
//! fixtures); headers carry dummy CRCs since the reader does not verify
//! them. Cryptographic fixtures derive real keys through the same KDF
//! parameters the extractor uses, with a small iteration exponent to keep
//! the tests fast.

use std::fs;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::{Digest, Sha256};

use unrar5::extract::PasswordStatus;
use unrar5::{crc32, crypto, Archive, Extractor, RarError};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

const SIGNATURE: [u8; 8] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x01, 0x00];

const KDF_EXP: u8 = 4;

fn push_vint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}

/// Assemble one block: dummy CRC, header size vint, body, then the data
/// area. Returns the raw block bytes.
fn block(body: Vec<u8>, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 4]; // header CRC is carried but not verified
    push_vint(&mut out, body.len() as u64);
    out.extend_from_slice(&body);
    out.extend_from_slice(data);
    out
}

fn main_block() -> Vec<u8> {
    let mut body = Vec::new();
    push_vint(&mut body, 1); // type: main
    push_vint(&mut body, 0); // no extra, no data
    push_vint(&mut body, 0); // archive flags
    block(body, &[])
}

fn main_block_volume() -> Vec<u8> {
    let mut body = Vec::new();
    push_vint(&mut body, 1);
    push_vint(&mut body, 0);
    push_vint(&mut body, 0x01); // volume flag
    block(body, &[])
}

fn end_block() -> Vec<u8> {
    let mut body = Vec::new();
    push_vint(&mut body, 5); // type: end
    push_vint(&mut body, 0);
    push_vint(&mut body, 0); // end flags
    block(body, &[])
}

struct FileSpec<'a> {
    name: &'a str,
    data: &'a [u8],
    unpacked_size: u64,
    crc: Option<u32>,
    compression_info: u64,
    is_dir: bool,
    extra: Vec<u8>,
}

impl<'a> FileSpec<'a> {
    fn stored(name: &'a str, content: &'a [u8]) -> Self {
        Self {
            name,
            data: content,
            unpacked_size: content.len() as u64,
            crc: Some(crc32(content)),
            compression_info: 0,
            is_dir: false,
            extra: Vec::new(),
        }
    }

    fn directory(name: &'a str) -> Self {
        Self {
            name,
            data: &[],
            unpacked_size: 0,
            crc: None,
            compression_info: 0,
            is_dir: true,
            extra: Vec::new(),
        }
    }
}

fn file_block(spec: &FileSpec<'_>) -> Vec<u8> {
    let mut body = Vec::new();
    push_vint(&mut body, 2); // type: file

    let mut header_flags = 0u64;
    if !spec.extra.is_empty() {
        header_flags |= 0x01;
    }
    if !spec.data.is_empty() {
        header_flags |= 0x02;
    }
    push_vint(&mut body, header_flags);
    if !spec.extra.is_empty() {
        push_vint(&mut body, spec.extra.len() as u64);
    }
    if !spec.data.is_empty() {
        push_vint(&mut body, spec.data.len() as u64);
    }

    let mut file_flags = 0u64;
    if spec.is_dir {
        file_flags |= 0x01;
    }
    if spec.crc.is_some() {
        file_flags |= 0x04;
    }
    push_vint(&mut body, file_flags);
    push_vint(&mut body, spec.unpacked_size);
    push_vint(&mut body, 0); // attributes
    if let Some(crc) = spec.crc {
        body.extend_from_slice(&crc.to_le_bytes());
    }
    push_vint(&mut body, spec.compression_info);
    push_vint(&mut body, 1); // host OS: Unix
    push_vint(&mut body, spec.name.len() as u64);
    body.extend_from_slice(spec.name.as_bytes());
    body.extend_from_slice(&spec.extra);

    block(body, spec.data)
}

fn archive_of(blocks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = SIGNATURE.to_vec();
    for b in blocks {
        out.extend_from_slice(b);
    }
    out
}

fn extract_to_temp(
    data: Vec<u8>,
    password: Option<&str>,
) -> (tempfile::TempDir, unrar5::ExtractionReport) {
    let dir = tempfile::tempdir().unwrap();
    let archive = Archive::from_bytes(data, password).unwrap();
    let mut extractor = Extractor::new(password.map(String::from));
    let report = extractor.extract(&archive, dir.path()).unwrap();
    (dir, report)
}

#[test]
fn stored_file_roundtrip() {
    let data = archive_of(&[
        main_block(),
        file_block(&FileSpec::stored("hello.txt", b"hello")),
        end_block(),
    ]);

    let (dir, report) = extract_to_temp(data, None);
    assert_eq!(report.total_files, 1);
    assert_eq!(report.succeeded, 1);
    assert!(report.all_succeeded());
    assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"hello");
}

#[test]
fn stored_crc_is_verified() {
    let mut spec = FileSpec::stored("broken.bin", b"hello");
    spec.crc = Some(0xDEAD_BEEF);
    let data = archive_of(&[main_block(), file_block(&spec), end_block()]);

    let (dir, report) = extract_to_temp(data, None);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0].error,
        RarError::ChecksumMismatch { .. }
    ));
    // The corrupt output must not be left on disk.
    assert!(!dir.path().join("broken.bin").exists());
}

#[test]
fn directories_and_nested_files() {
    let data = archive_of(&[
        main_block(),
        file_block(&FileSpec::directory("sub/dir")),
        file_block(&FileSpec::stored("sub/dir/a.txt", b"aaa")),
        end_block(),
    ]);

    let (dir, report) = extract_to_temp(data, None);
    assert_eq!(report.succeeded, 2);
    assert!(dir.path().join("sub/dir").is_dir());
    assert_eq!(fs::read(dir.path().join("sub/dir/a.txt")).unwrap(), b"aaa");
}

#[test]
fn path_traversal_entries_are_rejected() {
    let data = archive_of(&[
        main_block(),
        file_block(&FileSpec::stored("../escape.txt", b"nope")),
        file_block(&FileSpec::stored("ok.txt", b"fine")),
        end_block(),
    ]);

    let (dir, report) = extract_to_temp(data, None);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].error, RarError::UnsafePath(_)));
    assert!(!dir.path().parent().unwrap().join("escape.txt").exists());
    assert_eq!(fs::read(dir.path().join("ok.txt")).unwrap(), b"fine");
}

#[test]
fn multi_volume_archives_are_rejected() {
    let data = archive_of(&[
        main_block_volume(),
        file_block(&FileSpec::stored("a.txt", b"a")),
        end_block(),
    ]);

    let err = Archive::from_bytes(data, None).unwrap_err();
    assert!(matches!(err, RarError::UnsupportedArchive(_)));
}

#[test]
fn truncated_archive_is_invalid() {
    let mut data = archive_of(&[
        main_block(),
        file_block(&FileSpec::stored("a.txt", b"abc")),
        end_block(),
    ]);
    // Cut into the file block's data area: its declared end now lies past
    // the archive.
    data.truncate(data.len() - 9);
    assert!(Archive::from_bytes(data, None).is_err());
}

// ---- compressed (method 3) entry, assembled bit by bit ----

/// MSB-first bit accumulator for the hand-built packed stream.
struct Bits {
    bits: Vec<u8>,
}

impl Bits {
    fn new() -> Self {
        Self { bits: Vec::new() }
    }

    fn push(&mut self, value: u32, n: u32) {
        for k in (0..n).rev() {
            self.bits.push(((value >> k) & 1) as u8);
        }
    }

    fn into_block(self, last: bool) -> Vec<u8> {
        let total = self.bits.len();
        let full = total / 8;
        let rem = total % 8;
        let size = full + usize::from(rem != 0);
        let f3 = (if rem == 0 { 7 } else { rem - 1 }) as u8;
        let flags = f3 | if last { 0x40 } else { 0 } | 0x80;
        let checksum = 0x5A ^ flags ^ size as u8;

        let mut out = vec![flags, checksum, size as u8];
        let mut bytes = vec![0u8; size];
        for (i, &b) in self.bits.iter().enumerate() {
            bytes[i / 8] |= b << (7 - i % 8);
        }
        out.extend_from_slice(&bytes);
        out
    }
}

/// The packed stream for a two-literal file `01 02`.
///
/// Main table: symbols 0x01 and 0x02 with one-bit codes; every other table
/// is empty. The level alphabet uses symbol 0 (code `0`), symbol 1
/// (code `10`) and the long zero run symbol 19 (code `11`).
fn two_literal_stream() -> Vec<u8> {
    let mut w = Bits::new();

    // 20 level code lengths, 4 bits each: sym 0 -> 1, sym 1 -> 2,
    // sym 19 -> 2.
    w.push(1, 4);
    w.push(2, 4);
    for _ in 2..19 {
        w.push(0, 4);
    }
    w.push(2, 4);

    // Main array (430 entries, v6): one zero, two length-1 codes, then
    // 427 zeros as runs of 138, 138, 138 and 13.
    w.push(0b0, 1); // lens[0] = 0
    w.push(0b10, 2); // lens[1] = 1
    w.push(0b10, 2); // lens[2] = 1
    for _ in 0..3 {
        w.push(0b11, 2);
        w.push(138 - 11, 7);
    }
    w.push(0b11, 2);
    w.push(13 - 11, 7);

    // Symbols: literal 0x01 (code 0), literal 0x02 (code 1).
    w.push(0, 1);
    w.push(1, 1);

    w.into_block(true)
}

#[test]
fn compressed_literal_file_roundtrip() {
    let packed = two_literal_stream();
    let spec = FileSpec {
        name: "tiny.bin",
        data: &packed,
        unpacked_size: 2,
        crc: Some(0xB6CC4292),
        compression_info: 3 << 7, // method 3, 128 KiB dictionary
        is_dir: false,
        extra: Vec::new(),
    };
    let data = archive_of(&[main_block(), file_block(&spec), end_block()]);

    let (dir, report) = extract_to_temp(data, None);
    assert!(report.all_succeeded(), "failures: {:?}", report.failures);
    assert_eq!(
        fs::read(dir.path().join("tiny.bin")).unwrap(),
        [0x01, 0x02]
    );
}

// ---- encryption ----

fn aes_cbc_encrypt(key: &[u8; 32], iv: &[u8; 16], plain: &[u8]) -> Vec<u8> {
    let mut padded = plain.to_vec();
    while padded.len() % 16 != 0 {
        padded.push(0);
    }
    let mut enc = Aes256CbcEnc::new(key.into(), iv.into());
    for chunk in padded.chunks_exact_mut(16) {
        enc.encrypt_block_mut(GenericArray::from_mut_slice(chunk));
    }
    padded
}

fn check_value_for(password: &str, salt: &[u8; 16]) -> [u8; 12] {
    let check = crypto::derive_password_check(password, salt, KDF_EXP).unwrap();
    let digest = Sha256::digest(check);
    let mut stored = [0u8; 12];
    stored[..8].copy_from_slice(&check);
    stored[8..].copy_from_slice(&digest[..4]);
    stored
}

fn crypto_extra_record(
    password: &str,
    salt: &[u8; 16],
    iv: &[u8; 16],
    tweaked_crc: bool,
) -> Vec<u8> {
    let mut data = Vec::new();
    push_vint(&mut data, 0); // algorithm: AES-256
    push_vint(&mut data, if tweaked_crc { 0x03 } else { 0x01 });
    data.push(KDF_EXP);
    data.extend_from_slice(salt);
    data.extend_from_slice(iv);
    data.extend_from_slice(&check_value_for(password, salt));

    let mut record = Vec::new();
    let mut id = Vec::new();
    push_vint(&mut id, 1); // record id: crypto
    push_vint(&mut record, (id.len() + data.len()) as u64);
    record.extend_from_slice(&id);
    record.extend_from_slice(&data);
    record
}

fn masked_crc(password: &str, salt: &[u8; 16], crc: u32) -> u32 {
    let mut key = [0u8; 32];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt,
        (1u32 << KDF_EXP) + 16,
        &mut key,
    );
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
    mac.update(&crc.to_le_bytes());
    let digest = mac.finalize().into_bytes();
    let mut folded = [0u8; 4];
    for (i, &b) in digest.iter().enumerate() {
        folded[i & 3] ^= b;
    }
    u32::from_le_bytes(folded)
}

#[test]
fn encrypted_file_roundtrip_and_wrong_password() {
    let password = "sesame";
    let salt = [0x42u8; 16];
    let iv = [0x24u8; 16];

    let keys = crypto::derive_keys(password, &salt, KDF_EXP).unwrap();
    let ciphertext = aes_cbc_encrypt(&keys.aes_key, &iv, b"hello");

    let spec = FileSpec {
        name: "secret.txt",
        data: &ciphertext,
        unpacked_size: 5,
        crc: Some(masked_crc(password, &salt, crc32(b"hello"))),
        compression_info: 0,
        is_dir: false,
        extra: crypto_extra_record(password, &salt, &iv, true),
    };
    let data = archive_of(&[main_block(), file_block(&spec), end_block()]);

    let (dir, report) = extract_to_temp(data.clone(), Some(password));
    assert!(report.all_succeeded(), "failures: {:?}", report.failures);
    assert_eq!(report.password_status, PasswordStatus::Verified);
    assert_eq!(fs::read(dir.path().join("secret.txt")).unwrap(), b"hello");

    // Wrong password: rejected by the check value, nothing extracted.
    let (dir, report) = extract_to_temp(data, Some("sesame!"));
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.password_status, PasswordStatus::Wrong);
    assert!(matches!(
        report.failures[0].error,
        RarError::WrongPassword
    ));
    assert!(!dir.path().join("secret.txt").exists());
}

#[test]
fn encrypted_file_without_password_fails() {
    let password = "sesame";
    let salt = [0x11u8; 16];
    let iv = [0x22u8; 16];
    let keys = crypto::derive_keys(password, &salt, KDF_EXP).unwrap();
    let ciphertext = aes_cbc_encrypt(&keys.aes_key, &iv, b"data");

    let spec = FileSpec {
        name: "locked.bin",
        data: &ciphertext,
        unpacked_size: 4,
        crc: None,
        compression_info: 0,
        is_dir: false,
        extra: crypto_extra_record(password, &salt, &iv, false),
    };
    let data = archive_of(&[main_block(), file_block(&spec), end_block()]);

    let (_dir, report) = extract_to_temp(data, None);
    assert_eq!(report.succeeded, 0);
    assert!(matches!(
        report.failures[0].error,
        RarError::PasswordRequired
    ));
}

// ---- encrypted headers ----

fn encryption_block(password: &str, salt: &[u8; 16]) -> Vec<u8> {
    let mut body = Vec::new();
    push_vint(&mut body, 4); // type: encryption
    push_vint(&mut body, 0); // no extra, no data
    push_vint(&mut body, 0); // encryption version
    push_vint(&mut body, 0x01); // password check present
    body.push(KDF_EXP);
    body.extend_from_slice(salt);
    body.extend_from_slice(&check_value_for(password, salt));
    block(body, &[])
}

/// Encrypt `plain_block`'s header in place the way `rar -hp` stores it:
/// a fresh IV, then the CBC ciphertext of the header bytes padded to the
/// block size. The data area (if any) is appended untouched.
fn encrypt_header(key: &[u8; 32], iv_seed: u8, plain_block: &[u8], data_len: usize) -> Vec<u8> {
    let header_len = plain_block.len() - data_len;
    let iv = [iv_seed; 16];

    let mut out = iv.to_vec();
    out.extend_from_slice(&aes_cbc_encrypt(key, &iv, &plain_block[..header_len]));
    out.extend_from_slice(&plain_block[header_len..]);
    out
}

#[test]
fn encrypted_headers_roundtrip() {
    let password = "topsecret";
    let salt = [0x77u8; 16];
    let keys = crypto::derive_keys(password, &salt, KDF_EXP).unwrap();

    let stored = FileSpec::stored("inner.txt", b"plain data inside");
    let plain_file = file_block(&stored);

    let mut data = SIGNATURE.to_vec();
    data.extend_from_slice(&encryption_block(password, &salt));
    data.extend_from_slice(&encrypt_header(&keys.aes_key, 1, &main_block(), 0));
    data.extend_from_slice(&encrypt_header(
        &keys.aes_key,
        2,
        &plain_file,
        stored.data.len(),
    ));
    data.extend_from_slice(&encrypt_header(&keys.aes_key, 3, &end_block(), 0));

    // No password: cannot even list.
    assert!(matches!(
        Archive::from_bytes(data.clone(), None).unwrap_err(),
        RarError::PasswordRequired
    ));

    // Wrong password: caught by the check value before any decryption.
    assert!(matches!(
        Archive::from_bytes(data.clone(), Some("wrong")).unwrap_err(),
        RarError::WrongPassword
    ));

    // Right password: headers decrypt and the file extracts.
    let (dir, report) = extract_to_temp(data, Some(password));
    assert!(report.all_succeeded(), "failures: {:?}", report.failures);
    assert!(report.total_files == 1);
    assert_eq!(
        fs::read(dir.path().join("inner.txt")).unwrap(),
        b"plain data inside"
    );
}
