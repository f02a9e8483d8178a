//! Checksums for written files.
//!
//! This module provides:
//! - Checksum algorithms (CRC32, MD5, SHA-256, BLAKE3)
//! - A `HashingWriter` that digests bytes as they are streamed to disk
//! - Checksum side files (`<target>.<algorithm>`) emitted by the producer

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// CRC32 (fast, 32-bit)
    Crc32,
    /// MD5 (kept for interoperability with existing side files)
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl ChecksumAlgorithm {
    /// Parse an algorithm name, ignoring case and dashes (`SHA-256` works).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "").as_str() {
            "crc32" => Some(Self::Crc32),
            "md5" => Some(Self::Md5),
            "sha256" => Some(Self::Sha256),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }

    /// Extension of the checksum side file.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Crc32 => "crc32",
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Create a new hasher for this algorithm
    pub fn hasher(&self) -> Box<dyn ChecksumHasher + Send> {
        match self {
            Self::Crc32 => Box::new(Crc32Hasher::new()),
            Self::Md5 => Box::new(Md5Hasher::new()),
            Self::Sha256 => Box::new(Sha256Hasher::new()),
            Self::Blake3 => Box::new(Blake3Hasher::new()),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Lowercase hex digest
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Incremental digest computation
pub trait ChecksumHasher {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Crc32Hasher {
    crc: u32,
}

impl Crc32Hasher {
    fn new() -> Self {
        Crc32Hasher { crc: 0xffff_ffff }
    }
}

impl ChecksumHasher for Crc32Hasher {
    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            let mut crc = self.crc ^ u32::from(byte);
            for _ in 0..8 {
                crc = if crc & 1 == 1 {
                    (crc >> 1) ^ 0xedb8_8320
                } else {
                    crc >> 1
                };
            }
            self.crc = crc;
        }
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(ChecksumAlgorithm::Crc32, format!("{:08x}", !self.crc))
    }
}

struct Md5Hasher {
    context: md5::Context,
}

impl Md5Hasher {
    fn new() -> Self {
        Md5Hasher {
            context: md5::Context::new(),
        }
    }
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", self.context.compute()))
    }
}

struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl Sha256Hasher {
    fn new() -> Self {
        Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }
    }
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        ChecksumValue::new(
            ChecksumAlgorithm::Sha256,
            format!("{:x}", self.hasher.finalize()),
        )
    }
}

struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl Blake3Hasher {
    fn new() -> Self {
        Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }
    }
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(
            ChecksumAlgorithm::Blake3,
            self.hasher.finalize().to_hex().to_string(),
        )
    }
}

/// Writer adapter that counts and optionally digests everything written
/// through it.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Option<Box<dyn ChecksumHasher + Send>>,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, algorithm: Option<ChecksumAlgorithm>) -> Self {
        Self {
            inner,
            hasher: algorithm.map(|a| a.hasher()),
            written: 0,
        }
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Return the inner writer, the byte count and the digest (if any).
    pub fn finish(self) -> (W, u64, Option<ChecksumValue>) {
        (self.inner, self.written, self.hasher.map(|h| h.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Compute the checksum of a file on disk.
///
/// # Errors
/// Returns `EngineError::Io` if the file cannot be opened or read.
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> EngineResult<ChecksumValue> {
    let mut file = File::open(path).map_err(|e| EngineError::io("open", path, e))?;
    let mut hasher = algorithm.hasher();
    let mut buffer = [0u8; 65536];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::io("read", path, e)),
        }
    }
    Ok(hasher.finalize())
}

/// Path of the checksum side file for `target`.
pub fn checksum_file_path(target: &Path, algorithm: ChecksumAlgorithm) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".");
    name.push(algorithm.extension());
    PathBuf::from(name)
}

/// Write the hex digest into `<target>.<algorithm>`.
pub fn write_checksum_file(target: &Path, checksum: &ChecksumValue) -> EngineResult<PathBuf> {
    let path = checksum_file_path(target, checksum.algorithm());
    std::fs::write(&path, checksum.hex()).map_err(|e| EngineError::io("write checksum", &path, e))?;
    Ok(path)
}
