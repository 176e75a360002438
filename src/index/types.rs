use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};

/// An n-gram key: L consecutive bytes read as a little-endian base-256 number
pub type NGram = u32;

/// Sequential identifier of a file in the catalog
pub type FileId = u32;

/// Zero-based shard number
pub type ShardId = u32;

/// Marker written at the start of every file, read back in native byte order
pub const ENDIAN_CHECK: u32 = 0x0123_4567;

/// Current on-disk format version
pub const FORMAT_VERSION: u8 = 1;

/// Size of one file ID in a postings blob
pub const FILE_ID_SIZE: usize = size_of::<FileId>();

/// 4 GiB of buffered postings before a shard is flushed
pub const DEFAULT_MAX_BUFFER_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// 64 characters plus a NUL terminator
pub const DEFAULT_MAX_FILENAME_LENGTH: u16 = 65;

pub const CATALOG_EXTENSION: &str = ".catalog";
pub const INDEX_EXTENSION: &str = ".index";
pub const POSTINGS_EXTENSION: &str = ".postings";

/// Supported n-gram lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum NgramLength {
    #[default]
    Three = 3,
    Four = 4,
}

impl NgramLength {
    pub fn new(len: u64) -> Result<Self> {
        match len {
            3 => Ok(NgramLength::Three),
            4 => Ok(NgramLength::Four),
            other => Err(IndexError::InvalidNgramLength(other)),
        }
    }

    /// Number of bytes per n-gram
    #[inline]
    pub fn bytes(self) -> usize {
        self as usize
    }

    /// Number of distinct n-gram values (256^L)
    #[inline]
    pub fn domain(self) -> u64 {
        1u64 << (8 * self.bytes())
    }

    /// Check that a key lies inside [0, 256^L)
    #[inline]
    pub fn check(self, ngram: u64) -> Result<NGram> {
        if ngram < self.domain() {
            Ok(ngram as NGram)
        } else {
            Err(IndexError::NgramOutOfRange {
                ngram,
                ngram_length: self.bytes(),
            })
        }
    }
}

impl TryFrom<u8> for NgramLength {
    type Error = IndexError;

    fn try_from(value: u8) -> Result<Self> {
        NgramLength::new(value as u64)
    }
}

impl From<NgramLength> for u8 {
    fn from(len: NgramLength) -> u8 {
        len as u8
    }
}

impl fmt::Display for NgramLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bytes())
    }
}

/// Convert an L-byte window to its n-gram key
#[inline]
pub fn bytes_to_ngram(window: &[u8]) -> u64 {
    window
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &b)| acc | ((b as u64) << (8 * i)))
}

/// Convert an n-gram key back to its bytes
pub fn ngram_to_bytes(ngram: NGram, len: NgramLength) -> Vec<u8> {
    ngram.to_le_bytes()[..len.bytes()].to_vec()
}

/// Configuration for the index builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    pub ngram_length: NgramLength,
    /// Buffered postings bytes that trigger a flush to a new shard
    pub max_buffer_bytes: u64,
    /// Width of a catalog filename slot, NUL padding included
    pub max_filename_length: u16,
    /// Files per shard before a flush is forced; 0 means no limit
    #[serde(default)]
    pub max_files_per_shard: u32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            ngram_length: NgramLength::default(),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            max_filename_length: DEFAULT_MAX_FILENAME_LENGTH,
            max_files_per_shard: 0,
        }
    }
}

/// File names belonging to one index, derived from its base name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    base: PathBuf,
}

impl IndexPaths {
    /// Accepts either the bare base name or any of the index's own file names
    pub fn new(base: impl AsRef<Path>) -> Self {
        let raw = base.as_ref().as_os_str().as_encoded_bytes();
        let base = [CATALOG_EXTENSION, INDEX_EXTENSION, POSTINGS_EXTENSION]
            .iter()
            .find_map(|ext| raw.strip_suffix(ext.as_bytes()))
            // SAFETY: split directly before an ASCII suffix of encoded bytes
            .map(|stem| PathBuf::from(unsafe { OsStr::from_encoded_bytes_unchecked(stem) }))
            .unwrap_or_else(|| base.as_ref().to_path_buf());
        Self { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn catalog(&self) -> PathBuf {
        self.with_suffix(CATALOG_EXTENSION.to_string())
    }

    pub fn index(&self, shard: ShardId) -> PathBuf {
        self.with_suffix(format!("{}{:08}", INDEX_EXTENSION, shard))
    }

    pub fn postings(&self, shard: ShardId) -> PathBuf {
        self.with_suffix(format!("{}{:08}", POSTINGS_EXTENSION, shard))
    }

    fn with_suffix(&self, suffix: String) -> PathBuf {
        let mut name = self.base.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }
}

/// One index-table record: where an n-gram's postings start and how many there are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexEntry {
    pub offset: u64,
    pub count: u32,
}

impl IndexEntry {
    pub const SIZE: usize = 8 + 4;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.offset.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.count.to_ne_bytes());
        buf
    }

    /// Decode from exactly `SIZE` bytes
    pub fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut offset = [0u8; 8];
        let mut count = [0u8; 4];
        offset.copy_from_slice(&data[0..8]);
        count.copy_from_slice(&data[8..12]);
        Self {
            offset: u64::from_ne_bytes(offset),
            count: u32::from_ne_bytes(count),
        }
    }
}

/// Header of the catalog file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogHeader {
    pub endian_check: u32,
    pub version: u8,
    pub ngram_length: u8,
    pub max_filename_length: u16,
    pub shard_count: u32,
    pub file_count: u32,
}

impl CatalogHeader {
    pub const SIZE: usize = 4 + 1 + 1 + 2 + 4 + 4; // 16 bytes
    pub const SHARD_COUNT_OFFSET: u64 = 8;
    pub const FILE_COUNT_OFFSET: u64 = 12;

    pub fn new(ngram_length: NgramLength, max_filename_length: u16) -> Self {
        Self {
            endian_check: ENDIAN_CHECK,
            version: FORMAT_VERSION,
            ngram_length: ngram_length.into(),
            max_filename_length,
            shard_count: 0,
            file_count: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.endian_check.to_ne_bytes());
        buf[4] = self.version;
        buf[5] = self.ngram_length;
        buf[6..8].copy_from_slice(&self.max_filename_length.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.shard_count.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.file_count.to_ne_bytes());
        buf
    }

    /// Parse header from bytes. Returns None if too short.
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            endian_check: u32::from_ne_bytes([data[0], data[1], data[2], data[3]]),
            version: data[4],
            ngram_length: data[5],
            max_filename_length: u16::from_ne_bytes([data[6], data[7]]),
            shard_count: u32::from_ne_bytes([data[8], data[9], data[10], data[11]]),
            file_count: u32::from_ne_bytes([data[12], data[13], data[14], data[15]]),
        })
    }
}

/// Header of a shard index-table file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardHeader {
    pub endian_check: u32,
    pub version: u8,
    pub ngram_length: u8,
    pub file_count: u32,
}

impl ShardHeader {
    pub const SIZE: usize = 4 + 1 + 1 + 4; // 10 bytes

    pub fn new(ngram_length: NgramLength, file_count: u32) -> Self {
        Self {
            endian_check: ENDIAN_CHECK,
            version: FORMAT_VERSION,
            ngram_length: ngram_length.into(),
            file_count,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.endian_check.to_ne_bytes());
        buf[4] = self.version;
        buf[5] = self.ngram_length;
        buf[6..10].copy_from_slice(&self.file_count.to_ne_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            endian_check: u32::from_ne_bytes([data[0], data[1], data[2], data[3]]),
            version: data[4],
            ngram_length: data[5],
            file_count: u32::from_ne_bytes([data[6], data[7], data[8], data[9]]),
        })
    }
}

/// Shared header checks: endian marker, version and n-gram length
pub fn validate_header(
    path: &Path,
    endian_check: u32,
    version: u8,
    ngram_length: u8,
    expected: NgramLength,
) -> Result<()> {
    if endian_check != ENDIAN_CHECK {
        return Err(IndexError::format(
            path,
            format!("endian marker {:#010x}, expected {:#010x}", endian_check, ENDIAN_CHECK),
        ));
    }
    if version != FORMAT_VERSION {
        return Err(IndexError::format(
            path,
            format!("format version {}, expected {}", version, FORMAT_VERSION),
        ));
    }
    if ngram_length != u8::from(expected) {
        return Err(IndexError::format(
            path,
            format!("n-gram length {}, expected {}", ngram_length, expected),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ngram_length() {
        assert_eq!(NgramLength::new(3).unwrap().domain(), 1 << 24);
        assert_eq!(NgramLength::new(4).unwrap().domain(), 1 << 32);
        assert!(matches!(
            NgramLength::new(5),
            Err(IndexError::InvalidNgramLength(5))
        ));
        assert!(NgramLength::try_from(2u8).is_err());
    }

    #[test]
    fn test_ngram_range_check() {
        let three = NgramLength::Three;
        assert_eq!(three.check(0xFF_FFFF).unwrap(), 0xFF_FFFF);
        assert!(three.check(1 << 24).is_err());
        assert_eq!(NgramLength::Four.check(0xFFFF_FFFF).unwrap(), u32::MAX);
    }

    #[test]
    fn test_bytes_to_ngram_is_little_endian() {
        assert_eq!(bytes_to_ngram(b"abc"), 0x63_62_61);
        assert_eq!(bytes_to_ngram(&[0x01, 0x02, 0x03, 0x04]), 0x0403_0201);
        assert_eq!(ngram_to_bytes(0x63_62_61, NgramLength::Three), b"abc");
    }

    #[test]
    fn test_index_paths() {
        let paths = IndexPaths::new("/data/corpus");
        assert_eq!(paths.catalog(), PathBuf::from("/data/corpus.catalog"));
        assert_eq!(paths.index(3), PathBuf::from("/data/corpus.index00000003"));
        assert_eq!(paths.postings(12), PathBuf::from("/data/corpus.postings00000012"));

        // Own extensions are stripped from the base name
        assert_eq!(IndexPaths::new("/data/corpus.catalog"), paths);
        assert_eq!(IndexPaths::new("/data/corpus.index"), paths);
        assert_eq!(IndexPaths::new("/data/corpus.postings"), paths);
    }

    #[test]
    fn test_headers_roundtrip() {
        let mut header = CatalogHeader::new(NgramLength::Four, 65);
        header.shard_count = 2;
        header.file_count = 1000;
        let bytes = header.to_bytes();
        assert_eq!(CatalogHeader::from_bytes(&bytes), Some(header));
        assert_eq!(
            &bytes[CatalogHeader::FILE_COUNT_OFFSET as usize..],
            &1000u32.to_ne_bytes()
        );

        let shard = ShardHeader::new(NgramLength::Three, 42);
        assert_eq!(ShardHeader::from_bytes(&shard.to_bytes()), Some(shard));
        assert!(ShardHeader::from_bytes(&[0u8; 4]).is_none());
    }

    #[test]
    fn test_validate_header() {
        let path = Path::new("x.catalog");
        assert!(validate_header(path, ENDIAN_CHECK, FORMAT_VERSION, 3, NgramLength::Three).is_ok());
        assert!(matches!(
            validate_header(path, ENDIAN_CHECK.swap_bytes(), FORMAT_VERSION, 3, NgramLength::Three),
            Err(IndexError::FormatMismatch { .. })
        ));
        assert!(matches!(
            validate_header(path, ENDIAN_CHECK, FORMAT_VERSION, 4, NgramLength::Three),
            Err(IndexError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_index_config_json() {
        let config: IndexConfig = serde_json::from_str(
            r#"{"ngram_length": 4, "max_buffer_bytes": 1024, "max_filename_length": 33}"#,
        )
        .unwrap();
        assert_eq!(config.ngram_length, NgramLength::Four);
        assert!(serde_json::from_str::<IndexConfig>(
            r#"{"ngram_length": 5, "max_buffer_bytes": 1, "max_filename_length": 1}"#
        )
        .is_err());
    }
}
