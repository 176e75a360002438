//! Master file catalog.
//!
//! Layout:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (16 bytes, native byte order)         │
//! │  endian_check: u32 = 0x01234567              │
//! │  version: u8                                 │
//! │  ngram_length: u8                            │
//! │  max_filename_length: u16                    │
//! │  shard_count: u32                            │
//! │  file_count: u32                             │
//! ├──────────────────────────────────────────────┤
//! │ Filename slots, one per file ID, in ID order │
//! │  max_filename_length bytes, NUL padded       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The catalog is append-only. Appended names are staged in memory and only
//! become visible to lookups once [`Catalog::flush_counters`] has written
//! them together with the new file count.
//!
//! Slots hold the name's raw OS bytes, so names that are not UTF-8 come back
//! unchanged on Unix.

use crate::error::{IndexError, Result};
use crate::index::types::{validate_header, CatalogHeader, FileId, NgramLength, ShardId};
use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// How an existing catalog is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

pub struct Catalog {
    path: PathBuf,
    file: File,
    mode: OpenMode,
    ngram_length: NgramLength,
    max_filename_length: u16,
    shard_count: u32,
    /// Files whose slots and count are durable
    committed_files: u32,
    /// Files whose slots are written but whose count may not be
    written_files: u32,
    /// Files assigned an ID, committed or not
    file_count: u32,
    pending: Vec<Vec<u8>>,
}

impl Catalog {
    /// Create an empty catalog. Never overwrites an existing file.
    pub fn create(path: &Path, ngram_length: NgramLength, max_filename_length: u16) -> Result<()> {
        if max_filename_length == 0 {
            return Err(IndexError::format(path, "filename slots must be at least one byte"));
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => IndexError::AlreadyExists(path.to_path_buf()),
                _ => IndexError::io(path, e),
            })?;

        let header = CatalogHeader::new(ngram_length, max_filename_length);
        file.write_all(&header.to_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| IndexError::io(path, e))?;

        tracing::debug!(path = %path.display(), %ngram_length, "created catalog");
        Ok(())
    }

    /// Open an existing catalog, validating its header against `ngram_length`
    pub fn open(path: &Path, ngram_length: NgramLength, mode: OpenMode) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(mode == OpenMode::ReadWrite)
            .open(path)
            .map_err(|e| IndexError::io(path, e))?;

        let header = read_header_from(&mut file, path)?;
        validate_header(
            path,
            header.endian_check,
            header.version,
            header.ngram_length,
            ngram_length,
        )?;

        if header.max_filename_length == 0 {
            return Err(IndexError::format(path, "zero-width filename slots"));
        }

        let expected_len = CatalogHeader::SIZE as u64
            + header.file_count as u64 * header.max_filename_length as u64;
        let actual_len = file.metadata().map_err(|e| IndexError::io(path, e))?.len();
        if actual_len < expected_len {
            return Err(IndexError::format(
                path,
                format!(
                    "{} files recorded but only {} bytes of slots present",
                    header.file_count,
                    actual_len.saturating_sub(CatalogHeader::SIZE as u64)
                ),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            mode,
            ngram_length,
            max_filename_length: header.max_filename_length,
            shard_count: header.shard_count,
            committed_files: header.file_count,
            written_files: header.file_count,
            file_count: header.file_count,
            pending: Vec::new(),
        })
    }

    /// Read the header of an existing catalog without knowing its n-gram length.
    ///
    /// The endian marker and version are checked; the stored length must be 3 or 4.
    pub fn read_header(path: &Path) -> Result<CatalogHeader> {
        let mut file = File::open(path).map_err(|e| IndexError::io(path, e))?;
        let header = read_header_from(&mut file, path)?;
        let ngram_length = NgramLength::try_from(header.ngram_length)
            .map_err(|e| IndexError::format(path, e.to_string()))?;
        validate_header(
            path,
            header.endian_check,
            header.version,
            header.ngram_length,
            ngram_length,
        )?;
        Ok(header)
    }

    /// Assign the next sequential file ID to `filename`.
    ///
    /// Only the in-memory count changes; the name and count reach disk on
    /// the next [`Catalog::flush_counters`].
    pub fn append(&mut self, filename: impl AsRef<OsStr>) -> Result<FileId> {
        self.require_writable()?;

        let id = self.file_count;
        self.file_count = id.checked_add(1).ok_or_else(|| {
            IndexError::io(&self.path, io::Error::other("file ID space exhausted"))
        })?;
        self.pending
            .push(filename.as_ref().as_encoded_bytes().to_vec());
        Ok(id)
    }

    /// Write staged filenames, then the file count
    pub fn flush_counters(&mut self) -> Result<()> {
        self.require_writable()?;
        self.write_pending()?;

        self.write_at(CatalogHeader::FILE_COUNT_OFFSET, &self.file_count.to_ne_bytes())?;
        self.file.sync_data().map_err(|e| IndexError::io(&self.path, e))?;
        self.committed_files = self.file_count;
        Ok(())
    }

    /// Record a finalized shard. The new shard count is durable before this returns.
    ///
    /// Returns the number of the shard just registered.
    pub fn next_shard_number(&mut self) -> Result<ShardId> {
        self.require_writable()?;

        let finalized = self.shard_count;
        let next = finalized + 1;
        self.write_at(CatalogHeader::SHARD_COUNT_OFFSET, &next.to_ne_bytes())?;
        self.file.sync_data().map_err(|e| IndexError::io(&self.path, e))?;
        self.shard_count = next;
        Ok(finalized)
    }

    /// Read the filename stored for a committed file ID
    pub fn lookup(&mut self, id: FileId) -> Result<PathBuf> {
        if id >= self.committed_files {
            return Err(IndexError::UnknownFileId {
                id,
                committed: self.committed_files,
            });
        }

        let slot = self.max_filename_length as usize;
        let mut buf = vec![0u8; slot];
        let offset = self.slot_offset(id);
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|e| IndexError::io(&self.path, e))?;

        let end = buf.iter().position(|&b| b == 0).unwrap_or(slot);
        Ok(decode_name(&buf[..end]))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ngram_length(&self) -> NgramLength {
        self.ngram_length
    }

    pub fn max_filename_length(&self) -> u16 {
        self.max_filename_length
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// All assigned IDs, including ones not yet flushed
    pub fn file_count(&self) -> u32 {
        self.file_count
    }

    pub fn committed_file_count(&self) -> u32 {
        self.committed_files
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn slot_offset(&self, id: FileId) -> u64 {
        CatalogHeader::SIZE as u64 + id as u64 * self.max_filename_length as u64
    }

    fn write_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let slot = self.max_filename_length as usize;
        let mut buffer = vec![0u8; slot * self.pending.len()];
        for (i, name) in self.pending.iter().enumerate() {
            let bytes = name.as_slice();
            let len = bytes.len().min(slot);
            buffer[i * slot..i * slot + len].copy_from_slice(&bytes[..len]);
        }

        let offset = self.slot_offset(self.written_files);
        self.write_at(offset, &buffer)?;
        self.written_files += self.pending.len() as u32;
        self.pending.clear();
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(data))
            .map_err(|e| IndexError::io(&self.path, e))
    }

    fn require_writable(&self) -> Result<()> {
        match self.mode {
            OpenMode::ReadWrite => Ok(()),
            OpenMode::ReadOnly => Err(IndexError::io(
                &self.path,
                io::Error::new(ErrorKind::PermissionDenied, "catalog opened read-only"),
            )),
        }
    }
}

fn read_header_from(file: &mut File, path: &Path) -> Result<CatalogHeader> {
    let mut buf = [0u8; CatalogHeader::SIZE];
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        ErrorKind::UnexpectedEof => IndexError::format(path, "truncated catalog header"),
        _ => IndexError::io(path, e),
    })?;
    CatalogHeader::from_bytes(&buf)
        .ok_or_else(|| IndexError::format(path, "truncated catalog header"))
}

#[cfg(unix)]
fn decode_name(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

// Slot bytes may be cut mid-character, so only valid UTF-8 survives exactly
#[cfg(not(unix))]
fn decode_name(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
