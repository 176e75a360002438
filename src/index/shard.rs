//! Shard storage: one immutable (index table, postings blob) file pair.
//!
//! Index table (`<base>.indexNNNNNNNN`):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Header (10 bytes, native byte order)    │
//! │  endian_check: u32                      │
//! │  version: u8                            │
//! │  ngram_length: u8                       │
//! │  file_count: u32                        │
//! ├─────────────────────────────────────────┤
//! │ 256^L entries, indexed by n-gram value  │
//! │  offset: u64  (bytes into the blob)     │
//! │  count: u32   (file IDs in the list)    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Postings blob (`<base>.postingsNNNNNNNN`): raw concatenation of 4-byte
//! file IDs, each n-gram's run sorted ascending.

use crate::error::{IndexError, Result};
use crate::index::types::{
    validate_header, FileId, IndexEntry, IndexPaths, NGram, NgramLength, ShardHeader, ShardId,
    FILE_ID_SIZE,
};
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Zero-count entries are written in batches of this many
const FILL_BATCH: usize = 4096;

/// What a closed shard contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSummary {
    pub shard: ShardId,
    pub file_count: u32,
    /// Total file IDs written across all postings lists
    pub postings: u64,
    pub postings_bytes: u64,
}

/// Write mode: streams the index table and postings blob of a new shard
pub struct ShardWriter {
    shard: ShardId,
    ngram_length: NgramLength,
    file_count: u32,
    index_path: PathBuf,
    postings_path: PathBuf,
    index: BufWriter<File>,
    postings: BufWriter<File>,
    /// Next index-table slot to be written
    next_ngram: u64,
    /// Current end of the postings blob
    offset: u64,
    postings_written: u64,
}

impl ShardWriter {
    /// Create both files of a new shard and write the index-table header.
    /// Fails if either file already exists.
    pub fn create(
        paths: &IndexPaths,
        shard: ShardId,
        ngram_length: NgramLength,
        declared_file_count: u32,
    ) -> Result<Self> {
        let index_path = paths.index(shard);
        let postings_path = paths.postings(shard);

        for path in [&index_path, &postings_path] {
            if path.exists() {
                return Err(IndexError::AlreadyExists(path.clone()));
            }
        }

        let index_file = create_new(&index_path)?;
        let postings_file = create_new(&postings_path)?;

        let mut index = BufWriter::with_capacity(1 << 20, index_file);
        let postings = BufWriter::with_capacity(1 << 20, postings_file);

        let header = ShardHeader::new(ngram_length, declared_file_count);
        index
            .write_all(&header.to_bytes())
            .map_err(|e| IndexError::io(&index_path, e))?;

        Ok(Self {
            shard,
            ngram_length,
            file_count: declared_file_count,
            index_path,
            postings_path,
            index,
            postings,
            next_ngram: 0,
            offset: 0,
            postings_written: 0,
        })
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// Append the sorted postings list of `ngram`.
    ///
    /// Calls must arrive in ascending n-gram order. Skipped n-grams get a
    /// zero-count entry at the current blob offset.
    pub fn append_postings(&mut self, ngram: NGram, file_ids: &[FileId]) -> Result<()> {
        let ngram = self.ngram_length.check(ngram as u64)? as u64;
        if ngram < self.next_ngram {
            return Err(IndexError::OutOfOrder {
                expected: self.next_ngram,
                found: ngram,
            });
        }
        debug_assert!(file_ids.windows(2).all(|w| w[0] < w[1]));

        self.fill_empty_until(ngram)?;

        let count = u32::try_from(file_ids.len()).map_err(|_| {
            IndexError::format(&self.index_path, "postings list longer than u32::MAX")
        })?;
        let entry = IndexEntry {
            offset: self.offset,
            count,
        };
        self.index
            .write_all(&entry.to_bytes())
            .map_err(|e| IndexError::io(&self.index_path, e))?;

        for id in file_ids {
            self.postings
                .write_all(&id.to_ne_bytes())
                .map_err(|e| IndexError::io(&self.postings_path, e))?;
        }

        self.offset += file_ids.len() as u64 * FILE_ID_SIZE as u64;
        self.postings_written += file_ids.len() as u64;
        self.next_ngram = ngram + 1;
        Ok(())
    }

    /// Complete the index table and make both files durable
    pub fn close(mut self) -> Result<ShardSummary> {
        self.fill_empty_until(self.ngram_length.domain())?;

        finish(self.index, &self.index_path)?;
        finish(self.postings, &self.postings_path)?;

        Ok(ShardSummary {
            shard: self.shard,
            file_count: self.file_count,
            postings: self.postings_written,
            postings_bytes: self.offset,
        })
    }

    /// Write zero-count entries for every slot in [next_ngram, end)
    fn fill_empty_until(&mut self, end: u64) -> Result<()> {
        if self.next_ngram >= end {
            return Ok(());
        }

        let empty = IndexEntry {
            offset: self.offset,
            count: 0,
        }
        .to_bytes();
        let batch: Vec<u8> = empty.repeat(FILL_BATCH);

        while self.next_ngram < end {
            let n = ((end - self.next_ngram) as usize).min(FILL_BATCH);
            self.index
                .write_all(&batch[..n * IndexEntry::SIZE])
                .map_err(|e| IndexError::io(&self.index_path, e))?;
            self.next_ngram += n as u64;
        }
        Ok(())
    }
}

fn create_new(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            ErrorKind::AlreadyExists => IndexError::AlreadyExists(path.to_path_buf()),
            _ => IndexError::io(path, e),
        })
}

fn finish(writer: BufWriter<File>, path: &Path) -> Result<()> {
    let file = writer
        .into_inner()
        .map_err(|e| IndexError::io(path, e.into_error()))?;
    file.sync_all().map_err(|e| IndexError::io(path, e))
}

/// Borrowed view of one postings list inside a mapped blob
#[derive(Debug, Clone, Copy)]
pub struct Postings<'a> {
    bytes: &'a [u8],
}

impl<'a> Postings<'a> {
    /// View over raw native-endian file IDs; a trailing partial ID is ignored
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        let whole = bytes.len() - bytes.len() % FILE_ID_SIZE;
        Self {
            bytes: &bytes[..whole],
        }
    }

    fn empty() -> Self {
        Self { bytes: &[] }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len() / FILE_ID_SIZE
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File ID at position `i`; panics if `i >= len()`
    #[inline]
    pub fn get(&self, i: usize) -> FileId {
        let b = &self.bytes[i * FILE_ID_SIZE..(i + 1) * FILE_ID_SIZE];
        FileId::from_ne_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn iter(self) -> impl Iterator<Item = FileId> + 'a {
        self.bytes
            .chunks_exact(FILE_ID_SIZE)
            .map(|b| FileId::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn to_vec(&self) -> Vec<FileId> {
        self.iter().collect()
    }
}

/// Read mode: both shard files mapped read-only.
///
/// The mappings are released when the reader is dropped; [`Postings`]
/// views borrow from the reader and cannot outlive it.
pub struct ShardReader {
    shard: ShardId,
    ngram_length: NgramLength,
    file_count: u32,
    index_path: PathBuf,
    index: Mmap,
    /// None for a shard whose blob is empty
    postings: Option<Mmap>,
}

impl ShardReader {
    pub fn open(paths: &IndexPaths, shard: ShardId, ngram_length: NgramLength) -> Result<Self> {
        let index_path = paths.index(shard);
        let postings_path = paths.postings(shard);

        let index_file = open_shard_file(&index_path, shard)?;
        let postings_file = open_shard_file(&postings_path, shard)?;

        let index =
            unsafe { Mmap::map(&index_file) }.map_err(|e| IndexError::io(&index_path, e))?;

        let header = ShardHeader::from_bytes(&index)
            .ok_or_else(|| IndexError::format(&index_path, "truncated shard header"))?;
        validate_header(
            &index_path,
            header.endian_check,
            header.version,
            header.ngram_length,
            ngram_length,
        )?;

        let expected_len =
            ShardHeader::SIZE as u64 + ngram_length.domain() * IndexEntry::SIZE as u64;
        if index.len() as u64 != expected_len {
            return Err(IndexError::format(
                &index_path,
                format!("index table is {} bytes, expected {}", index.len(), expected_len),
            ));
        }

        let postings_len = postings_file
            .metadata()
            .map_err(|e| IndexError::io(&postings_path, e))?
            .len();
        let postings = if postings_len == 0 {
            None
        } else {
            let mapped = unsafe { Mmap::map(&postings_file) }
                .map_err(|e| IndexError::io(&postings_path, e))?;
            Some(mapped)
        };

        Ok(Self {
            shard,
            ngram_length,
            file_count: header.file_count,
            index_path,
            index,
            postings,
        })
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    /// File count recorded when the shard was created
    pub fn declared_file_count(&self) -> u32 {
        self.file_count
    }

    pub fn index_len(&self) -> u64 {
        self.index.len() as u64
    }

    pub fn postings_len(&self) -> u64 {
        self.blob().len() as u64
    }

    /// O(1) lookup of an n-gram's table entry
    pub fn entry(&self, ngram: NGram) -> Result<IndexEntry> {
        let ngram = self.ngram_length.check(ngram as u64)? as usize;
        // Table length was checked against the domain at open time
        let start = ShardHeader::SIZE + ngram * IndexEntry::SIZE;
        let raw: &[u8; IndexEntry::SIZE] = self.index[start..start + IndexEntry::SIZE]
            .try_into()
            .map_err(|_| IndexError::format(&self.index_path, "short index entry"))?;
        Ok(IndexEntry::from_bytes(raw))
    }

    pub fn postings_count(&self, ngram: NGram) -> Result<u32> {
        Ok(self.entry(ngram)?.count)
    }

    /// Borrowed view of an n-gram's postings, no copy made
    pub fn postings(&self, ngram: NGram) -> Result<Postings<'_>> {
        let entry = self.entry(ngram)?;
        if entry.count == 0 {
            return Ok(Postings::empty());
        }

        let blob = self.blob();
        let span = usize::try_from(entry.offset).ok().and_then(|start| {
            let len = (entry.count as usize).checked_mul(FILE_ID_SIZE)?;
            Some((start, start.checked_add(len)?))
        });
        let Some((start, end)) = span.filter(|&(_, end)| end <= blob.len()) else {
            return Err(IndexError::format(
                &self.index_path,
                format!(
                    "postings for n-gram {:#x} ({} ids at offset {}) overrun the {}-byte blob",
                    ngram,
                    entry.count,
                    entry.offset,
                    blob.len()
                ),
            ));
        };

        Ok(Postings {
            bytes: &blob[start..end],
        })
    }

    fn blob(&self) -> &[u8] {
        self.postings.as_deref().unwrap_or(&[])
    }
}

fn open_shard_file(path: &Path, shard: ShardId) -> Result<File> {
    File::open(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => IndexError::ShardMissing {
            shard,
            path: path.to_path_buf(),
        },
        _ => IndexError::io(path, e),
    })
}
