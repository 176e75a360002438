use crate::error::{IndexError, Result};
use crate::index::buffer::WriteBuffer;
use crate::index::catalog::{Catalog, OpenMode};
use crate::index::shard::ShardWriter;
use crate::index::types::{FileId, IndexConfig, IndexPaths, NGram, ShardId};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Lifecycle of an [`IndexBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// Nothing added this session
    Empty,
    Accumulating,
    Flushing,
    Closed,
}

/// Point-in-time view of builder progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuilderStats {
    /// Files in the corpus, including ones assigned this session
    pub total_files: u32,
    /// Files added through this builder
    pub session_files: u64,
    pub shard_count: u32,
    pub flushing: bool,
}

/// Counters shared with progress reporters on other threads
#[derive(Debug, Default)]
pub struct BuildProgress {
    total_files: AtomicU32,
    session_files: AtomicU64,
    shard_count: AtomicU32,
    flushing: AtomicBool,
}

impl BuildProgress {
    pub fn snapshot(&self) -> BuilderStats {
        BuilderStats {
            total_files: self.total_files.load(Ordering::Relaxed),
            session_files: self.session_files.load(Ordering::Relaxed),
            shard_count: self.shard_count.load(Ordering::Relaxed),
            flushing: self.flushing.load(Ordering::Relaxed),
        }
    }
}

/// Accumulates per-file n-gram sets and rotates them into shards.
///
/// Buffered files become visible to searches only after a flush. Dropping
/// a builder that still holds buffered files flushes them.
pub struct IndexBuilder {
    paths: IndexPaths,
    config: IndexConfig,
    catalog: Catalog,
    buffer: WriteBuffer,
    state: BuilderState,
    progress: Arc<BuildProgress>,
    /// Called mid-flush, once the shard's postings are written
    #[cfg(test)]
    flush_hook: Option<Box<dyn FnMut(&BuildProgress) + Send>>,
}

impl IndexBuilder {
    /// Open the index at `base` for appending, creating its catalog if absent
    pub fn open_or_create(base: impl AsRef<Path>, config: IndexConfig) -> Result<Self> {
        let paths = IndexPaths::new(base);
        let catalog_path = paths.catalog();

        if !catalog_path.exists() {
            Catalog::create(&catalog_path, config.ngram_length, config.max_filename_length)?;
        }
        let catalog = Catalog::open(&catalog_path, config.ngram_length, OpenMode::ReadWrite)?;

        info!(
            index = %paths.base().display(),
            ngram_length = %config.ngram_length,
            files = catalog.file_count(),
            shards = catalog.shard_count(),
            max_buffer_bytes = config.max_buffer_bytes,
            "opened index for writing"
        );

        let progress = Arc::new(BuildProgress::default());
        progress
            .total_files
            .store(catalog.file_count(), Ordering::Relaxed);
        progress
            .shard_count
            .store(catalog.shard_count(), Ordering::Relaxed);

        Ok(Self {
            paths,
            buffer: WriteBuffer::new(config.ngram_length),
            config,
            catalog,
            state: BuilderState::Empty,
            progress,
            #[cfg(test)]
            flush_hook: None,
        })
    }

    /// Buffer one file's distinct n-grams under the next file ID.
    ///
    /// Flushes before returning once buffered usage reaches the configured
    /// bound, or once the pending files reach `max_files_per_shard`.
    pub fn add(&mut self, ngrams: &[NGram], filename: impl AsRef<OsStr>) -> Result<FileId> {
        if self.state == BuilderState::Closed {
            return Err(IndexError::Closed);
        }

        let file_id = self.catalog.file_count();
        self.buffer.push(ngrams, file_id)?;
        let assigned = self.catalog.append(filename)?;
        debug_assert_eq!(assigned, file_id);

        self.state = BuilderState::Accumulating;
        self.progress
            .total_files
            .store(self.catalog.file_count(), Ordering::Relaxed);
        self.progress.session_files.fetch_add(1, Ordering::Relaxed);

        if self.buffer.usage() >= self.config.max_buffer_bytes {
            debug!(
                usage = self.buffer.usage(),
                bound = self.config.max_buffer_bytes,
                "write buffer full"
            );
            self.flush()?;
        } else if self.shard_is_full() {
            debug!(
                files = self.catalog.pending_count(),
                limit = self.config.max_files_per_shard,
                "shard file limit reached"
            );
            self.flush()?;
        }

        Ok(file_id)
    }

    fn shard_is_full(&self) -> bool {
        let limit = self.config.max_files_per_shard as usize;
        limit > 0 && self.catalog.pending_count() >= limit
    }

    /// Write buffered postings to a new shard and commit the catalog.
    ///
    /// Returns the new shard's number, or None when nothing was pending.
    pub fn flush(&mut self) -> Result<Option<ShardId>> {
        if self.state == BuilderState::Closed {
            return Err(IndexError::Closed);
        }
        if self.catalog.pending_count() == 0 {
            return Ok(None);
        }

        self.state = BuilderState::Flushing;
        self.progress.flushing.store(true, Ordering::Relaxed);
        let result = self.write_shard();
        self.progress.flushing.store(false, Ordering::Relaxed);
        self.state = BuilderState::Accumulating;

        result.map(Some)
    }

    fn write_shard(&mut self) -> Result<ShardId> {
        let shard = self.catalog.shard_count();
        let files = u32::try_from(self.catalog.pending_count()).map_err(|_| {
            IndexError::format(self.catalog.path(), "too many files buffered for one shard")
        })?;

        info!(
            shard,
            files,
            ngrams = self.buffer.distinct_ngrams(),
            usage = self.buffer.usage(),
            "flushing shard"
        );

        let mut writer = ShardWriter::create(&self.paths, shard, self.config.ngram_length, files)?;
        self.buffer
            .for_each_list(|ngram, ids| writer.append_postings(ngram, ids))?;
        let summary = writer.close()?;

        #[cfg(test)]
        if let Some(hook) = self.flush_hook.as_mut() {
            hook(&self.progress);
        }

        // Shard files are durable; only now may the catalog reference them
        self.catalog.flush_counters()?;
        let registered = self.catalog.next_shard_number()?;
        debug_assert_eq!(registered, shard);

        self.buffer.clear();
        self.progress
            .shard_count
            .store(self.catalog.shard_count(), Ordering::Relaxed);

        info!(
            shard,
            files,
            postings = summary.postings,
            postings_bytes = summary.postings_bytes,
            "shard written"
        );
        Ok(registered)
    }

    /// Flush anything still buffered and release the catalog
    pub fn close(mut self) -> Result<BuilderStats> {
        self.flush()?;
        self.state = BuilderState::Closed;
        Ok(self.stats())
    }

    pub fn stats(&self) -> BuilderStats {
        self.progress.snapshot()
    }

    /// Shared counters readable while the builder is locked elsewhere
    pub fn progress_handle(&self) -> Arc<BuildProgress> {
        Arc::clone(&self.progress)
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn paths(&self) -> &IndexPaths {
        &self.paths
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Accounted bytes currently buffered
    pub fn buffered_bytes(&self) -> u64 {
        self.buffer.usage()
    }
}

impl Drop for IndexBuilder {
    fn drop(&mut self) {
        if self.state == BuilderState::Closed {
            return;
        }
        if let Err(e) = self.flush() {
            error!(
                index = %self.paths.base().display(),
                error = %e,
                "failed to flush buffered files on drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::shard::ShardReader;
    use crate::index::types::NgramLength;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn config(max_buffer_bytes: u64) -> IndexConfig {
        IndexConfig {
            max_buffer_bytes,
            ..IndexConfig::default()
        }
    }

    #[test]
    fn test_file_ids_are_monotonic_across_flushes() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        let mut builder = IndexBuilder::open_or_create(&base, config(u64::MAX)).unwrap();
        assert_eq!(builder.state(), BuilderState::Empty);

        assert_eq!(builder.add(&[1, 2], "a").unwrap(), 0);
        assert_eq!(builder.add(&[2], "b").unwrap(), 1);
        assert_eq!(builder.flush().unwrap(), Some(0));
        assert_eq!(builder.add(&[3], "c").unwrap(), 2);

        let stats = builder.close().unwrap();
        assert_eq!(
            stats,
            BuilderStats {
                total_files: 3,
                session_files: 3,
                shard_count: 2,
                flushing: false,
            }
        );

        let paths = IndexPaths::new(&base);
        let first = ShardReader::open(&paths, 0, NgramLength::Three).unwrap();
        assert_eq!(first.declared_file_count(), 2);
        assert_eq!(first.postings(2).unwrap().to_vec(), vec![0, 1]);
        let second = ShardReader::open(&paths, 1, NgramLength::Three).unwrap();
        assert_eq!(second.postings(3).unwrap().to_vec(), vec![2]);
        assert!(second.postings(2).unwrap().is_empty());
    }

    #[test]
    fn test_empty_flush_writes_nothing() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        let mut builder = IndexBuilder::open_or_create(&base, config(u64::MAX)).unwrap();

        assert_eq!(builder.flush().unwrap(), None);
        assert_eq!(builder.close().unwrap().shard_count, 0);
        assert!(!IndexPaths::new(&base).index(0).exists());
    }

    #[test]
    fn test_bound_triggers_flush() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        let mut builder = IndexBuilder::open_or_create(&base, config(1)).unwrap();

        builder.add(&[7], "only").unwrap();
        assert_eq!(builder.stats().shard_count, 1);
        assert_eq!(builder.buffered_bytes(), 0);

        let mut catalog =
            Catalog::open(&IndexPaths::new(&base).catalog(), NgramLength::Three, OpenMode::ReadOnly)
                .unwrap();
        assert_eq!(catalog.lookup(0).unwrap(), Path::new("only"));
    }

    #[test]
    fn test_drop_flushes_buffered_files() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        {
            let mut builder = IndexBuilder::open_or_create(&base, config(u64::MAX)).unwrap();
            builder.add(&[9], "pending").unwrap();
        }

        let catalog =
            Catalog::open(&IndexPaths::new(&base).catalog(), NgramLength::Three, OpenMode::ReadOnly)
                .unwrap();
        assert_eq!(catalog.shard_count(), 1);
        assert_eq!(catalog.file_count(), 1);
    }

    #[test]
    fn test_reopen_continues_numbering() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");

        let mut builder = IndexBuilder::open_or_create(&base, config(u64::MAX)).unwrap();
        builder.add(&[1], "first").unwrap();
        builder.close().unwrap();

        let mut builder = IndexBuilder::open_or_create(&base, config(u64::MAX)).unwrap();
        assert_eq!(builder.add(&[1], "second").unwrap(), 1);
        let stats = builder.close().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.session_files, 1);
        assert_eq!(stats.shard_count, 2);
    }

    #[test]
    fn test_reopen_with_other_length_fails() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        IndexBuilder::open_or_create(&base, config(u64::MAX))
            .unwrap()
            .close()
            .unwrap();

        let four = IndexConfig {
            ngram_length: NgramLength::Four,
            ..config(u64::MAX)
        };
        assert!(matches!(
            IndexBuilder::open_or_create(&base, four),
            Err(IndexError::FormatMismatch { .. })
        ));
    }

    #[test]
    fn test_rejected_ngram_assigns_no_id() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        let mut builder = IndexBuilder::open_or_create(&base, config(u64::MAX)).unwrap();

        assert!(builder.add(&[1 << 24], "bad").is_err());
        assert_eq!(builder.add(&[1], "good").unwrap(), 0);
        builder.close().unwrap();
    }

    #[test]
    fn test_file_limit_triggers_flush() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        let limited = IndexConfig {
            max_files_per_shard: 2,
            ..config(u64::MAX)
        };
        let mut builder = IndexBuilder::open_or_create(&base, limited).unwrap();

        for (i, name) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            builder.add(&[i as NGram], name).unwrap();
        }
        assert_eq!(builder.stats().shard_count, 2);
        assert_eq!(builder.close().unwrap().shard_count, 3);

        let paths = IndexPaths::new(&base);
        let declared: Vec<u32> = (0..3)
            .map(|shard| {
                ShardReader::open(&paths, shard, NgramLength::Three)
                    .unwrap()
                    .declared_file_count()
            })
            .collect();
        assert_eq!(declared, vec![2, 2, 1]);
    }

    #[test]
    fn test_stats_report_flush_in_progress() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        let mut builder = IndexBuilder::open_or_create(&base, config(u64::MAX)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        builder.flush_hook = Some(Box::new(move |progress: &BuildProgress| {
            sink.lock().unwrap().push(progress.snapshot());
        }));

        let handle = builder.progress_handle();
        builder.add(&[5], "a").unwrap();
        assert!(!handle.snapshot().flushing);

        builder.flush().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].flushing);
        assert_eq!(seen[0].total_files, 1);
        assert!(!handle.snapshot().flushing);
        assert_eq!(builder.state(), BuilderState::Accumulating);
    }
}
