//! Multi-shard query resolution.
//!
//! A query string is cut into its L-byte windows. Every shard is searched
//! independently: the query's postings lists are ordered by length, the
//! rarest one seeds the candidate set, and each longer list narrows it with
//! a two-pointer merge. A zero-count n-gram ends the shard early. Matching
//! file IDs are resolved to names through the catalog.
//!
//! Results are candidates: every query n-gram occurs somewhere in each
//! returned file, not necessarily contiguously.

use crate::error::{IndexError, Result};
use crate::index::catalog::{Catalog, OpenMode};
use crate::index::shard::{Postings, ShardReader};
use crate::index::types::{ngram_to_bytes, FileId, IndexPaths, NGram, NgramLength, ShardId};
use crate::utils::{query_ngrams, resolve_threads};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info};

/// Read-only search handle over every committed shard of an index
pub struct QueryEngine {
    paths: IndexPaths,
    ngram_length: NgramLength,
    shard_count: u32,
    catalog: Mutex<Catalog>,
}

impl QueryEngine {
    /// Open the index at `base`; fails if its n-gram length differs
    pub fn open(base: impl AsRef<Path>, ngram_length: NgramLength) -> Result<Self> {
        let paths = IndexPaths::new(base);
        let catalog = Catalog::open(&paths.catalog(), ngram_length, OpenMode::ReadOnly)?;

        Ok(Self {
            shard_count: catalog.shard_count(),
            paths,
            ngram_length,
            catalog: Mutex::new(catalog),
        })
    }

    pub fn ngram_length(&self) -> NgramLength {
        self.ngram_length
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Every L-byte window of `query`, in order
    pub fn ngrams_of(&self, query: &[u8]) -> Result<Vec<NGram>> {
        query_ngrams(query, self.ngram_length)
    }

    /// Names of the files containing every n-gram in `ngrams`.
    ///
    /// Shards are searched on `concurrency` threads (0 means one per CPU).
    /// Results come back in file ID order. An empty n-gram list matches nothing.
    pub fn search(&self, ngrams: &[NGram], concurrency: usize) -> Result<Vec<PathBuf>> {
        for &ngram in ngrams {
            self.ngram_length.check(ngram as u64)?;
        }
        if ngrams.is_empty() || self.shard_count == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let threads = resolve_threads(concurrency).min(self.shard_count as usize);
        info!(
            index = %self.paths.base().display(),
            ngrams = ngrams.len(),
            shards = self.shard_count,
            threads,
            "search started"
        );

        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let found: Mutex<Vec<(ShardId, Vec<PathBuf>)>> = Mutex::new(Vec::new());
        let fatal: Mutex<Option<IndexError>> = Mutex::new(None);

        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        pool.scope(|s| {
            for _ in 0..threads {
                s.spawn(|_| {
                    while !abort.load(Ordering::Relaxed) {
                        let shard = next.fetch_add(1, Ordering::Relaxed) as u32;
                        if shard >= self.shard_count {
                            break;
                        }

                        let outcome = self
                            .search_shard(shard, ngrams)
                            .and_then(|ids| self.resolve_names(&ids))
                            .and_then(|names| {
                                found
                                    .lock()
                                    .map_err(|_| IndexError::LockPoisoned("results"))
                                    .map(|mut found| found.push((shard, names)))
                            });

                        if let Err(e) = outcome {
                            abort.store(true, Ordering::Relaxed);
                            if let Ok(mut slot) = fatal.lock() {
                                slot.get_or_insert(e);
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = fatal
            .into_inner()
            .map_err(|_| IndexError::LockPoisoned("error"))?
        {
            return Err(e);
        }

        let mut found = found
            .into_inner()
            .map_err(|_| IndexError::LockPoisoned("results"))?;
        found.sort_unstable_by_key(|(shard, _)| *shard);
        let names: Vec<PathBuf> = found.into_iter().flat_map(|(_, names)| names).collect();

        info!(
            matches = names.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search finished"
        );
        Ok(names)
    }

    /// Window `query` and search for it
    pub fn search_bytes(&self, query: &[u8], concurrency: usize) -> Result<Vec<PathBuf>> {
        let ngrams = self.ngrams_of(query)?;
        self.search(&ngrams, concurrency)
    }

    /// Matching file IDs within one shard, ascending
    pub fn search_shard(&self, shard: ShardId, ngrams: &[NGram]) -> Result<Vec<FileId>> {
        let reader = ShardReader::open(&self.paths, shard, self.ngram_length)?;

        let mut terms = ngrams
            .iter()
            .map(|&ngram| Ok((reader.postings_count(ngram)?, ngram)))
            .collect::<Result<Vec<(u32, NGram)>>>()?;
        // Rarest first; repeated query windows collapse
        terms.sort_unstable();
        terms.dedup();

        let Some(&(rarest_count, rarest)) = terms.first() else {
            return Ok(Vec::new());
        };
        if rarest_count == 0 {
            debug!(
                shard,
                ngram = %ngram_to_bytes(rarest, self.ngram_length).escape_ascii(),
                "n-gram absent from shard"
            );
            return Ok(Vec::new());
        }

        let mut candidates = reader.postings(rarest)?.to_vec();
        for &(_, ngram) in &terms[1..] {
            if candidates.is_empty() {
                break;
            }
            intersect_sorted(&mut candidates, reader.postings(ngram)?);
        }

        debug!(shard, matches = candidates.len(), "shard searched");
        Ok(candidates)
    }

    fn resolve_names(&self, ids: &[FileId]) -> Result<Vec<PathBuf>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut catalog = self
            .catalog
            .lock()
            .map_err(|_| IndexError::LockPoisoned("catalog"))?;
        ids.iter().map(|&id| catalog.lookup(id)).collect()
    }
}

/// Keep only the IDs of `candidates` that also appear in `postings`.
///
/// Both inputs must be sorted ascending; the output stays sorted.
pub fn intersect_sorted(candidates: &mut Vec<FileId>, postings: Postings<'_>) {
    let len = postings.len();
    let mut j = 0;
    candidates.retain(|&id| {
        while j < len && postings.get(j) < id {
            j += 1;
        }
        j < len && postings.get(j) == id
    });
}

/// Search the index at `base` for files containing `query`.
///
/// A query shorter than the n-gram length is rejected before the index is touched.
pub fn search(
    base: &Path,
    query: &[u8],
    ngram_length: NgramLength,
    thread_count: usize,
) -> Result<Vec<PathBuf>> {
    let ngrams = query_ngrams(query, ngram_length)?;
    let engine = QueryEngine::open(base, ngram_length)?;
    engine.search(&ngrams, thread_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::types::IndexConfig;
    use crate::index::writer::IndexBuilder;
    use crate::utils::NGramExtractor;
    use tempfile::tempdir;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    fn postings_bytes(ids: &[FileId]) -> Vec<u8> {
        ids.iter().flat_map(|id| id.to_ne_bytes()).collect()
    }

    fn intersect(a: &[FileId], b: &[FileId]) -> Vec<FileId> {
        let bytes = postings_bytes(b);
        let mut candidates = a.to_vec();
        intersect_sorted(&mut candidates, Postings::from_bytes(&bytes));
        candidates
    }

    #[test]
    fn test_intersect_sorted() {
        assert_eq!(intersect(&[1, 3, 5, 7], &[2, 3, 4, 7, 9]), vec![3, 7]);
        assert_eq!(intersect(&[1, 2, 3], &[]), Vec::<FileId>::new());
        assert_eq!(intersect(&[], &[1, 2]), Vec::<FileId>::new());
        assert_eq!(intersect(&[4, 8], &[1, 2, 3, 4, 5, 6, 7, 8]), vec![4, 8]);
        assert_eq!(intersect(&[10, 20], &[1, 2]), Vec::<FileId>::new());
    }

    fn build(base: &Path, files: &[(&str, &[u8])]) {
        let extractor = NGramExtractor::new(NgramLength::Three);
        let mut builder = IndexBuilder::open_or_create(base, IndexConfig::default()).unwrap();
        for (name, content) in files {
            builder.add(&extractor.extract(content).unwrap(), name).unwrap();
        }
        builder.close().unwrap();
    }

    #[test]
    fn test_search_single_shard() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        build(&base, &[("A", b"abcabc"), ("B", b"xyzabc")]);

        let engine = QueryEngine::open(&base, NgramLength::Three).unwrap();
        assert_eq!(engine.shard_count(), 1);
        assert_eq!(engine.search_bytes(b"abc", 2).unwrap(), paths(&["A", "B"]));
        assert_eq!(engine.search_bytes(b"bca", 2).unwrap(), paths(&["A"]));
        assert_eq!(engine.search_bytes(b"xyzab", 1).unwrap(), paths(&["B"]));
        assert!(engine.search_bytes(b"qqq", 1).unwrap().is_empty());
        assert!(engine.search(&[], 1).unwrap().is_empty());
    }

    #[test]
    fn test_search_shard_returns_sorted_ids() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        build(
            &base,
            &[("0", b"needle hay"), ("1", b"hay only"), ("2", b"a needle"), ("3", b"needles")],
        );

        let engine = QueryEngine::open(&base, NgramLength::Three).unwrap();
        let ngrams = engine.ngrams_of(b"needle").unwrap();
        assert_eq!(engine.search_shard(0, &ngrams).unwrap(), vec![0, 2, 3]);
    }

    #[test]
    fn test_query_too_short_is_rejected_first() {
        let dir = tempdir().unwrap();
        // No index exists: the length check must fire before it is opened
        let result = search(&dir.path().join("absent"), b"ab", NgramLength::Three, 1);
        assert!(matches!(result, Err(IndexError::QueryTooShort { len: 2, ngram_length: 3 })));
    }

    #[test]
    fn test_search_empty_index() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("corpus");
        build(&base, &[]);

        assert!(search(&base, b"abc", NgramLength::Three, 4).unwrap().is_empty());
    }
}
