use crate::error::{IndexError, Result};
use crate::index::types::{IndexConfig, NgramLength};
use crate::index::writer::IndexBuilder;
use crate::utils::progress::{indexing_bar, ProgressBar};
use crate::utils::{resolve_threads, NGramExtractor};
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{info, warn};

/// Knobs for [`build_index_with_options`]
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub config: IndexConfig,
    /// Extraction workers; 0 means one per CPU
    pub threads: usize,
    /// Store the file name only instead of the path as given
    pub store_basename: bool,
    /// Draw a progress bar on stderr
    pub show_progress: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            config: IndexConfig::default(),
            threads: 0,
            store_basename: true,
            show_progress: false,
        }
    }
}

/// Outcome of one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Files added to the index by this run
    pub files_indexed: u64,
    /// Inputs skipped because they could not be read
    pub files_failed: Vec<PathBuf>,
    /// Shards created by this run
    pub shards_written: u32,
    /// Files in the corpus after this run
    pub total_files: u32,
}

/// Index `file_paths` into the index at `base`, appending if it exists
pub fn build_index(
    base: &Path,
    file_paths: &[PathBuf],
    ngram_length: NgramLength,
    max_buffer_bytes: u64,
    thread_count: usize,
) -> Result<BuildSummary> {
    let options = BuildOptions {
        config: IndexConfig {
            ngram_length,
            max_buffer_bytes,
            ..IndexConfig::default()
        },
        threads: thread_count,
        ..BuildOptions::default()
    };
    build_index_with_options(base, file_paths, &options)
}

/// Index files with explicit options.
///
/// Extraction runs on `threads` workers that claim inputs from a shared
/// cursor; calls into the builder are serialized behind one lock. A file
/// that cannot be read is logged and skipped. Any other error stops every
/// worker and is returned once they have drained.
pub fn build_index_with_options(
    base: &Path,
    file_paths: &[PathBuf],
    options: &BuildOptions,
) -> Result<BuildSummary> {
    let started = Instant::now();
    let files = collect_input_files(file_paths);
    let threads = resolve_threads(options.threads).min(files.len().max(1));

    let builder = IndexBuilder::open_or_create(base, options.config.clone())?;
    let initial_shards = builder.stats().shard_count;
    let progress = builder.progress_handle();

    info!(
        index = %base.display(),
        files = files.len(),
        threads,
        ngram_length = %options.config.ngram_length,
        "indexing started"
    );

    let pb = if options.show_progress {
        let pb = indexing_bar(files.len() as u64);
        pb.set_message("Indexing...");
        pb
    } else {
        ProgressBar::hidden()
    };

    let extractor = NGramExtractor::new(options.config.ngram_length);
    let builder = Mutex::new(builder);
    let failed = Mutex::new(Vec::new());
    let fatal: Mutex<Option<IndexError>> = Mutex::new(None);
    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
    pool.scope(|s| {
        for _ in 0..threads {
            s.spawn(|_| {
                while !abort.load(Ordering::Relaxed) {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(path) = files.get(i) else { break };

                    let outcome = index_one(&extractor, &builder, path, options.store_basename);
                    match outcome {
                        Ok(()) => {}
                        Err(e) if !e.is_fatal() => {
                            warn!(path = %path.display(), error = %e, "skipping file");
                            match failed.lock() {
                                Ok(mut failed) => failed.push(path.clone()),
                                Err(_) => {
                                    let e = IndexError::LockPoisoned("failed-files");
                                    record_fatal(&fatal, &abort, e);
                                }
                            }
                        }
                        Err(e) => record_fatal(&fatal, &abort, e),
                    }

                    pb.inc(1);
                    if progress.snapshot().flushing {
                        pb.set_message("Flushing shard...");
                    } else {
                        pb.set_message("Indexing...");
                    }
                }
            });
        }
    });

    let fatal = fatal
        .into_inner()
        .map_err(|_| IndexError::LockPoisoned("error"))?;
    if let Some(e) = fatal {
        pb.finish_with_message("Indexing failed");
        return Err(e);
    }

    let builder = builder
        .into_inner()
        .map_err(|_| IndexError::LockPoisoned("builder"))?;
    pb.set_message("Flushing shard...");
    let stats = builder.close()?;

    let files_failed = failed
        .into_inner()
        .map_err(|_| IndexError::LockPoisoned("failed-files"))?;

    let summary = BuildSummary {
        files_indexed: stats.session_files,
        files_failed,
        shards_written: stats.shard_count - initial_shards,
        total_files: stats.total_files,
    };
    pb.finish_with_message(format!("Indexed {} files", summary.files_indexed));

    info!(
        files_indexed = summary.files_indexed,
        files_failed = summary.files_failed.len(),
        shards_written = summary.shards_written,
        total_files = summary.total_files,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "indexing finished"
    );
    Ok(summary)
}

fn index_one(
    extractor: &NGramExtractor,
    builder: &Mutex<IndexBuilder>,
    path: &Path,
    store_basename: bool,
) -> Result<()> {
    // Extraction runs outside the lock
    let ngrams = extractor.extract_file(path)?;
    let name = catalog_name(path, store_basename);

    let mut builder = builder
        .lock()
        .map_err(|_| IndexError::LockPoisoned("builder"))?;
    builder.add(&ngrams, name)?;
    Ok(())
}

fn record_fatal(slot: &Mutex<Option<IndexError>>, abort: &AtomicBool, e: IndexError) {
    abort.store(true, Ordering::Relaxed);
    if let Ok(mut slot) = slot.lock() {
        // Keep the first error; later ones are usually consequences of it
        slot.get_or_insert(e);
    }
}

/// Name recorded in the catalog for `path`, byte for byte
pub fn catalog_name(path: &Path, store_basename: bool) -> &OsStr {
    match path.file_name() {
        Some(name) if store_basename => name,
        _ => path.as_os_str(),
    }
}

/// Expand directory arguments into the regular files beneath them.
///
/// Every file is taken: hidden entries included, ignore files not consulted.
/// Plain file arguments pass through unchanged, even if missing, so the
/// failure is reported per file during extraction.
pub fn collect_input_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::with_capacity(paths.len());

    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }

        let walker = WalkBuilder::new(path)
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false)
            .sort_by_file_path(|a, b| a.cmp(b))
            .build();

        files.extend(
            walker
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
                .map(|entry| entry.into_path()),
        );
    }

    files
}
