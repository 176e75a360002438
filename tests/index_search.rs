//! End-to-end indexing and search through the public API.
//!
//! Every shard of a 3-byte index carries a full 2^24-entry table (~200 MB),
//! so each test keeps its shard count to the minimum it needs.

use bytegram::index::buffer::WriteBuffer;
use bytegram::index::stats::collect_stats;
use bytegram::index::{
    build_index, build_index_with_options, BuildOptions, IndexBuilder, IndexConfig, NgramLength,
};
use bytegram::query::{search, QueryEngine};
use bytegram::utils::NGramExtractor;
use bytegram::IndexError;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn paths(names: &[&str]) -> Vec<PathBuf> {
    names.iter().map(PathBuf::from).collect()
}

/// Write `files` into `dir` and return their paths in the given order
fn write_files(dir: &Path, files: &[(&str, &[u8])]) -> Vec<PathBuf> {
    files
        .iter()
        .map(|(name, content)| {
            let path = dir.join(name);
            fs::write(&path, content).unwrap();
            path
        })
        .collect()
}

#[test]
fn test_two_file_scenario() {
    let dir = tempdir().unwrap();
    let inputs = write_files(dir.path(), &[("A", b"abcabc"), ("B", b"xyzabc")]);
    let base = dir.path().join("corpus");

    let summary = build_index(&base, &inputs, NgramLength::Three, u64::MAX, 1).unwrap();
    assert_eq!(summary.files_indexed, 2);
    assert_eq!(summary.shards_written, 1);

    let engine = QueryEngine::open(&base, NgramLength::Three).unwrap();
    let find = |query: &[u8]| engine.search_bytes(query, 2).unwrap();

    assert_eq!(find(b"abc"), paths(&["A", "B"]));
    assert_eq!(find(b"bca"), paths(&["A"]));
    assert_eq!(find(b"xyz"), paths(&["B"]));
    assert_eq!(find(b"xyzabc"), paths(&["B"]));
    assert_eq!(find(b"cabc"), paths(&["A"]));
    assert!(find(b"zzz").is_empty());
    // Present in different files but never together
    assert!(find(b"bcaxyz").is_empty());

    assert!(matches!(
        engine.ngrams_of(b"ab"),
        Err(IndexError::QueryTooShort { len: 2, ngram_length: 3 })
    ));
}

#[test]
fn test_matches_split_across_two_shards() {
    let dir = tempdir().unwrap();
    let files: [(&str, &[u8]); 5] = [
        ("needle-0", b"needle-0"),
        ("needle-1", b"needle-1"),
        ("haystack", b"haystack"),
        ("needle-3", b"needle-3"),
        ("needle-4", b"needle-4"),
    ];
    let inputs = write_files(dir.path(), &files);

    // Bound the buffer at exactly what the first three files occupy
    let extractor = NGramExtractor::new(NgramLength::Three);
    let mut replay = WriteBuffer::new(NgramLength::Three);
    for (id, (_, content)) in files.iter().take(3).enumerate() {
        replay
            .push(&extractor.extract(content).unwrap(), id as u32)
            .unwrap();
    }
    let bound = replay.usage();

    let base = dir.path().join("corpus");
    let summary = build_index(&base, &inputs, NgramLength::Three, bound, 1).unwrap();
    assert_eq!(summary.shards_written, 2);
    assert_eq!(summary.total_files, 5);

    let stats = collect_stats(&base).unwrap();
    let declared: Vec<u32> = stats.shards.iter().map(|s| s.declared_files).collect();
    assert_eq!(declared, vec![3, 2]);

    let found = search(&base, b"needle", NgramLength::Three, 2).unwrap();
    assert_eq!(found, paths(&["needle-0", "needle-1", "needle-3", "needle-4"]));

    let engine = QueryEngine::open(&base, NgramLength::Three).unwrap();
    let ngrams = engine.ngrams_of(b"needle").unwrap();
    assert_eq!(engine.search_shard(0, &ngrams).unwrap(), vec![0, 1]);
    assert_eq!(engine.search_shard(1, &ngrams).unwrap(), vec![3, 4]);
    assert_eq!(engine.search_bytes(b"e-4", 1).unwrap(), paths(&["needle-4"]));
    assert_eq!(engine.search_bytes(b"stack", 1).unwrap(), paths(&["haystack"]));
}

#[test]
fn test_results_are_candidates_not_substrings() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("corpus");
    let extractor = NGramExtractor::new(NgramLength::Three);

    let mut builder = IndexBuilder::open_or_create(&base, IndexConfig::default()).unwrap();
    // "abc" and "bcd" both occur, but never as "abcd"
    builder
        .add(&extractor.extract(b"abc--bcd").unwrap(), "split")
        .unwrap();
    builder
        .add(&extractor.extract(b"xxabcdxx").unwrap(), "whole")
        .unwrap();
    builder
        .add(&extractor.extract(b"ab").unwrap(), "tiny")
        .unwrap();
    builder.close().unwrap();

    let found = search(&base, b"abcd", NgramLength::Three, 0).unwrap();
    assert_eq!(found, paths(&["split", "whole"]));
}

#[test]
fn test_reopened_index_keeps_numbering_and_results() {
    let dir = tempdir().unwrap();
    let first = write_files(dir.path(), &[("one", b"common-1")]);
    let second = write_files(dir.path(), &[("two", b"common-2")]);
    let base = dir.path().join("corpus");

    build_index(&base, &first, NgramLength::Three, u64::MAX, 1).unwrap();
    let summary = build_index(&base, &second, NgramLength::Three, u64::MAX, 1).unwrap();
    assert_eq!(summary.files_indexed, 1);
    assert_eq!(summary.shards_written, 1);
    assert_eq!(summary.total_files, 2);

    let engine = QueryEngine::open(&base, NgramLength::Three).unwrap();
    assert_eq!(engine.shard_count(), 2);
    let ngrams = engine.ngrams_of(b"common").unwrap();
    assert_eq!(engine.search_shard(0, &ngrams).unwrap(), vec![0]);
    assert_eq!(engine.search_shard(1, &ngrams).unwrap(), vec![1]);
    assert_eq!(engine.search(&ngrams, 4).unwrap(), paths(&["one", "two"]));
}

#[test]
fn test_index_of_other_length_is_rejected() {
    let dir = tempdir().unwrap();
    let base = dir.path().join("corpus");
    IndexBuilder::open_or_create(&base, IndexConfig::default())
        .unwrap()
        .close()
        .unwrap();

    assert!(matches!(
        QueryEngine::open(&base, NgramLength::Four),
        Err(IndexError::FormatMismatch { .. })
    ));
    assert!(matches!(
        search(&base, b"abcd", NgramLength::Four, 1),
        Err(IndexError::FormatMismatch { .. })
    ));
}

#[test]
fn test_full_paths_and_directory_inputs() {
    let dir = tempdir().unwrap();
    let samples = dir.path().join("samples");
    fs::create_dir(&samples).unwrap();
    write_files(&samples, &[("first.bin", b"\x4d\x5a\x90\x00"), ("second.bin", b"\x4d\x5a\x00")]);
    let base = dir.path().join("corpus");

    let options = BuildOptions {
        // Temporary directories can be long
        config: IndexConfig {
            max_filename_length: 1024,
            ..IndexConfig::default()
        },
        threads: 2,
        store_basename: false,
        ..BuildOptions::default()
    };
    let summary = build_index_with_options(&base, &[samples.clone()], &options).unwrap();
    assert_eq!(summary.files_indexed, 2);

    let found = search(&base, b"\x4d\x5a\x90", NgramLength::Three, 1).unwrap();
    assert_eq!(found, vec![samples.join("first.bin")]);
}
