//! # bytegram - Byte N-gram Index
//!
//! bytegram builds a persistent inverted index over arbitrary binary files,
//! keyed by every distinct 3- or 4-byte sequence, and answers "which files
//! contain all of these bytes" queries without scanning the corpus.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`index`] - Catalog, shard storage, write buffer and index building
//! - [`query`] - Parallel multi-shard search
//! - [`utils`] - N-gram extraction, configuration, progress reporting
//! - [`error`] - Error type shared by every operation
//!
//! ## Quick Start
//!
//! ```no_run
//! use bytegram::index::{build_index, NgramLength};
//! use bytegram::query::QueryEngine;
//! use std::path::{Path, PathBuf};
//!
//! let base = Path::new("/data/corpus");
//! let files = vec![PathBuf::from("/samples/a.bin"), PathBuf::from("/samples/b.bin")];
//!
//! // Index the files, flushing a shard every 4 GiB of buffered postings
//! build_index(base, &files, NgramLength::Three, 4 << 30, 0).unwrap();
//!
//! // Find every file that contains each 3-byte window of the query
//! let engine = QueryEngine::open(base, NgramLength::Three).unwrap();
//! let ngrams = engine.ngrams_of(b"MZ\x90\x00").unwrap();
//! for name in engine.search(&ngrams, 0).unwrap() {
//!     println!("{}", name.display());
//! }
//! ```
//!
//! ## On-disk layout
//!
//! An index named `corpus` consists of:
//!
//! 1. **`corpus.catalog`** - header plus one fixed-width filename slot per file ID
//! 2. **`corpus.indexNNNNNNNN`** - per shard, a table with one (offset, count)
//!    entry for every possible n-gram value
//! 3. **`corpus.postingsNNNNNNNN`** - per shard, the sorted file ID lists
//!
//! Shards are immutable once written. New files always go to a new shard.

pub mod error;
pub mod index;
pub mod query;
pub mod utils;

pub use error::{IndexError, Result};
