//! Utility functions and data structures.
//!
//! ## Modules
//!
//! - [`app_data`] - Configuration file in the platform app data directory
//! - [`ngram`] - Distinct n-gram extraction and query windowing
//! - [`progress`] - Progress bar, no-op without the `progress` feature
//!
//! ## Key Functions
//!
//! ```no_run
//! use bytegram::index::NgramLength;
//! use bytegram::utils::{query_ngrams, NGramExtractor};
//!
//! // Distinct, sorted n-grams of a file's content
//! let extractor = NGramExtractor::new(NgramLength::Three);
//! let ngrams = extractor.extract(b"abcabc").unwrap();
//! // Returns: ["abc", "bca", "cab"] as little-endian keys
//!
//! // Every window of a query, in order
//! let windows = query_ngrams(b"abcd", NgramLength::Three).unwrap();
//! // Returns: ["abc", "bcd"]
//! ```

pub mod app_data;
pub mod ngram;
pub mod progress;

pub use app_data::*;
pub use ngram::*;
