use crate::error::{IndexError, Result};
use crate::index::types::{bytes_to_ngram, NGram, NgramLength};
use memmap2::Mmap;
use std::collections::BTreeSet;
use std::fs::File;
use std::path::Path;

/// Below this size sort+dedup beats clearing a 2MB bitset
const SMALL_CONTENT_LEN: usize = 1024;

/// Bitset for tracking which 3-byte n-grams have been seen.
/// Uses 2MB to cover all 16M possible values (24 bits).
struct NgramBitset {
    bits: Vec<u64>,
}

impl NgramBitset {
    /// Create a new bitset (2MB allocation, zeroed)
    #[inline]
    fn new() -> Self {
        // 16M n-grams / 64 bits per u64 = 262144 u64s = 2MB
        Self {
            bits: vec![0u64; 262144],
        }
    }

    /// Check if an n-gram is set and set it. Returns true if it was already set.
    #[inline]
    fn test_and_set(&mut self, ngram: NGram) -> bool {
        let idx = (ngram >> 6) as usize;
        let bit = 1u64 << (ngram & 63);
        let was_set = (self.bits[idx] & bit) != 0;
        self.bits[idx] |= bit;
        was_set
    }

    /// Collect all set n-grams in ascending order
    fn collect(&self) -> Vec<NGram> {
        let mut result = Vec::with_capacity(8192);
        for (word_idx, &word) in self.bits.iter().enumerate() {
            if word == 0 {
                continue;
            }
            let base = (word_idx as u32) << 6;
            let mut w = word;
            while w != 0 {
                let bit_pos = w.trailing_zeros();
                result.push(base | bit_pos);
                w &= w - 1; // clear lowest set bit
            }
        }
        result
    }
}

/// Produces the set of distinct n-grams present in a file.
///
/// Presence, not frequency, is indexed: every value appears once in the
/// output, which is always sorted ascending.
#[derive(Debug, Clone, Copy)]
pub struct NGramExtractor {
    ngram_length: NgramLength,
}

impl NGramExtractor {
    pub fn new(ngram_length: NgramLength) -> Self {
        Self { ngram_length }
    }

    pub fn ngram_length(&self) -> NgramLength {
        self.ngram_length
    }

    /// Map a file read-only and extract its distinct n-grams
    pub fn extract_file(&self, path: &Path) -> Result<Vec<NGram>> {
        let failed = |reason: String| IndexError::Extraction {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| failed(e.to_string()))?;
        let len = file.metadata().map_err(|e| failed(e.to_string()))?.len();

        // Zero-length files cannot be mapped on every platform
        if len < self.ngram_length.bytes() as u64 {
            return Ok(Vec::new());
        }

        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| failed(e.to_string()))?;
        self.extract(&mmap).map_err(|e| failed(e.to_string()))
    }

    /// Extract distinct n-grams from in-memory content
    pub fn extract(&self, content: &[u8]) -> Result<Vec<NGram>> {
        let len = self.ngram_length.bytes();
        if content.len() < len {
            return Ok(Vec::new());
        }

        match self.ngram_length {
            NgramLength::Three if content.len() >= SMALL_CONTENT_LEN => {
                let mut bitset = NgramBitset::new();
                for window in content.windows(len) {
                    let ngram = self.ngram_length.check(bytes_to_ngram(window))?;
                    bitset.test_and_set(ngram);
                }
                Ok(bitset.collect())
            }
            NgramLength::Three => {
                let mut ngrams = content
                    .windows(len)
                    .map(|w| self.ngram_length.check(bytes_to_ngram(w)))
                    .collect::<Result<Vec<_>>>()?;
                ngrams.sort_unstable();
                ngrams.dedup();
                Ok(ngrams)
            }
            NgramLength::Four => {
                // 2^32 values: an ordered set keeps memory proportional to the file
                let mut seen = BTreeSet::new();
                for window in content.windows(len) {
                    seen.insert(self.ngram_length.check(bytes_to_ngram(window))?);
                }
                Ok(seen.into_iter().collect())
            }
        }
    }
}

/// Every L-byte window of a query, in order, duplicates kept
pub fn query_ngrams(query: &[u8], ngram_length: NgramLength) -> Result<Vec<NGram>> {
    let len = ngram_length.bytes();
    if query.len() < len {
        return Err(IndexError::QueryTooShort {
            len: query.len(),
            ngram_length: len,
        });
    }

    query
        .windows(len)
        .map(|w| ngram_length.check(bytes_to_ngram(w)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn ngram(bytes: &[u8]) -> NGram {
        bytes_to_ngram(bytes) as NGram
    }

    #[test]
    fn test_extract_short_content_is_empty() {
        let three = NGramExtractor::new(NgramLength::Three);
        assert!(three.extract(b"").unwrap().is_empty());
        assert!(three.extract(b"ab").unwrap().is_empty());
        assert_eq!(three.extract(b"abc").unwrap().len(), 1);

        let four = NGramExtractor::new(NgramLength::Four);
        assert!(four.extract(b"abc").unwrap().is_empty());
        assert_eq!(four.extract(b"abcd").unwrap(), vec![ngram(b"abcd")]);
    }

    #[test]
    fn test_extract_collapses_duplicates() {
        let extractor = NGramExtractor::new(NgramLength::Three);
        let mut expected = vec![ngram(b"abc"), ngram(b"bca"), ngram(b"cab")];
        expected.sort_unstable();
        assert_eq!(extractor.extract(b"abcabc").unwrap(), expected);

        let mut expected = vec![ngram(b"xyz"), ngram(b"yza"), ngram(b"zab"), ngram(b"abc")];
        expected.sort_unstable();
        assert_eq!(extractor.extract(b"xyzabc").unwrap(), expected);
    }

    #[test]
    fn test_bitset_path_matches_small_path() {
        // Same content extracted through both 3-byte strategies
        let content: Vec<u8> = (0..4000u32).map(|i| (i * 7 % 251) as u8).collect();
        let extractor = NGramExtractor::new(NgramLength::Three);
        let large = extractor.extract(&content).unwrap();

        let mut small: Vec<NGram> = content
            .windows(3)
            .map(|w| bytes_to_ngram(w) as NGram)
            .collect();
        small.sort_unstable();
        small.dedup();

        assert_eq!(large, small);
        assert!(large.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_extract_four_byte_sorted_and_in_range() {
        let content: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
        let extractor = NGramExtractor::new(NgramLength::Four);
        let ngrams = extractor.extract(&content).unwrap();

        // 256 distinct windows in a repeating 0..=255 sequence
        assert_eq!(ngrams.len(), 256);
        assert!(ngrams.windows(2).all(|w| w[0] < w[1]));
        assert!(ngrams.contains(&ngram(&[0xFF, 0x00, 0x01, 0x02])));
    }

    #[test]
    fn test_extract_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.bin");
        fs::write(&path, b"abcabc").unwrap();
        let empty = dir.path().join("empty.bin");
        fs::write(&empty, b"").unwrap();

        let extractor = NGramExtractor::new(NgramLength::Three);
        assert_eq!(extractor.extract_file(&path).unwrap().len(), 3);
        assert!(extractor.extract_file(&empty).unwrap().is_empty());

        let missing = extractor.extract_file(&dir.path().join("missing.bin"));
        assert!(matches!(missing, Err(IndexError::Extraction { .. })));
    }

    #[test]
    fn test_query_ngrams_keeps_order_and_duplicates() {
        let ngrams = query_ngrams(b"abcabc", NgramLength::Three).unwrap();
        assert_eq!(
            ngrams,
            vec![ngram(b"abc"), ngram(b"bca"), ngram(b"cab"), ngram(b"abc")]
        );
    }

    #[test]
    fn test_query_ngrams_boundaries() {
        assert_eq!(query_ngrams(b"abc", NgramLength::Three).unwrap().len(), 1);
        assert_eq!(query_ngrams(b"abcd", NgramLength::Four).unwrap().len(), 1);
        assert!(matches!(
            query_ngrams(b"ab", NgramLength::Three),
            Err(IndexError::QueryTooShort { len: 2, ngram_length: 3 })
        ));
        assert!(matches!(
            query_ngrams(b"abc", NgramLength::Four),
            Err(IndexError::QueryTooShort { .. })
        ));
    }

    #[test]
    fn test_ngram_bitset() {
        let mut bitset = NgramBitset::new();

        assert!(!bitset.test_and_set(0x616263));
        assert!(bitset.test_and_set(0x616263));
        assert!(!bitset.test_and_set(0x626364));
        assert!(!bitset.test_and_set(0xFF_FFFF));

        assert_eq!(bitset.collect(), vec![0x616263, 0x626364, 0xFF_FFFF]);
    }
}
