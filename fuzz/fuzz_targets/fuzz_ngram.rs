#![no_main]

use bytegram::index::NgramLength;
use bytegram::utils::{query_ngrams, NGramExtractor};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for len in [NgramLength::Three, NgramLength::Four] {
        let ngrams = NGramExtractor::new(len).extract(data).unwrap();
        assert!(ngrams.windows(2).all(|w| w[0] < w[1]));
        assert!(ngrams.iter().all(|&n| (n as u64) < len.domain()));

        // Every query window of the content is among its distinct n-grams
        if let Ok(windows) = query_ngrams(data, len) {
            assert!(windows.iter().all(|w| ngrams.binary_search(w).is_ok()));
        }
    }
});
