use crate::error::Result;
use crate::index::types::{FileId, NGram, NgramLength, FILE_ID_SIZE};
use std::collections::BTreeMap;

/// Accounted cost of one buffered file ID
pub const ENTRY_BYTES: u64 = FILE_ID_SIZE as u64;

/// Accounted cost of opening a postings list for an n-gram not yet buffered
pub const LIST_BYTES: u64 = size_of::<Vec<FileId>>() as u64;

/// Pending postings lists, keyed by n-gram
enum Lists {
    /// 3-byte n-grams: one slot per possible value. A slot holds
    /// 0 when empty, otherwise an index + 1 into `lists`.
    Dense {
        slots: Vec<u32>,
        lists: Vec<Vec<FileId>>,
    },
    /// 4-byte n-grams: only occupied values are stored
    Sparse(BTreeMap<NGram, Vec<FileId>>),
}

/// In-memory postings accumulated between flushes.
///
/// File IDs must be pushed in ascending order, which keeps every list
/// sorted without a sort at flush time.
pub struct WriteBuffer {
    ngram_length: NgramLength,
    lists: Lists,
    usage: u64,
    entries: u64,
}

impl WriteBuffer {
    pub fn new(ngram_length: NgramLength) -> Self {
        let lists = match ngram_length {
            NgramLength::Three => Lists::Dense {
                slots: vec![0; ngram_length.domain() as usize],
                lists: Vec::new(),
            },
            NgramLength::Four => Lists::Sparse(BTreeMap::new()),
        };

        Self {
            ngram_length,
            lists,
            usage: 0,
            entries: 0,
        }
    }

    /// Append `file_id` to the list of every n-gram in `ngrams`.
    ///
    /// All values are range-checked before anything is buffered, so a
    /// rejected call leaves the buffer untouched.
    pub fn push(&mut self, ngrams: &[NGram], file_id: FileId) -> Result<()> {
        for &ngram in ngrams {
            self.ngram_length.check(ngram as u64)?;
        }

        let mut added = 0u64;
        match &mut self.lists {
            Lists::Dense { slots, lists } => {
                for &ngram in ngrams {
                    let slot = &mut slots[ngram as usize];
                    if *slot == 0 {
                        lists.push(Vec::new());
                        *slot = lists.len() as u32;
                        added += LIST_BYTES;
                    }
                    push_sorted(&mut lists[*slot as usize - 1], file_id);
                }
            }
            Lists::Sparse(map) => {
                for &ngram in ngrams {
                    let list = map.entry(ngram).or_insert_with(|| {
                        added += LIST_BYTES;
                        Vec::new()
                    });
                    push_sorted(list, file_id);
                }
            }
        }

        self.entries += ngrams.len() as u64;
        self.usage += added + ngrams.len() as u64 * ENTRY_BYTES;
        Ok(())
    }

    /// Accounted memory held by buffered postings
    pub fn usage(&self) -> u64 {
        self.usage
    }

    /// Buffered (n-gram, file ID) pairs
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Number of n-grams with a non-empty list
    pub fn distinct_ngrams(&self) -> usize {
        match &self.lists {
            Lists::Dense { lists, .. } => lists.len(),
            Lists::Sparse(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Visit every non-empty list in ascending n-gram order
    pub fn for_each_list<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(NGram, &[FileId]) -> Result<()>,
    {
        match &self.lists {
            Lists::Dense { slots, lists } => {
                for (ngram, &slot) in slots.iter().enumerate() {
                    if slot != 0 {
                        f(ngram as NGram, &lists[slot as usize - 1])?;
                    }
                }
            }
            Lists::Sparse(map) => {
                for (&ngram, list) in map {
                    f(ngram, list)?;
                }
            }
        }
        Ok(())
    }

    /// Drop every buffered list and reset the usage counter
    pub fn clear(&mut self) {
        match &mut self.lists {
            Lists::Dense { slots, lists } => {
                slots.fill(0);
                // Release list storage instead of keeping the peak allocation
                *lists = Vec::new();
            }
            Lists::Sparse(map) => map.clear(),
        }
        self.usage = 0;
        self.entries = 0;
    }
}

/// A file contributes each n-gram once; repeated pushes of the same ID collapse
#[inline]
fn push_sorted(list: &mut Vec<FileId>, file_id: FileId) {
    match list.last() {
        Some(&last) if last >= file_id => {
            debug_assert_eq!(last, file_id, "file IDs must be pushed in ascending order");
        }
        _ => list.push(file_id),
    }
}
