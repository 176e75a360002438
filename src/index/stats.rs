use crate::error::{IndexError, Result};
use crate::index::catalog::Catalog;
use crate::index::shard::ShardReader;
use crate::index::types::{IndexPaths, NgramLength, ShardId};
use std::fmt;
use std::fs;
use std::path::Path;

/// Summary of one index as stored on disk
#[derive(Debug, Clone)]
pub struct IndexStats {
    pub paths: IndexPaths,
    pub version: u8,
    pub ngram_length: NgramLength,
    pub max_filename_length: u16,
    pub file_count: u32,
    pub catalog_bytes: u64,
    pub shards: Vec<ShardStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardStats {
    pub shard: ShardId,
    pub declared_files: u32,
    pub index_bytes: u64,
    pub postings_bytes: u64,
}

impl IndexStats {
    pub fn total_bytes(&self) -> u64 {
        self.catalog_bytes
            + self
                .shards
                .iter()
                .map(|s| s.index_bytes + s.postings_bytes)
                .sum::<u64>()
    }
}

/// Gather catalog and per-shard statistics for the index at `base`
pub fn collect_stats(base: &Path) -> Result<IndexStats> {
    let paths = IndexPaths::new(base);
    let catalog_path = paths.catalog();

    let header = Catalog::read_header(&catalog_path)?;
    let ngram_length = NgramLength::try_from(header.ngram_length)?;
    let catalog_bytes = fs::metadata(&catalog_path)
        .map_err(|e| IndexError::io(&catalog_path, e))?
        .len();

    let shards = (0..header.shard_count)
        .map(|shard| {
            let reader = ShardReader::open(&paths, shard, ngram_length)?;
            Ok(ShardStats {
                shard,
                declared_files: reader.declared_file_count(),
                index_bytes: reader.index_len(),
                postings_bytes: reader.postings_len(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(IndexStats {
        paths,
        version: header.version,
        ngram_length,
        max_filename_length: header.max_filename_length,
        file_count: header.file_count,
        catalog_bytes,
        shards,
    })
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index Statistics")?;
        writeln!(f, "================")?;
        writeln!(f)?;
        writeln!(f, "Base name:        {}", self.paths.base().display())?;
        writeln!(f, "Format version:   {}", self.version)?;
        writeln!(f, "N-gram length:    {}", self.ngram_length)?;
        writeln!(f, "Filename slots:   {} bytes", self.max_filename_length)?;
        writeln!(f, "File count:       {}", self.file_count)?;
        writeln!(f, "Shard count:      {}", self.shards.len())?;

        if !self.shards.is_empty() {
            writeln!(f)?;
            writeln!(f, "Shards:")?;
            for shard in &self.shards {
                writeln!(
                    f,
                    "  {:08}  {:>8} files  index {:>10}  postings {:>10}",
                    shard.shard,
                    shard.declared_files,
                    format_size(shard.index_bytes),
                    format_size(shard.postings_bytes)
                )?;
            }
        }

        writeln!(f)?;
        write!(f, "Index size:       {}", format_size(self.total_bytes()))
    }
}

/// Format byte size to human readable
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
