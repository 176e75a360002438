pub mod buffer;
pub mod build;
pub mod catalog;
pub mod shard;
pub mod stats;
pub mod types;
pub mod writer;

pub use build::{build_index, build_index_with_options, BuildOptions, BuildSummary};
pub use catalog::{Catalog, OpenMode};
pub use shard::{Postings, ShardReader, ShardWriter};
pub use types::*;
pub use writer::{BuilderState, BuilderStats, IndexBuilder};
