pub mod executor;

pub use executor::{intersect_sorted, search, QueryEngine};
