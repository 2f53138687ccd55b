pub mod hybrid;

pub use hybrid::{HybridSearcher, SearchMode};
