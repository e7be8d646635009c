pub mod external_sort;
pub mod merge_join;
pub mod run_format;
pub mod util;

pub use external_sort::{ExternalSorter, SortError, SortStats, SortedStream, TupleSorter};
pub use merge_join::{MergeError, Side, StreamMerger};
pub use run_format::{BincodeRunFormat, RunFormat, RunWriter, TupleRunFormat};
pub use util::{EstimateSize, SortConfig};
