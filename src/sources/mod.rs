pub mod file_source;
pub mod quad_source;
pub mod retry;
pub mod same_as;

pub use file_source::{FileQuadSource, SourceConfig, SourceFormat};
pub use quad_source::{MemoryQuadSource, QuadSource, SourceError};
pub use retry::RetryPolicy;
pub use same_as::{load_same_as_file, SameAsLoader};
