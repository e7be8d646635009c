//! # quadfuse
//!
//! Out-of-core fusion of RDF quads gathered from many sources.
//!
//! Identifiers linked by `owl:sameAs` are collapsed onto one canonical
//! identifier per class, every input quad is rewritten into a sorted stream
//! of canonical statements on disk, and statements about the same subject
//! and predicate are grouped into conflict clusters that a per-predicate
//! resolution policy turns into the fused output. Memory use is bounded by
//! the sort budget rather than by the size of the input.
//!
//! ## Example
//!
//! ```no_run
//! use quadfuse::config::FusionConfig;
//! use quadfuse::fusion::FusionExecutor;
//!
//! fn example() -> quadfuse::Result<()> {
//!     let config = FusionConfig::from_file("fusion.json")?;
//!     let stats = FusionExecutor::new(config).run()?;
//!     println!("{} statements written", stats.statements_written);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::new_without_default)]

/// Core data structures and types
pub mod core;

/// Configuration of a fusion run
pub mod config;

pub mod error;

/// Same-as equivalence classes and canonical identifiers
pub mod mapping;

/// The line-oriented tuple format of intermediate files
pub mod parsing;

/// External sorting and merge joins over tuple files
pub mod storage;

/// Quad sources and same-as link loading
pub mod sources;

pub mod fusion;

// Re-export commonly used types
pub use error::{FusionError, Result, Stage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FusionError::Cancelled;
        assert_eq!(format!("{}", err), "fusion run was cancelled");
        assert_eq!(err.stage(), None);
    }
}
