use std::io;
use std::mem::size_of;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::core::{Term, Tuple};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Estimated bytes of records buffered in memory across a sort
    pub memory_budget_bytes: usize,
    /// Upper bound on the number of run files a sized input is split into
    pub max_temp_files: usize,
    /// Parent of the per-sort scratch directories, system temp dir when unset
    pub temp_dir: Option<PathBuf>,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 256 * 1024 * 1024,
            max_temp_files: 64,
            temp_dir: None,
        }
    }
}

impl SortConfig {
    /// Estimated bytes buffered before a run is spilled.
    ///
    /// Half the budget, raised to `ceil(total / max_temp_files)` when the total
    /// input size is known so the run count stays bounded.
    pub fn batch_limit(&self, size_hint: Option<u64>) -> usize {
        let half_budget = (self.memory_budget_bytes / 2).max(1);
        match size_hint {
            Some(total) if self.max_temp_files > 0 => {
                let per_file = total.div_ceil(self.max_temp_files as u64);
                usize::try_from(per_file)
                    .unwrap_or(usize::MAX)
                    .max(half_budget)
            }
            _ => half_budget,
        }
    }
}

/// Approximate in-memory footprint of a record.
pub trait EstimateSize {
    fn estimated_size(&self) -> usize;
}

impl EstimateSize for Term {
    fn estimated_size(&self) -> usize {
        let heap = match self {
            Term::Uri(id) | Term::BlankNode(id) => id.len(),
            Term::Literal(literal) => {
                literal.lexical.len()
                    + literal.datatype.as_ref().map_or(0, String::len)
                    + literal.language.as_ref().map_or(0, String::len)
            }
        };
        size_of::<Term>() + heap
    }
}

impl EstimateSize for Tuple {
    fn estimated_size(&self) -> usize {
        let terms: usize = self.terms().iter().map(EstimateSize::estimated_size).sum();
        size_of::<Tuple>() + terms
    }
}

impl EstimateSize for String {
    fn estimated_size(&self) -> usize {
        size_of::<String>() + self.len()
    }
}

impl EstimateSize for Vec<u8> {
    fn estimated_size(&self) -> usize {
        size_of::<Vec<u8>>() + self.len()
    }
}

macro_rules! fixed_size {
    ($($ty:ty),*) => {
        $(impl EstimateSize for $ty {
            fn estimated_size(&self) -> usize {
                size_of::<$ty>()
            }
        })*
    };
}

fixed_size!(u32, u64, i32, i64, usize);

/// Creates a scratch directory removed again by [`release_scope`] or on drop.
pub fn create_scope(config: &SortConfig, prefix: &str) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match &config.temp_dir {
        Some(parent) => {
            std::fs::create_dir_all(parent)?;
            builder.tempdir_in(parent)
        }
        None => builder.tempdir(),
    }
}

/// Deletes a scratch directory, logging instead of failing.
pub fn release_scope(scope: TempDir) {
    let path = scope.path().to_path_buf();
    if let Err(error) = scope.close() {
        tracing::warn!(path = %path.display(), %error, "failed to delete temporary directory");
    }
}
