//! Out-of-core sorting.
//!
//! Records are buffered until their estimated size reaches the batch limit,
//! each batch is sorted and spilled to a run file inside a scratch directory,
//! and the runs are k-way merged back through a min-heap. The scratch
//! directory lives exactly as long as the [`SortedStream`] reading it.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::error::Error;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tempfile::TempDir;
use thiserror::Error;

use crate::core::Tuple;
use crate::storage::run_format::{RunFormat, RunWriter, TupleRunFormat};
use crate::storage::util::{create_scope, release_scope, EstimateSize, SortConfig};

#[derive(Error, Debug)]
pub enum SortError {
    #[error("I/O error on run file {}: {source}", path.display())]
    Run {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("input record {index} could not be read: {source}")]
    Input {
        index: u64,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortStats {
    pub records_in: u64,
    pub records_out: u64,
    pub runs: usize,
    pub batch_limit: usize,
}

/// Sorter of [`Tuple`] rows in their natural order, spilled as tuple lines.
pub type TupleSorter = ExternalSorter<Tuple, TupleOrder, TupleRunFormat>;

type TupleOrder = fn(&Tuple, &Tuple) -> Ordering;

impl TupleSorter {
    pub fn for_tuples(config: SortConfig) -> Self {
        ExternalSorter::new(config, Ord::cmp as TupleOrder, TupleRunFormat::new())
    }
}

/// In-memory batch waiting to be spilled
struct SortBuffer<T> {
    records: Vec<T>,
    total_bytes: usize,
}

impl<T: EstimateSize> SortBuffer<T> {
    fn new() -> Self {
        Self {
            records: Vec::new(),
            total_bytes: 0,
        }
    }

    fn push(&mut self, record: T) {
        self.total_bytes += record.estimated_size();
        self.records.push(record);
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn drain(&mut self) -> Vec<T> {
        self.total_bytes = 0;
        std::mem::take(&mut self.records)
    }
}

pub struct ExternalSorter<T, C, F> {
    config: SortConfig,
    compare: Rc<C>,
    format: F,
    distinct: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T, C, F> ExternalSorter<T, C, F>
where
    T: EstimateSize,
    C: Fn(&T, &T) -> Ordering,
    F: RunFormat<T>,
{
    pub fn new(config: SortConfig, compare: C, format: F) -> Self {
        Self {
            config,
            compare: Rc::new(compare),
            format,
            distinct: false,
            _record: PhantomData,
        }
    }

    /// Drops records comparator-equal to the previously emitted one.
    #[must_use]
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    /// Sorts `input`, returning a stream that owns the spilled runs.
    ///
    /// `size_hint` is the estimated total input size in bytes, when known.
    pub fn sort<I, E>(
        &self,
        input: I,
        size_hint: Option<u64>,
    ) -> Result<SortedStream<T, C, F::Reader>, SortError>
    where
        I: IntoIterator<Item = Result<T, E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let batch_limit = self.config.batch_limit(size_hint);
        let scope = create_scope(&self.config, "quadfuse-sort-")?;
        let mut stats = SortStats {
            batch_limit,
            ..SortStats::default()
        };
        let mut buffer = SortBuffer::new();
        let mut runs = Vec::new();

        for (index, record) in input.into_iter().enumerate() {
            let record = record.map_err(|e| SortError::Input {
                index: index as u64,
                source: e.into(),
            })?;
            stats.records_in += 1;
            buffer.push(record);
            if buffer.total_bytes >= batch_limit {
                runs.push(self.spill(buffer.drain(), scope.path(), runs.len())?);
            }
        }
        if !buffer.is_empty() {
            runs.push(self.spill(buffer.drain(), scope.path(), runs.len())?);
        }
        stats.runs = runs.len();

        tracing::debug!(
            records = stats.records_in,
            runs = stats.runs,
            batch_limit,
            "input spilled to sorted runs"
        );
        self.open_stream(runs, Some(scope), stats, false)
    }

    /// Sorts `input` into `destination`, which is written in the run format.
    pub fn sort_to_file<I, E>(
        &self,
        input: I,
        size_hint: Option<u64>,
        destination: &Path,
    ) -> Result<SortStats, SortError>
    where
        I: IntoIterator<Item = Result<T, E>>,
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let mut stream = self.sort(input, size_hint)?;
        let run_error = |source| SortError::Run {
            path: destination.to_path_buf(),
            source,
        };

        let mut writer = self.format.create(destination).map_err(run_error)?;
        for record in &mut stream {
            writer.write(&record?).map_err(run_error)?;
        }
        writer.finish().map_err(run_error)?;
        Ok(stream.stats())
    }

    /// K-way merges files that are each already sorted. The files are not removed.
    pub fn merge_sorted<P: AsRef<Path>>(
        &self,
        paths: &[P],
    ) -> Result<SortedStream<T, C, F::Reader>, SortError> {
        let runs: Vec<PathBuf> = paths
            .iter()
            .map(|path| path.as_ref().to_path_buf())
            .collect();
        let stats = SortStats {
            runs: runs.len(),
            ..SortStats::default()
        };
        self.open_stream(runs, None, stats, true)
    }

    fn spill(
        &self,
        mut records: Vec<T>,
        directory: &Path,
        run: usize,
    ) -> Result<PathBuf, SortError> {
        let compare = &*self.compare;
        records.sort_by(|a, b| compare(a, b));
        if self.distinct {
            records.dedup_by(|a, b| compare(a, b) == Ordering::Equal);
        }

        let path = directory.join(format!("run-{run:05}"));
        let run_error = |source| SortError::Run {
            path: path.clone(),
            source,
        };
        let mut writer = self.format.create(&path).map_err(run_error)?;
        for record in &records {
            writer.write(record).map_err(run_error)?;
        }
        writer.finish().map_err(run_error)?;

        tracing::debug!(run, records = records.len(), path = %path.display(), "spilled sorted run");
        Ok(path)
    }

    fn open_stream(
        &self,
        runs: Vec<PathBuf>,
        scope: Option<TempDir>,
        stats: SortStats,
        count_input: bool,
    ) -> Result<SortedStream<T, C, F::Reader>, SortError> {
        let mut readers = Vec::with_capacity(runs.len());
        for path in runs {
            let reader = self.format.open(&path).map_err(|source| SortError::Run {
                path: path.clone(),
                source,
            })?;
            readers.push((path, reader));
        }

        let mut stream = SortedStream {
            heap: BinaryHeap::with_capacity(readers.len()),
            readers,
            compare: Rc::clone(&self.compare),
            distinct: self.distinct,
            count_input,
            stats,
            failed: false,
            scope,
        };
        for run in 0..stream.readers.len() {
            stream.refill(run)?;
        }
        Ok(stream)
    }
}

/// Heap entry of the k-way merge; orders by comparator, then by run index.
struct HeapEntry<T, C> {
    record: T,
    run: usize,
    compare: Rc<C>,
}

impl<T, C: Fn(&T, &T) -> Ordering> Ord for HeapEntry<T, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.compare)(&self.record, &other.record).then_with(|| self.run.cmp(&other.run))
    }
}

impl<T, C: Fn(&T, &T) -> Ordering> PartialOrd for HeapEntry<T, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T, C: Fn(&T, &T) -> Ordering> PartialEq for HeapEntry<T, C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T, C: Fn(&T, &T) -> Ordering> Eq for HeapEntry<T, C> {}

/// Sorted output of an [`ExternalSorter`].
///
/// Dropping the stream deletes the run files it owns.
pub struct SortedStream<T, C, R> {
    readers: Vec<(PathBuf, R)>,
    heap: BinaryHeap<Reverse<HeapEntry<T, C>>>,
    compare: Rc<C>,
    distinct: bool,
    count_input: bool,
    stats: SortStats,
    failed: bool,
    // Declared last: readers close before the directory is removed.
    scope: Option<TempDir>,
}

impl<T, C, R> SortedStream<T, C, R>
where
    C: Fn(&T, &T) -> Ordering,
    R: Iterator<Item = io::Result<T>>,
{
    pub fn stats(&self) -> SortStats {
        self.stats
    }

    fn refill(&mut self, run: usize) -> Result<(), SortError> {
        let (path, reader) = &mut self.readers[run];
        match reader.next() {
            Some(Ok(record)) => {
                if self.count_input {
                    self.stats.records_in += 1;
                }
                let compare = Rc::clone(&self.compare);
                self.heap.push(Reverse(HeapEntry {
                    record,
                    run,
                    compare,
                }));
                Ok(())
            }
            Some(Err(source)) => Err(SortError::Run {
                path: path.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    fn is_duplicate(&self, record: &T) -> bool {
        let compare = &*self.compare;
        self.heap
            .peek()
            .is_some_and(|Reverse(next)| compare(&next.record, record).is_eq())
    }

    fn next_record(&mut self) -> Result<Option<T>, SortError> {
        let Some(Reverse(entry)) = self.heap.pop() else {
            return Ok(None);
        };
        self.refill(entry.run)?;

        if self.distinct {
            while self.is_duplicate(&entry.record) {
                if let Some(Reverse(duplicate)) = self.heap.pop() {
                    self.refill(duplicate.run)?;
                }
            }
        }

        self.stats.records_out += 1;
        Ok(Some(entry.record))
    }
}

impl<T, C, R> Iterator for SortedStream<T, C, R>
where
    C: Fn(&T, &T) -> Ordering,
    R: Iterator<Item = io::Result<T>>,
{
    type Item = Result<T, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(error) => {
                self.failed = true;
                Some(Err(error))
            }
        }
    }
}

impl<T, C, R> Drop for SortedStream<T, C, R> {
    fn drop(&mut self) {
        self.heap.clear();
        self.readers.clear();
        if let Some(scope) = self.scope.take() {
            release_scope(scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Term;
    use crate::storage::run_format::BincodeRunFormat;

    fn tiny_config(dir: &Path) -> SortConfig {
        SortConfig {
            memory_budget_bytes: 64,
            max_temp_files: 8,
            temp_dir: Some(dir.to_path_buf()),
        }
    }

    fn ok<T>(values: Vec<T>) -> impl Iterator<Item = Result<T, io::Error>> {
        values.into_iter().map(Ok)
    }

    #[test]
    fn test_sorts_across_many_runs() {
        let dir = tempfile::tempdir().unwrap();
        let sorter =
            ExternalSorter::new(tiny_config(dir.path()), u64::cmp, BincodeRunFormat::new());
        let input: Vec<u64> = (0..200).map(|i| (i * 7919) % 211).collect();

        let mut stream = sorter.sort(ok(input.clone()), None).unwrap();
        let sorted: Vec<u64> = stream.by_ref().map(Result::unwrap).collect();
        let mut expected = input;
        expected.sort_unstable();

        assert_eq!(sorted, expected);
        assert!(stream.stats().runs > 1);
        assert_eq!(stream.stats().records_out, 200);
    }

    #[test]
    fn test_distinct_removes_duplicates_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let sorter =
            ExternalSorter::new(tiny_config(dir.path()), u64::cmp, BincodeRunFormat::new())
                .distinct(true);
        let input: Vec<u64> = (0..100).map(|i| i % 10).collect();

        let sorted: Vec<u64> = sorter
            .sort(ok(input), None)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_custom_comparator_orders_descending() {
        let dir = tempfile::tempdir().unwrap();
        let descending = |a: &u64, b: &u64| b.cmp(a);
        let sorter =
            ExternalSorter::new(tiny_config(dir.path()), descending, BincodeRunFormat::new());
        let sorted: Vec<u64> = sorter
            .sort(ok(vec![3, 9, 1, 5]), None)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(sorted, vec![9, 5, 3, 1]);
    }

    #[test]
    fn test_dropping_stream_removes_runs() {
        let dir = tempfile::tempdir().unwrap();
        let sorter = TupleSorter::for_tuples(tiny_config(dir.path()));
        let rows = (0..50)
            .map(|i| Tuple::new(vec![Term::uri(format!("http://x/{i}"))]))
            .collect();

        let stream = sorter.sort(ok(rows), None).unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        drop(stream);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_input_error_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let sorter =
            ExternalSorter::new(tiny_config(dir.path()), u64::cmp, BincodeRunFormat::new());
        let input = vec![Ok(1u64), Err(io::Error::other("broken source"))];

        let error = sorter.sort(input, None).err().unwrap();
        assert!(matches!(error, SortError::Input { index: 1, .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sorter = TupleSorter::for_tuples(tiny_config(dir.path()));
        let mut stream = sorter.sort(ok(Vec::<Tuple>::new()), None).unwrap();
        assert!(stream.next().is_none());
        assert_eq!(stream.stats().runs, 0);
    }
}
