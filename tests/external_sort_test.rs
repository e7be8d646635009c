//! External sort and merge join integration tests
//!
//! Inputs are sized so that every sort spills several runs to disk.

use quadfuse::core::{Term, Tuple};
use quadfuse::parsing::{TupleReader, TupleWriter};
use quadfuse::storage::{BincodeRunFormat, ExternalSorter, SortConfig, StreamMerger, TupleSorter};
use std::fs;
use std::io;
use std::path::Path;

fn config(dir: &Path, budget: usize) -> SortConfig {
    SortConfig {
        memory_budget_bytes: budget,
        max_temp_files: 1024,
        temp_dir: Some(dir.to_path_buf()),
    }
}

/// Deterministic pseudo-random numbers.
fn numbers(count: usize, modulus: u64) -> Vec<u64> {
    let mut state = 0x2545_f491_4f6c_dd1d_u64;
    (0..count)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 33) % modulus
        })
        .collect()
}

fn row(key: u64, value: u64) -> Tuple {
    let key = Term::uri(format!("http://ex.org/r{key:04}"));
    Tuple::new(vec![key, Term::literal(value.to_string())])
}

fn records<T>(items: impl IntoIterator<Item = T>) -> impl Iterator<Item = io::Result<T>> {
    items.into_iter().map(Ok)
}

fn sort_into(sorter: &TupleSorter, rows: Vec<Tuple>, path: &Path) {
    sorter.sort_to_file(records(rows), None, path).unwrap();
}

#[test]
fn test_sorted_output_is_a_permutation_of_the_input() {
    let dir = tempfile::tempdir().unwrap();
    let input: Vec<Tuple> = numbers(2_000, 300)
        .into_iter()
        .zip(0..)
        .map(|(k, v)| row(k, v % 7))
        .collect();

    let sorter = TupleSorter::for_tuples(config(dir.path(), 16 * 1024));
    let mut stream = sorter.sort(records(input.clone()), None).unwrap();
    let output: Vec<Tuple> = stream.by_ref().map(Result::unwrap).collect();

    assert!(stream.stats().runs > 1);
    assert!(output.windows(2).all(|pair| pair[0] <= pair[1]));
    let mut expected = input;
    expected.sort();
    assert_eq!(output, expected);
}

#[test]
fn test_distinct_sort_removes_duplicates_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let input: Vec<Tuple> = numbers(3_000, 50)
        .into_iter()
        .map(|k| row(k, k % 3))
        .collect();

    let sorter = TupleSorter::for_tuples(config(dir.path(), 8 * 1024)).distinct(true);
    let stream = sorter.sort(records(input.clone()), None).unwrap();
    let output: Vec<Tuple> = stream.map(Result::unwrap).collect();

    let mut expected = input;
    expected.sort();
    expected.dedup();
    assert_eq!(output, expected);
}

#[test]
fn test_custom_comparator_with_bincode_runs() {
    let dir = tempfile::tempdir().unwrap();
    let input = numbers(5_000, 1_000_000);

    let descending = |a: &u64, b: &u64| b.cmp(a);
    let format = BincodeRunFormat::<u64>::new();
    let sorter = ExternalSorter::new(config(dir.path(), 4 * 1024), descending, format);
    let mut stream = sorter.sort(records(input.iter().copied()), None).unwrap();
    let output: Vec<u64> = stream.by_ref().map(Result::unwrap).collect();

    let mut expected = input;
    expected.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(output, expected);
    assert_eq!(stream.stats().records_in, 5_000);
    assert_eq!(stream.stats().records_out, 5_000);
}

#[test]
fn test_scratch_files_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let input: Vec<Tuple> = numbers(1_000, 100).into_iter().map(|k| row(k, k)).collect();

    let sorter = TupleSorter::for_tuples(config(dir.path(), 4 * 1024));
    let mut stream = sorter.sort(records(input), None).unwrap();
    assert!(stream.next().is_some());
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

    drop(stream);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_input_error_aborts_the_sort() {
    let dir = tempfile::tempdir().unwrap();
    let broken = io::Error::new(io::ErrorKind::InvalidData, "broken record");
    let input = vec![Ok(row(1, 1)), Err(broken)];

    let sorter = TupleSorter::for_tuples(config(dir.path(), 4 * 1024));
    let err = sorter.sort(input, None).err().unwrap();
    assert!(err.to_string().contains("broken record"));
}

#[test]
fn test_sorted_files_join_on_their_first_column() {
    let dir = tempfile::tempdir().unwrap();
    let left_path = dir.path().join("left.tmp");
    let right_path = dir.path().join("right.tmp");
    let sorter = TupleSorter::for_tuples(config(dir.path(), 4 * 1024));

    // left: r0000..r0009 once each, right: even keys twice
    let left: Vec<Tuple> = (0..10).rev().map(|k| row(k, 100 + k)).collect();
    let right: Vec<Tuple> = (0..10)
        .filter(|k| k % 2 == 0)
        .flat_map(|k| [row(k, 1), row(k, 2)])
        .collect();
    sort_into(&sorter, left, &left_path);
    sort_into(&sorter, right, &right_path);

    let joined_path = dir.path().join("joined.tmp");
    let mut writer = TupleWriter::create(&joined_path).unwrap();
    let left = TupleReader::open(&left_path).unwrap();
    let right = TupleReader::open(&right_path).unwrap();
    let merger = StreamMerger::new(left, right, |l: &Tuple, r: &Tuple| {
        let mut terms = l.terms().to_vec();
        terms.push(r.terms()[1].clone());
        Ok(Tuple::new(terms))
    });
    let emitted = merger.write_to(&mut writer).unwrap();
    writer.finish().unwrap();

    assert_eq!(emitted, 10);
    let reader = TupleReader::open(&joined_path).unwrap();
    let rows: Vec<Tuple> = reader.map(Result::unwrap).collect();
    let odd = Term::uri("http://ex.org/r0001");
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|row| row.len() == 3));
    assert_eq!(rows[0].terms()[1], Term::literal("100"));
    assert!(!rows.iter().any(|row| row.terms()[0] == odd));
}
