//! On-disk encodings of sorted runs.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::marker::PhantomData;
use std::ops::RangeInclusive;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::Tuple;
use crate::parsing::{ParseError, TupleReader, TupleWriter};

/// Appends records to one run file.
pub trait RunWriter<T> {
    fn write(&mut self, record: &T) -> io::Result<()>;

    /// Flushes the run; records written before are durable afterwards.
    fn finish(self) -> io::Result<()>;
}

/// How records of type `T` are spilled to and read back from disk.
pub trait RunFormat<T> {
    type Writer: RunWriter<T>;
    type Reader: Iterator<Item = io::Result<T>>;

    fn create(&self, path: &Path) -> io::Result<Self::Writer>;
    fn open(&self, path: &Path) -> io::Result<Self::Reader>;
}

/// Runs as tuple lines.
#[derive(Debug, Clone, Default)]
pub struct TupleRunFormat {
    arity: Option<RangeInclusive<usize>>,
}

impl TupleRunFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads reject rows whose length is not `arity`.
    pub fn with_arity(arity: usize) -> Self {
        Self {
            arity: Some(arity..=arity),
        }
    }
}

impl RunWriter<Tuple> for TupleWriter<BufWriter<File>> {
    fn write(&mut self, record: &Tuple) -> io::Result<()> {
        self.write_tuple(record)
    }

    fn finish(self) -> io::Result<()> {
        TupleWriter::finish(self).map(drop)
    }
}

pub struct TupleRunReader {
    inner: TupleReader<BufReader<File>>,
}

impl Iterator for TupleRunReader {
    type Item = io::Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|row| {
            row.map_err(|error| match error {
                ParseError::Io { source, .. } => source,
                syntax => io::Error::new(io::ErrorKind::InvalidData, syntax),
            })
        })
    }
}

impl RunFormat<Tuple> for TupleRunFormat {
    type Writer = TupleWriter<BufWriter<File>>;
    type Reader = TupleRunReader;

    fn create(&self, path: &Path) -> io::Result<Self::Writer> {
        TupleWriter::create(path)
    }

    fn open(&self, path: &Path) -> io::Result<Self::Reader> {
        let mut inner = TupleReader::open(path)?;
        if let Some(arity) = &self.arity {
            inner = inner.with_arity(arity.clone());
        }
        Ok(TupleRunReader { inner })
    }
}

/// Runs as consecutive bincode records, for any serde type.
pub struct BincodeRunFormat<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> BincodeRunFormat<T> {
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> Default for BincodeRunFormat<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BincodeRunWriter<T> {
    writer: BufWriter<File>,
    _record: PhantomData<fn(&T)>,
}

impl<T: Serialize> RunWriter<T> for BincodeRunWriter<T> {
    fn write(&mut self, record: &T) -> io::Result<()> {
        bincode::serialize_into(&mut self.writer, record)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn finish(mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

pub struct BincodeRunReader<T> {
    reader: BufReader<File>,
    failed: bool,
    _record: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Iterator for BincodeRunReader<T> {
    type Item = io::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.fill_buf() {
            Ok([]) => return None,
            Ok(_) => {}
            Err(error) => {
                self.failed = true;
                return Some(Err(error));
            }
        }
        let record = bincode::deserialize_from(&mut self.reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        self.failed = record.is_err();
        Some(record)
    }
}

impl<T: Serialize + DeserializeOwned> RunFormat<T> for BincodeRunFormat<T> {
    type Writer = BincodeRunWriter<T>;
    type Reader = BincodeRunReader<T>;

    fn create(&self, path: &Path) -> io::Result<Self::Writer> {
        Ok(BincodeRunWriter {
            writer: BufWriter::new(File::create(path)?),
            _record: PhantomData,
        })
    }

    fn open(&self, path: &Path) -> io::Result<Self::Reader> {
        Ok(BincodeRunReader {
            reader: BufReader::new(File::open(path)?),
            failed: false,
            _record: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Term;

    #[test]
    fn test_bincode_run_reads_back_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run-0");
        let format = BincodeRunFormat::<(u64, String)>::new();

        let mut writer = format.create(&path).unwrap();
        writer.write(&(2, "b".to_string())).unwrap();
        writer.write(&(1, "a".to_string())).unwrap();
        writer.finish().unwrap();

        let records: Vec<_> = format.open(&path).unwrap().map(Result::unwrap).collect();
        assert_eq!(records, vec![(2, "b".to_string()), (1, "a".to_string())]);
    }

    #[test]
    fn test_tuple_run_rejects_wrong_arity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run-0");
        let mut writer = TupleRunFormat::new().create(&path).unwrap();
        RunWriter::write(&mut writer, &Tuple::new(vec![Term::uri("http://a")])).unwrap();
        RunWriter::finish(writer).unwrap();

        let mut reader = TupleRunFormat::with_arity(2).open(&path).unwrap();
        let error = reader.next().unwrap().unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }
}
