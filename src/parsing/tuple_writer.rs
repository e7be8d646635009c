use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::core::{write_term, Term, Tuple};

/// Writes tuples one per line, in the syntax
/// [`TupleReader`](super::tuple_parser::TupleReader) reads.
pub struct TupleWriter<W: Write> {
    writer: W,
    line: String,
    written: u64,
}

impl TupleWriter<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> TupleWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            line: String::with_capacity(256),
            written: 0,
        }
    }

    /// Writes one line. An empty slice writes nothing.
    pub fn write(&mut self, terms: &[Term]) -> io::Result<()> {
        if terms.is_empty() {
            return Ok(());
        }
        self.line.clear();
        for term in terms {
            write_term(&mut self.line, term).map_err(io::Error::other)?;
            self.line.push(' ');
        }
        self.line.push_str(".\n");
        self.writer.write_all(self.line.as_bytes())?;
        self.written += 1;
        Ok(())
    }

    pub fn write_tuple(&mut self, tuple: &Tuple) -> io::Result<()> {
        self.write(tuple.terms())
    }

    /// Number of lines written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flushes and hands back the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
