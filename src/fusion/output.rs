//! Sinks for resolved statements.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::mem;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use oxigraph::io::{RdfFormat, RdfSerializer, WriterQuadSerializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{to_oxigraph_quad, Identifier, ResolvedStatement, Term};
use crate::parsing::TupleWriter;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid namespace for prefix {prefix}: {message}")]
    Prefix { prefix: String, message: String },
    #[error("prefix {0} declared after the first statement")]
    LatePrefix(String),
    #[error("cannot write statement metadata: {0}")]
    Json(#[from] serde_json::Error),
    #[error("output sink is closed")]
    Closed,
    #[error("cannot create {}: {source}", path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Destination of resolved statements: `start`, then `write*`, then `close`.
pub trait OutputSink {
    fn start(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    /// Declares a namespace prefix; sinks without prefix support ignore it.
    fn add_prefix(&mut self, _prefix: &str, _namespace: &str) -> Result<(), OutputError> {
        Ok(())
    }

    fn write(&mut self, statement: &ResolvedStatement) -> Result<(), OutputError>;

    /// Flushes everything written. Writing after close fails.
    fn close(&mut self) -> Result<(), OutputError>;
}

/// N-Quads through the tuple writer.
pub struct NQuadsSink<W: Write> {
    writer: Option<TupleWriter<W>>,
}

impl<W: Write> NQuadsSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(TupleWriter::new(writer)),
        }
    }
}

impl<W: Write> OutputSink for NQuadsSink<W> {
    fn write(&mut self, statement: &ResolvedStatement) -> Result<(), OutputError> {
        let writer = self.writer.as_mut().ok_or(OutputError::Closed)?;
        let quad = &statement.quad;
        let subject = quad.subject().clone();
        let predicate = Term::uri(quad.predicate());
        let object = quad.object().clone();
        match quad.graph() {
            Some(graph) => writer.write(&[subject, predicate, object, Term::uri(graph)])?,
            None => writer.write(&[subject, predicate, object])?,
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?.flush()?;
        }
        Ok(())
    }
}

enum TriGState<W: Write> {
    Pending { serializer: RdfSerializer, out: W },
    Writing(WriterQuadSerializer<W>),
    Closed,
}

/// TriG through the Oxigraph serializer. Prefixes must be declared before the
/// first statement.
pub struct TriGSink<W: Write> {
    state: TriGState<W>,
}

impl<W: Write> TriGSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            state: TriGState::Pending {
                serializer: RdfSerializer::from_format(RdfFormat::TriG),
                out: writer,
            },
        }
    }

    fn serializer(&mut self) -> Result<&mut WriterQuadSerializer<W>, OutputError> {
        if let TriGState::Pending { .. } = self.state {
            let pending = mem::replace(&mut self.state, TriGState::Closed);
            if let TriGState::Pending { serializer, out } = pending {
                self.state = TriGState::Writing(serializer.for_writer(out));
            }
        }
        match &mut self.state {
            TriGState::Writing(serializer) => Ok(serializer),
            _ => Err(OutputError::Closed),
        }
    }
}

impl<W: Write> OutputSink for TriGSink<W> {
    fn add_prefix(&mut self, prefix: &str, namespace: &str) -> Result<(), OutputError> {
        match mem::replace(&mut self.state, TriGState::Closed) {
            TriGState::Pending { serializer, out } => {
                let serializer = serializer
                    .with_prefix(prefix, namespace)
                    .map_err(|e| OutputError::Prefix {
                        prefix: prefix.to_string(),
                        message: e.to_string(),
                    })?;
                self.state = TriGState::Pending { serializer, out };
                Ok(())
            }
            TriGState::Writing(serializer) => {
                self.state = TriGState::Writing(serializer);
                Err(OutputError::LatePrefix(prefix.to_string()))
            }
            TriGState::Closed => Err(OutputError::Closed),
        }
    }

    fn write(&mut self, statement: &ResolvedStatement) -> Result<(), OutputError> {
        let quad = to_oxigraph_quad(&statement.quad);
        self.serializer()?.serialize_quad(&quad)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        let serializer = match mem::replace(&mut self.state, TriGState::Closed) {
            TriGState::Pending { serializer, out } => serializer.for_writer(out),
            TriGState::Writing(serializer) => serializer,
            TriGState::Closed => return Ok(()),
        };
        serializer.finish()?.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct MetadataRecord<'a> {
    quad: String,
    quality: f64,
    source_graphs: &'a BTreeSet<Identifier>,
}

/// One JSON object per line with the quality and provenance of each statement.
pub struct MetadataSink<W: Write> {
    writer: Option<W>,
}

impl<W: Write> MetadataSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
        }
    }
}

impl<W: Write> OutputSink for MetadataSink<W> {
    fn write(&mut self, statement: &ResolvedStatement) -> Result<(), OutputError> {
        let writer = self.writer.as_mut().ok_or(OutputError::Closed)?;
        let record = MetadataRecord {
            quad: statement.quad.to_string(),
            quality: statement.quality,
            source_graphs: &statement.source_graphs,
        };
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    NQuads,
    TriG,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::NQuads => "nquads",
            OutputFormat::TriG => "trig",
        })
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nquads" | "nq" => Ok(OutputFormat::NQuads),
            "trig" => Ok(OutputFormat::TriG),
            other => Err(format!("unknown format `{other}`, expected nquads or trig")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Standard output when unset
    pub path: Option<PathBuf>,
    pub format: OutputFormat,
    /// Prefix -> namespace IRI
    pub prefixes: BTreeMap<String, Identifier>,
    pub metadata_path: Option<PathBuf>,
    /// File receiving the canonical identifier of every class
    pub canonical_uris_path: Option<PathBuf>,
    /// File receiving `owl:sameAs` links from canonical to alternative identifiers
    pub same_as_path: Option<PathBuf>,
    pub max_statements: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutputStats {
    pub written: u64,
    pub dropped: u64,
}

/// Fans resolved statements out to every configured sink.
pub struct OutputWriter {
    sinks: Vec<Box<dyn OutputSink>>,
    prefixes: BTreeMap<String, Identifier>,
    max_statements: Option<u64>,
    stats: OutputStats,
    started: bool,
}

fn create_file(path: &Path) -> Result<Box<dyn Write>, OutputError> {
    let file = File::create(path).map_err(|source| OutputError::Create {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Box::new(BufWriter::new(file)))
}

impl OutputWriter {
    pub fn new(sinks: Vec<Box<dyn OutputSink>>) -> Self {
        Self {
            sinks,
            prefixes: BTreeMap::new(),
            max_statements: None,
            stats: OutputStats::default(),
            started: false,
        }
    }

    /// Opens the main sink and, when configured, the metadata sink.
    pub fn from_config(config: &OutputConfig) -> Result<Self, OutputError> {
        let main: Box<dyn Write> = match &config.path {
            Some(path) => create_file(path)?,
            None => Box::new(BufWriter::new(io::stdout())),
        };
        let mut sinks: Vec<Box<dyn OutputSink>> = vec![match config.format {
            OutputFormat::NQuads => Box::new(NQuadsSink::new(main)),
            OutputFormat::TriG => Box::new(TriGSink::new(main)),
        }];
        if let Some(path) = &config.metadata_path {
            sinks.push(Box::new(MetadataSink::new(create_file(path)?)));
        }

        let mut writer = Self::new(sinks);
        writer.prefixes = config.prefixes.clone();
        writer.max_statements = config.max_statements;
        Ok(writer)
    }

    #[must_use]
    pub fn with_max_statements(mut self, max: Option<u64>) -> Self {
        self.max_statements = max;
        self
    }

    #[must_use]
    pub fn with_prefix(
        mut self,
        prefix: impl Into<String>,
        namespace: impl Into<Identifier>,
    ) -> Self {
        self.prefixes.insert(prefix.into(), namespace.into());
        self
    }

    /// Starts every sink and declares the prefixes. Called by the first `accept` otherwise.
    pub fn start(&mut self) -> Result<(), OutputError> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        for sink in &mut self.sinks {
            sink.start()?;
            for (prefix, namespace) in &self.prefixes {
                sink.add_prefix(prefix, namespace)?;
            }
        }
        Ok(())
    }

    /// Writes `statement` to all sinks unless the cap is reached; returns
    /// whether it was written.
    pub fn accept(&mut self, statement: &ResolvedStatement) -> Result<bool, OutputError> {
        self.start()?;
        if matches!(self.max_statements, Some(max) if self.stats.written >= max) {
            if self.stats.dropped == 0 {
                tracing::warn!(
                    max_statements = self.stats.written,
                    "output statement limit reached, further statements are dropped"
                );
            }
            self.stats.dropped += 1;
            return Ok(false);
        }
        for sink in &mut self.sinks {
            sink.write(statement)?;
        }
        self.stats.written += 1;
        Ok(true)
    }

    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    /// Closes every sink, reporting the first failure.
    pub fn close(mut self) -> Result<OutputStats, OutputError> {
        self.start()?;
        let mut first_error = None;
        for sink in &mut self.sinks {
            if let Err(e) = sink.close() {
                tracing::warn!(error = %e, "failed to close output sink");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(self.stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Literal, Quad};

    fn statement(object: Term, graph: Option<&str>) -> ResolvedStatement {
        let subject = Term::uri("http://ex.org/s");
        let graph = graph.map(str::to_string);
        let quad = Quad::new(subject, "http://ex.org/p", object, graph.clone()).unwrap();
        ResolvedStatement::new(quad, 0.75, graph.into_iter().collect())
    }

    #[test]
    fn test_nquads_sink_writes_one_line_per_statement() {
        let mut buf = Vec::new();
        let tagged = statement(Term::literal("a"), Some("http://g"));
        let english = statement(Term::Literal(Literal::lang("b", "en")), None);
        let mut sink = NQuadsSink::new(&mut buf);
        sink.write(&tagged).unwrap();
        sink.write(&english).unwrap();
        sink.close().unwrap();
        let late = sink.write(&statement(Term::literal("c"), None));
        assert!(matches!(late, Err(OutputError::Closed)));
        drop(sink);

        let text = String::from_utf8(buf).unwrap();
        let expected = "<http://ex.org/s> <http://ex.org/p> \"a\" <http://g> .\n\
                        <http://ex.org/s> <http://ex.org/p> \"b\"@en .\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_trig_sink_uses_prefixes() {
        let mut buf = Vec::new();
        let tagged = statement(Term::literal("a"), Some("http://g"));
        let mut sink = TriGSink::new(&mut buf);
        sink.add_prefix("ex", "http://ex.org/").unwrap();
        sink.write(&tagged).unwrap();
        let late = sink.add_prefix("late", "http://late.org/");
        assert!(matches!(late, Err(OutputError::LatePrefix(_))));
        sink.close().unwrap();
        drop(sink);

        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("@prefix ex: <http://ex.org/>"));
        assert!(text.contains("ex:s"));
        assert!(text.contains("<http://g>"));
    }

    #[test]
    fn test_invalid_prefix_namespace_is_rejected() {
        let mut sink = TriGSink::new(Vec::new());
        let invalid = sink.add_prefix("ex", "not an iri");
        assert!(matches!(invalid, Err(OutputError::Prefix { .. })));
    }

    #[test]
    fn test_metadata_sink_writes_json_lines() {
        let mut buf = Vec::new();
        let tagged = statement(Term::literal("a"), Some("http://g"));
        let mut sink = MetadataSink::new(&mut buf);
        sink.write(&tagged).unwrap();
        sink.close().unwrap();
        drop(sink);

        let value: serde_json::Value = serde_json::from_slice(buf.trim_ascii_end()).unwrap();
        assert_eq!(value["quality"], 0.75);
        assert_eq!(value["source_graphs"][0], "http://g");
        let quad = value["quad"].as_str().unwrap();
        assert!(quad.starts_with("<http://ex.org/s>"));
    }

    #[test]
    fn test_writer_caps_statements() {
        let dir = tempfile::tempdir().unwrap();
        let config = OutputConfig {
            path: Some(dir.path().join("out.nq")),
            max_statements: Some(1),
            ..OutputConfig::default()
        };
        let mut writer = OutputWriter::from_config(&config).unwrap();
        let first = statement(Term::literal("a"), None);
        let second = statement(Term::literal("b"), None);
        assert!(writer.accept(&first).unwrap());
        assert!(!writer.accept(&second).unwrap());
        let stats = writer.close().unwrap();

        assert_eq!((stats.written, stats.dropped), (1, 1));
        let text = std::fs::read_to_string(dir.path().join("out.nq")).unwrap();
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!("TriG".parse::<OutputFormat>().unwrap(), OutputFormat::TriG);
        assert_eq!("nq".parse::<OutputFormat>().unwrap(), OutputFormat::NQuads);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
