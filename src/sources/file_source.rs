//! Quad sources backed by RDF files.
//!
//! N-Quads and N-Triples go through the tuple reader so that the configured
//! [`ParsePolicy`] applies; the other syntaxes are parsed by Oxigraph. Blank
//! node labels are prefixed with the source index so that labels from
//! different files never meet.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model as ox;
use serde::{Deserialize, Serialize};

use crate::core::{vocab, Quad, Term, Tuple};
use crate::parsing::{parse_term, ParsePolicy, TupleReader};
use crate::sources::quad_source::{QuadSource, SourceError};
use crate::sources::retry::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    NQuads,
    NTriples,
    Turtle,
    TriG,
    RdfXml,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        match RdfFormat::from_extension(extension)? {
            RdfFormat::NQuads => Some(SourceFormat::NQuads),
            RdfFormat::NTriples => Some(SourceFormat::NTriples),
            RdfFormat::Turtle => Some(SourceFormat::Turtle),
            RdfFormat::TriG => Some(SourceFormat::TriG),
            RdfFormat::RdfXml => Some(SourceFormat::RdfXml),
            _ => None,
        }
    }

    /// Read line by line with the tuple reader.
    pub fn is_line_based(self) -> bool {
        matches!(self, SourceFormat::NQuads | SourceFormat::NTriples)
    }

    fn rdf_format(self) -> RdfFormat {
        match self {
            SourceFormat::NQuads => RdfFormat::NQuads,
            SourceFormat::NTriples => RdfFormat::NTriples,
            SourceFormat::Turtle => RdfFormat::Turtle,
            SourceFormat::TriG => RdfFormat::TriG,
            SourceFormat::RdfXml => RdfFormat::RdfXml,
        }
    }
}

/// One input file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub path: PathBuf,
    /// Guessed from the file extension when unset
    pub format: Option<SourceFormat>,
    /// Graph for quads without one, `file://<absolute path>` when unset
    pub default_graph: Option<String>,
    pub base_iri: Option<String>,
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn resolved_format(&self) -> Result<SourceFormat, SourceError> {
        self.format
            .or_else(|| SourceFormat::from_path(&self.path))
            .ok_or_else(|| SourceError::UnknownFormat {
                path: self.path.clone(),
            })
    }
}

/// Prefixes blank node labels with a per-source tag.
#[derive(Debug, Clone)]
pub(crate) struct BlankNodeScope {
    prefix: String,
}

impl BlankNodeScope {
    pub(crate) fn new(source_index: usize) -> Self {
        Self {
            prefix: format!("s{source_index}x"),
        }
    }

    pub(crate) fn relabel(&self, term: Term) -> Term {
        match term {
            Term::BlankNode(label) => Term::BlankNode(format!("{}{label}", self.prefix)),
            other => other,
        }
    }

    /// Graph names must be IRIs, so a blank graph label becomes one under
    /// [`vocab::BLANK_GRAPH_BASE`], still scoped to the source.
    pub(crate) fn graph_iri(&self, label: &str) -> String {
        format!("{}{}{label}", vocab::BLANK_GRAPH_BASE, self.prefix)
    }

    fn relabel_graph(&self, term: Term) -> Term {
        match term {
            Term::BlankNode(label) => Term::Uri(self.graph_iri(&label)),
            other => other,
        }
    }
}

type QuadIter = Box<dyn Iterator<Item = Result<Quad, SourceError>>>;

pub struct FileQuadSource {
    name: String,
    default_graph: String,
    size_bytes: u64,
    quads: QuadIter,
}

impl FileQuadSource {
    /// Opens `config.path`; only the open itself is retried.
    pub fn open(
        config: &SourceConfig,
        source_index: usize,
        policy: &ParsePolicy,
        retry: &RetryPolicy,
    ) -> Result<Self, SourceError> {
        let format = config.resolved_format()?;
        let path = config.path.clone();
        let open_error = |source| SourceError::Open {
            path: path.clone(),
            source,
        };
        let file = retry
            .run(&path.display().to_string(), || File::open(&path))
            .map_err(open_error)?;
        let size_bytes = file.metadata().map_err(open_error)?.len();

        let default_graph = match &config.default_graph {
            Some(graph) => graph.clone(),
            None => default_graph_for(&path),
        };
        let scope = BlankNodeScope::new(source_index);
        let reader = BufReader::new(file);

        let quads: QuadIter = if format.is_line_based() {
            let rows = TupleReader::new(reader)
                .with_policy(policy.clone())
                .with_arity(3..=4);
            Box::new(rows.map(move |row| tuple_to_quad(row?, &scope)))
        } else {
            let mut parser = RdfParser::from_format(format.rdf_format());
            if let Some(base) = &config.base_iri {
                parser = parser
                    .with_base_iri(base.as_str())
                    .map_err(|e| SourceError::BaseIri {
                        iri: base.clone(),
                        message: e.to_string(),
                    })?;
            }
            let parsed = parser.for_reader(reader);
            Box::new(parsed.map(move |quad| oxigraph_to_quad(&quad?, &scope)))
        };

        tracing::info!(path = %path.display(), ?format, size_bytes, "opened source");
        Ok(Self {
            name: path.display().to_string(),
            default_graph,
            size_bytes,
            quads,
        })
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

fn default_graph_for(path: &Path) -> String {
    let absolute = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}

fn tuple_to_quad(row: Tuple, scope: &BlankNodeScope) -> Result<Quad, SourceError> {
    let mut terms = row.into_terms().into_iter();
    let (Some(subject), Some(predicate), Some(object)) =
        (terms.next(), terms.next(), terms.next())
    else {
        let message = "row with fewer than three terms".to_string();
        return Err(SourceError::UnsupportedTerm(message));
    };
    let graph = terms.next().map(|graph| scope.relabel_graph(graph));
    let (subject, object) = (scope.relabel(subject), scope.relabel(object));
    Ok(Quad::from_terms(subject, predicate, object, graph)?)
}

fn oxigraph_to_quad(quad: &ox::Quad, scope: &BlankNodeScope) -> Result<Quad, SourceError> {
    let term = |text: String| parse_term(&text).map_err(|_| SourceError::UnsupportedTerm(text));
    let subject = term(quad.subject.to_string())?;
    let object = term(quad.object.to_string())?;
    let graph = match &quad.graph_name {
        ox::GraphName::NamedNode(node) => Some(node.as_str().to_string()),
        ox::GraphName::DefaultGraph => None,
        ox::GraphName::BlankNode(node) => Some(scope.graph_iri(node.as_str())),
    };
    let (subject, object) = (scope.relabel(subject), scope.relabel(object));
    Ok(Quad::new(subject, quad.predicate.as_str(), object, graph)?)
}

impl Iterator for FileQuadSource {
    type Item = Result<Quad, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.quads.next()
    }
}

impl QuadSource for FileQuadSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_graph(&self) -> &str {
        &self.default_graph
    }

    fn size_hint_bytes(&self) -> Option<u64> {
        Some(self.size_bytes)
    }
}
