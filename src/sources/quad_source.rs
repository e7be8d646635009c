use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::{ModelError, Quad};
use crate::parsing::ParseError;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot determine the RDF format of {}", path.display())]
    UnknownFormat { path: PathBuf },
    #[error("invalid base IRI {iri}: {message}")]
    BaseIri { iri: String, message: String },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("syntax error: {0}")]
    Rdf(#[from] oxigraph::io::RdfParseError),
    #[error("unsupported term `{0}`")]
    UnsupportedTerm(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// A finite stream of quads from one named source.
pub trait QuadSource: Iterator<Item = Result<Quad, SourceError>> {
    fn name(&self) -> &str;

    /// Graph given to quads that carry none.
    fn default_graph(&self) -> &str;

    /// Estimated size of the whole source in bytes, when known.
    fn size_hint_bytes(&self) -> Option<u64> {
        None
    }
}

impl<S: QuadSource + ?Sized> QuadSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn default_graph(&self) -> &str {
        (**self).default_graph()
    }

    fn size_hint_bytes(&self) -> Option<u64> {
        (**self).size_hint_bytes()
    }
}

/// Source over quads already in memory.
pub struct MemoryQuadSource {
    name: String,
    default_graph: String,
    quads: std::vec::IntoIter<Quad>,
}

impl MemoryQuadSource {
    pub fn new(
        name: impl Into<String>,
        default_graph: impl Into<String>,
        quads: Vec<Quad>,
    ) -> Self {
        Self {
            name: name.into(),
            default_graph: default_graph.into(),
            quads: quads.into_iter(),
        }
    }
}

impl Iterator for MemoryQuadSource {
    type Item = Result<Quad, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.quads.next().map(Ok)
    }
}

impl QuadSource for MemoryQuadSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn default_graph(&self) -> &str {
        &self.default_graph
    }
}
