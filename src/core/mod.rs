//! Core data structures for quad fusion: terms, quads, tuples and resolved statements.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

pub mod encoding;
pub use encoding::*;

/// An opaque resource name: an IRI or a blank node label.
pub type Identifier = String;

/// Well-known vocabulary used by the fusion run.
pub mod vocab {
    pub const OWL_SAME_AS: &str = "http://www.w3.org/2002/07/owl#sameAs";
    pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
    /// Base of the IRIs standing in for graphs named by a blank node.
    pub const BLANK_GRAPH_BASE: &str = "urn:quadfuse:graph:";
}

/// A literal value with an optional datatype IRI or language tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    pub lexical: String,
    pub datatype: Option<Identifier>,
    pub language: Option<String>,
}

impl Literal {
    pub fn simple(lexical: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: None,
            language: None,
        }
    }

    pub fn typed(lexical: impl Into<String>, datatype: impl Into<Identifier>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn lang(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: None,
            language: Some(language.into()),
        }
    }
}

/// One RDF term. Terms order by variant first, then by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    Uri(Identifier),
    BlankNode(Identifier),
    Literal(Literal),
}

impl Term {
    pub fn uri(iri: impl Into<Identifier>) -> Self {
        Term::Uri(iri.into())
    }

    pub fn blank(label: impl Into<Identifier>) -> Self {
        Term::BlankNode(label.into())
    }

    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal(Literal::simple(lexical))
    }

    /// IRI of a URI term.
    pub fn as_uri(&self) -> Option<&str> {
        match self {
            Term::Uri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(self, Term::Uri(_) | Term::BlankNode(_))
    }

    pub fn is_blank_node(&self) -> bool {
        matches!(self, Term::BlankNode(_))
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, self)
    }
}

/// Violations of the quad model invariants.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("quad subject must be a URI or blank node, got {0}")]
    InvalidSubject(String),
    #[error("quad predicate must be a URI, got {0}")]
    InvalidPredicate(String),
    #[error("quad graph must be a URI, got {0}")]
    InvalidGraph(String),
    #[error("expected a tuple of {expected} terms, got {actual}")]
    Arity { expected: usize, actual: usize },
}

/// A subject–predicate–object–graph statement.
///
/// The subject is always a URI or blank node and the predicate always a URI;
/// both are checked on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quad {
    subject: Term,
    predicate: Identifier,
    object: Term,
    graph: Option<Identifier>,
}

impl Quad {
    pub fn new(
        subject: Term,
        predicate: impl Into<Identifier>,
        object: Term,
        graph: Option<Identifier>,
    ) -> Result<Self, ModelError> {
        if !subject.is_resource() {
            return Err(ModelError::InvalidSubject(subject.to_string()));
        }
        Ok(Self {
            subject,
            predicate: predicate.into(),
            object,
            graph,
        })
    }

    /// Builds a quad from terms as they come out of a tuple row.
    pub fn from_terms(
        subject: Term,
        predicate: Term,
        object: Term,
        graph: Option<Term>,
    ) -> Result<Self, ModelError> {
        let predicate = match predicate {
            Term::Uri(iri) => iri,
            other => return Err(ModelError::InvalidPredicate(other.to_string())),
        };
        let graph = match graph {
            None => None,
            Some(Term::Uri(iri)) => Some(iri),
            Some(other) => return Err(ModelError::InvalidGraph(other.to_string())),
        };
        Self::new(subject, predicate, object, graph)
    }

    pub fn subject(&self) -> &Term {
        &self.subject
    }

    pub fn predicate(&self) -> &str {
        &self.predicate
    }

    pub fn object(&self) -> &Term {
        &self.object
    }

    pub fn graph(&self) -> Option<&str> {
        self.graph.as_deref()
    }

    /// Returns this quad with `graph` filled in when it has none.
    #[must_use]
    pub fn with_default_graph(mut self, graph: &str) -> Self {
        if self.graph.is_none() {
            self.graph = Some(graph.to_string());
        }
        self
    }

    /// Replaces the identifiers of this quad through `map`. Only URI terms are
    /// passed to `map`; the graph is kept as is.
    #[must_use]
    pub fn map_resources(&self, map: impl Fn(&Term) -> Term) -> Self {
        let predicate = match map(&Term::Uri(self.predicate.clone())) {
            Term::Uri(iri) => iri,
            _ => self.predicate.clone(),
        };
        Self {
            subject: map(&self.subject),
            predicate,
            object: map(&self.object),
            graph: self.graph.clone(),
        }
    }

    pub fn into_parts(self) -> (Term, Identifier, Term, Option<Identifier>) {
        (self.subject, self.predicate, self.object, self.graph)
    }
}

impl fmt::Display for Quad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_term(f, &self.subject)?;
        f.write_str(" <")?;
        write_iri_body(f, &self.predicate)?;
        f.write_str("> ")?;
        write_term(f, &self.object)?;
        if let Some(graph) = &self.graph {
            f.write_str(" <")?;
            write_iri_body(f, graph)?;
            f.write_str(">")?;
        }
        f.write_str(" .")
    }
}

/// An ordered row of terms, the unit of every on-disk intermediate file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Tuple(Vec<Term>);

impl Tuple {
    pub fn new(terms: Vec<Term>) -> Self {
        Self(terms)
    }

    /// Leading column, used as the sort and join key.
    pub fn key(&self) -> Option<&Term> {
        self.0.first()
    }

    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_terms(self) -> Vec<Term> {
        self.0
    }

    /// Splits a row of exactly `N` terms into an array.
    pub fn into_array<const N: usize>(self) -> Result<[Term; N], ModelError> {
        let actual = self.0.len();
        self.0
            .try_into()
            .map_err(|_| ModelError::Arity {
                expected: N,
                actual,
            })
    }
}

impl From<Vec<Term>> for Tuple {
    fn from(terms: Vec<Term>) -> Self {
        Self(terms)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for term in &self.0 {
            write_term(f, term)?;
            f.write_str(" ")?;
        }
        f.write_str(".")
    }
}

/// Output of resolving one conflict cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedStatement {
    pub quad: Quad,
    pub quality: f64,
    pub source_graphs: BTreeSet<Identifier>,
}

impl ResolvedStatement {
    pub fn new(quad: Quad, quality: f64, source_graphs: BTreeSet<Identifier>) -> Self {
        Self {
            quad,
            quality,
            source_graphs,
        }
    }
}
