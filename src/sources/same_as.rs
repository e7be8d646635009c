//! Loading of same-as links into a [`CanonicalUriMapping`].

use crate::core::{vocab, Quad, Term, Tuple};
use crate::mapping::CanonicalUriMapping;
use crate::parsing::{ParseError, ParsePolicy, TupleReader};
use crate::sources::file_source::{FileQuadSource, SourceConfig};
use crate::sources::quad_source::SourceError;
use crate::sources::retry::RetryPolicy;

/// Feeds identifier pairs to a mapping. Only URI pairs become links.
pub struct SameAsLoader<'a> {
    mapping: &'a mut CanonicalUriMapping,
    links: u64,
    ignored: u64,
}

impl<'a> SameAsLoader<'a> {
    pub fn new(mapping: &'a mut CanonicalUriMapping) -> Self {
        Self {
            mapping,
            links: 0,
            ignored: 0,
        }
    }

    /// Links `a` and `b` when both are URIs.
    pub fn add_pair(&mut self, a: &Term, b: &Term) {
        match (a.as_uri(), b.as_uri()) {
            (Some(a), Some(b)) => {
                self.mapping.add_link(a, b);
                self.links += 1;
            }
            _ => self.ignored += 1,
        }
    }

    /// Takes the `owl:sameAs` statements of a quad stream.
    pub fn load_quads<I>(&mut self, quads: I) -> Result<(), SourceError>
    where
        I: IntoIterator<Item = Result<Quad, SourceError>>,
    {
        for quad in quads {
            let quad = quad?;
            if quad.predicate() == vocab::OWL_SAME_AS {
                self.add_pair(quad.subject(), quad.object());
            }
        }
        Ok(())
    }

    /// Takes two-column rows as pairs and longer rows as `owl:sameAs` statements.
    pub fn load_tuples<I>(&mut self, rows: I) -> Result<(), SourceError>
    where
        I: IntoIterator<Item = Result<Tuple, ParseError>>,
    {
        let same_as = Term::uri(vocab::OWL_SAME_AS);
        for row in rows {
            match row?.terms() {
                [a, b] => self.add_pair(a, b),
                [s, p, o, ..] if *p == same_as => self.add_pair(s, o),
                _ => {}
            }
        }
        Ok(())
    }

    /// Links recorded so far.
    pub fn links(&self) -> u64 {
        self.links
    }

    /// Pairs dropped because one side was not a URI.
    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}

/// Loads the links of one file; line-based files may hold bare identifier pairs.
pub fn load_same_as_file(
    config: &SourceConfig,
    source_index: usize,
    policy: &ParsePolicy,
    retry: &RetryPolicy,
    mapping: &mut CanonicalUriMapping,
) -> Result<u64, SourceError> {
    let path = &config.path;
    let mut loader = SameAsLoader::new(mapping);
    if config.resolved_format()?.is_line_based() {
        let reader = retry
            .run(&path.display().to_string(), || TupleReader::open(path))
            .map_err(|source| SourceError::Open {
                path: path.clone(),
                source,
            })?;
        let rows = reader.with_policy(policy.clone()).with_arity(2..=4);
        loader.load_tuples(rows)?;
    } else {
        let quads = FileQuadSource::open(config, source_index, policy, retry)?;
        loader.load_quads(quads)?;
    }

    if loader.ignored() > 0 {
        let ignored = loader.ignored();
        tracing::debug!(path = %path.display(), ignored, "ignored non-URI same-as pairs");
    }
    tracing::info!(path = %path.display(), links = loader.links(), "loaded same-as links");
    Ok(loader.links())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::IdentifierMapping;
    use std::fs;

    #[test]
    fn test_pairs_and_statements_are_links() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.nt");
        fs::write(
            &path,
            "<http://a> <http://b> .\n\
             <http://c> <http://www.w3.org/2002/07/owl#sameAs> <http://b> .\n\
             <http://d> <http://ex.org/other> <http://a> .\n\
             _:x <http://a> .\n",
        )
        .unwrap();

        let mut mapping = CanonicalUriMapping::new();
        let links = load_same_as_file(
            &SourceConfig::new(&path),
            0,
            &ParsePolicy::strict(),
            &RetryPolicy::none(),
            &mut mapping,
        )
        .unwrap();

        assert_eq!(links, 2);
        assert_eq!(mapping.canonical("http://a"), mapping.canonical("http://c"));
        assert_eq!(mapping.canonical("http://b"), "http://c");
        assert_eq!(mapping.canonical("http://d"), "http://d");
    }

    #[test]
    fn test_turtle_links_use_same_as_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.ttl");
        fs::write(
            &path,
            "@prefix owl: <http://www.w3.org/2002/07/owl#> .\n\
             <http://x> owl:sameAs <http://y> , <http://z> .\n",
        )
        .unwrap();

        let mut mapping = CanonicalUriMapping::with_preferred(["http://z"]);
        load_same_as_file(
            &SourceConfig::new(&path),
            1,
            &ParsePolicy::strict(),
            &RetryPolicy::none(),
            &mut mapping,
        )
        .unwrap();
        assert_eq!(mapping.canonical("http://x"), "http://z");
        assert_eq!(mapping.canonical("http://y"), "http://z");
    }
}
