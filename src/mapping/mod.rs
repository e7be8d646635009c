//! Identifier equivalence: same-as union-find, its frozen form and the
//! alternative identifier index.

pub mod alternatives;
pub mod canonical;

pub use alternatives::AlternativeIdIndex;
pub use canonical::{CanonicalUriMapping, FrozenUriMapping};

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::core::{vocab, Identifier, Term};
use crate::parsing::TupleWriter;

/// Lookup of class representatives.
pub trait IdentifierMapping {
    /// Representative of `id`, or `id` itself when it was never linked.
    fn canonical<'a>(&'a self, id: &'a str) -> &'a str;

    /// Canonicalizes URI terms; blank nodes and literals pass through.
    fn map_term(&self, term: &Term) -> Term {
        match term {
            Term::Uri(iri) => Term::Uri(self.canonical(iri).to_string()),
            other => other.clone(),
        }
    }
}

/// Reads one identifier per line. Blank lines and `#` comments are ignored and
/// surrounding `<...>` is stripped.
pub fn read_identifier_file(path: impl AsRef<Path>) -> io::Result<Vec<Identifier>> {
    let reader = BufReader::new(File::open(path)?);
    let mut identifiers = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let id = trimmed
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .unwrap_or(trimmed);
        identifiers.push(id.to_string());
    }
    Ok(identifiers)
}

/// Writes the representative of every class, sorted, one per line.
///
/// The file can be fed back as preferred identifiers to keep representatives
/// stable across runs.
pub fn write_canonical_identifiers(
    mapping: &FrozenUriMapping,
    path: impl AsRef<Path>,
) -> io::Result<usize> {
    let mut writer = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for (root, _) in mapping.alternatives().classes() {
        writeln!(writer, "{root}")?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

/// Writes `<representative> owl:sameAs <member> .` for every other class member.
pub fn write_same_as_links(mapping: &FrozenUriMapping, path: impl AsRef<Path>) -> io::Result<u64> {
    let mut writer = TupleWriter::create(path)?;
    let same_as = Term::uri(vocab::OWL_SAME_AS);
    for (root, members) in mapping.alternatives().classes() {
        let subject = Term::uri(root);
        for member in members.iter().filter(|member| member.as_str() != root) {
            let object = Term::uri(member.as_str());
            writer.write(&[subject.clone(), same_as.clone(), object])?;
        }
    }
    let written = writer.written();
    writer.finish()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::TupleReader;
    use std::fs;

    #[test]
    fn test_identifier_file_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preferred.txt");
        fs::write(&path, "# preferred\n<http://a>\n\n  http://b  \n").unwrap();

        assert_eq!(
            read_identifier_file(&path).unwrap(),
            vec!["http://a", "http://b"]
        );
    }

    #[test]
    fn test_canonical_identifiers_feed_back_as_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canonical.txt");

        let mut mapping = CanonicalUriMapping::with_preferred(["http://b"]);
        mapping.add_link("http://a", "http://b");
        mapping.add_link("http://c", "http://d");
        let frozen = mapping.freeze();
        assert_eq!(write_canonical_identifiers(&frozen, &path).unwrap(), 2);

        let preferred = read_identifier_file(&path).unwrap();
        assert_eq!(preferred, vec!["http://b", "http://c"]);

        let mut rerun = CanonicalUriMapping::with_preferred(preferred);
        rerun.add_link("http://d", "http://c");
        assert_eq!(rerun.canonical("http://d"), "http://c");
    }

    #[test]
    fn test_same_as_links_skip_representative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sameas.nt");

        let mut mapping = CanonicalUriMapping::new();
        mapping.add_link("http://a", "http://b");
        mapping.add_link("http://a", "http://c");
        let frozen = mapping.freeze();
        assert_eq!(write_same_as_links(&frozen, &path).unwrap(), 2);

        let rows: Vec<_> = TupleReader::open(&path)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(rows[0].terms()[0], Term::uri("http://a"));
        assert_eq!(rows[0].terms()[2], Term::uri("http://b"));
        assert_eq!(rows[1].terms()[2], Term::uri("http://c"));
    }
}
