//! Union-find over same-as links.
//!
//! [`CanonicalUriMapping`] is mutable while links are loaded. Freezing it
//! compresses every path once and yields a [`FrozenUriMapping`], which is the
//! only form the rest of a fusion run sees.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::core::Identifier;
use crate::mapping::alternatives::AlternativeIdIndex;
use crate::mapping::IdentifierMapping;

/// Equivalence classes of identifiers under construction.
#[derive(Debug, Clone, Default)]
pub struct CanonicalUriMapping {
    /// Identifier -> parent (self for roots). Only linked identifiers appear.
    parent: HashMap<Identifier, Identifier>,
    preferred: HashSet<Identifier>,
}

impl CanonicalUriMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mapping whose class representatives favour `preferred`.
    pub fn with_preferred<I, S>(preferred: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Identifier>,
    {
        Self {
            parent: HashMap::new(),
            preferred: preferred.into_iter().map(Into::into).collect(),
        }
    }

    pub fn add_preferred(&mut self, id: impl Into<Identifier>) {
        self.preferred.insert(id.into());
    }

    pub fn is_preferred(&self, id: &str) -> bool {
        self.preferred.contains(id)
    }

    fn ensure(&mut self, id: &str) {
        if !self.parent.contains_key(id) {
            self.parent.insert(id.to_string(), id.to_string());
        }
    }

    /// Root of `id`'s class, compressing the walked path.
    pub fn find(&mut self, id: &str) -> Identifier {
        let root = self.canonical(id).to_string();

        let mut current = id.to_string();
        while let Some(next) = self.parent.get(&current) {
            if *next == root || *next == current {
                break;
            }
            let next = next.clone();
            self.parent.insert(current, root.clone());
            current = next;
        }

        root
    }

    /// Joins the classes of `a` and `b`. Returns `true` if two classes merged.
    ///
    /// With `r1` the root of `a` and `r2` the root of `b`, the merged class is
    /// rooted at `r2` only when `r2` is preferred and `r1` is not.
    pub fn add_link(&mut self, a: &str, b: &str) -> bool {
        if a == b {
            return false;
        }
        self.ensure(a);
        self.ensure(b);
        let r1 = self.find(a);
        let r2 = self.find(b);
        if r1 == r2 {
            return false;
        }

        if self.is_preferred(&r2) && !self.is_preferred(&r1) {
            self.parent.insert(r1, r2);
        } else {
            self.parent.insert(r2, r1);
        }
        true
    }

    /// Identifiers that took part in at least one link.
    pub fn domain(&self) -> impl Iterator<Item = &str> {
        self.parent.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Ends the build phase: compresses all paths and makes the mapping read-only.
    pub fn freeze(mut self) -> FrozenUriMapping {
        let ids: Vec<Identifier> = self.parent.keys().cloned().collect();
        let mut canonical = HashMap::with_capacity(ids.len());
        for id in ids {
            let root = self.find(&id);
            canonical.insert(id, root);
        }
        tracing::debug!(identifiers = canonical.len(), "froze canonical URI mapping");

        FrozenUriMapping {
            canonical,
            preferred: self.preferred,
            alternatives: OnceLock::new(),
        }
    }
}

impl IdentifierMapping for CanonicalUriMapping {
    /// Walks to the root without compressing.
    fn canonical<'a>(&'a self, id: &'a str) -> &'a str {
        let mut current = id;
        while let Some(next) = self.parent.get(current) {
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

/// Read-only identifier mapping shared by every reader of a fusion run.
///
/// ```
/// use quadfuse::mapping::{CanonicalUriMapping, IdentifierMapping};
///
/// let mut builder = CanonicalUriMapping::with_preferred(["http://b"]);
/// builder.add_link("http://a", "http://b");
/// let frozen = builder.freeze();
/// assert_eq!(frozen.canonical("http://a"), "http://b");
/// ```
///
/// Links can only be added before freezing:
///
/// ```compile_fail
/// use quadfuse::mapping::CanonicalUriMapping;
///
/// let mut frozen = CanonicalUriMapping::new().freeze();
/// frozen.add_link("http://a", "http://b");
/// ```
#[derive(Debug, Default)]
pub struct FrozenUriMapping {
    /// Identifier -> representative, every path fully compressed.
    canonical: HashMap<Identifier, Identifier>,
    preferred: HashSet<Identifier>,
    alternatives: OnceLock<AlternativeIdIndex>,
}

impl FrozenUriMapping {
    /// A mapping without links; every identifier is its own representative.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn domain(&self) -> impl Iterator<Item = &str> {
        self.canonical.keys().map(String::as_str)
    }

    /// `(identifier, representative)` for every linked identifier.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.canonical
            .iter()
            .map(|(id, root)| (id.as_str(), root.as_str()))
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn is_preferred(&self, id: &str) -> bool {
        self.preferred.contains(id)
    }

    /// Class members per representative, built on first call.
    pub fn alternatives(&self) -> &AlternativeIdIndex {
        self.alternatives
            .get_or_init(|| AlternativeIdIndex::build(self))
    }
}

impl IdentifierMapping for FrozenUriMapping {
    fn canonical<'a>(&'a self, id: &'a str) -> &'a str {
        self.canonical.get(id).map_or(id, String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Term;

    #[test]
    fn test_unlinked_identifier_maps_to_itself() {
        let mapping = CanonicalUriMapping::new();
        assert_eq!(mapping.canonical("http://a"), "http://a");
        assert!(mapping.is_empty());
    }

    #[test]
    fn test_transitive_links_share_a_root() {
        let mut mapping = CanonicalUriMapping::new();
        assert!(mapping.add_link("a", "b"));
        assert!(mapping.add_link("b", "c"));
        assert!(mapping.add_link("d", "c"));

        let root = mapping.canonical("a").to_string();
        for id in ["b", "c", "d"] {
            assert_eq!(mapping.canonical(id), root);
        }
    }

    #[test]
    fn test_cycle_and_self_link_are_noops() {
        let mut mapping = CanonicalUriMapping::new();
        assert!(!mapping.add_link("a", "a"));
        assert!(mapping.is_empty());

        mapping.add_link("a", "b");
        mapping.add_link("b", "c");
        assert!(!mapping.add_link("c", "a"));
        assert_eq!(mapping.len(), 3);
    }

    #[test]
    fn test_first_root_wins_without_preference() {
        let mut mapping = CanonicalUriMapping::new();
        mapping.add_link("x", "y");
        assert_eq!(mapping.canonical("y"), "x");
    }

    #[test]
    fn test_preferred_root_is_kept() {
        let mut mapping = CanonicalUriMapping::with_preferred(["p"]);
        mapping.add_link("a", "b");
        mapping.add_link("c", "p");
        mapping.add_link("b", "c");
        mapping.add_link("e", "a");

        for id in ["a", "b", "c", "e", "p"] {
            assert_eq!(mapping.canonical(id), "p");
        }
    }

    #[test]
    fn test_find_compresses_paths() {
        let mut mapping = CanonicalUriMapping::new();
        mapping.add_link("b", "c");
        mapping.add_link("a", "b");
        mapping.add_link("z", "a");
        assert_eq!(mapping.find("c"), "z");
        assert_eq!(mapping.parent.get("c").map(String::as_str), Some("z"));
    }

    #[test]
    fn test_frozen_mapping_agrees_with_builder() {
        let mut mapping = CanonicalUriMapping::new();
        mapping.add_link("a", "b");
        mapping.add_link("c", "d");
        mapping.add_link("d", "b");
        let expected: Vec<(String, String)> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| (id.to_string(), mapping.canonical(id).to_string()))
            .collect();

        let frozen = mapping.freeze();
        for (id, root) in expected {
            assert_eq!(frozen.canonical(&id), root);
        }
        assert_eq!(frozen.canonical("unknown"), "unknown");
    }

    #[test]
    fn test_map_term_only_touches_uris() {
        let mut mapping = CanonicalUriMapping::new();
        mapping.add_link("http://a", "http://b");
        mapping.add_link("b0", "http://a");
        let frozen = mapping.freeze();

        assert_eq!(
            frozen.map_term(&Term::uri("http://b")),
            Term::uri("http://a")
        );
        assert_eq!(frozen.map_term(&Term::blank("b0")), Term::blank("b0"));
        assert_eq!(
            frozen.map_term(&Term::literal("http://b")),
            Term::literal("http://b")
        );
    }
}
