use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::Identifier;
use crate::mapping::canonical::FrozenUriMapping;

/// Representative -> every member of its class, representative included.
#[derive(Debug, Clone, Default)]
pub struct AlternativeIdIndex {
    classes: BTreeMap<Identifier, Arc<[Identifier]>>,
    by_member: HashMap<Identifier, Arc<[Identifier]>>,
}

impl AlternativeIdIndex {
    /// One pass over the frozen mapping's domain.
    pub fn build(mapping: &FrozenUriMapping) -> Self {
        let mut buckets: BTreeMap<Identifier, Vec<Identifier>> = BTreeMap::new();
        for (id, root) in mapping.entries() {
            buckets
                .entry(root.to_string())
                .or_default()
                .push(id.to_string());
        }

        let mut by_member = HashMap::with_capacity(mapping.len());
        let classes = buckets
            .into_iter()
            .map(|(root, mut members)| {
                members.sort_unstable();
                let members: Arc<[Identifier]> = members.into();
                for member in members.iter() {
                    by_member.insert(member.clone(), Arc::clone(&members));
                }
                (root, members)
            })
            .collect();

        Self { classes, by_member }
    }

    /// Sorted members of `id`'s class, or just `id` when it has none.
    pub fn alternatives<'a>(&'a self, id: &'a str) -> Cow<'a, [Identifier]> {
        match self.by_member.get(id) {
            Some(members) => Cow::Borrowed(members),
            None => Cow::Owned(vec![id.to_string()]),
        }
    }

    pub fn has_alternatives(&self, id: &str) -> bool {
        self.by_member
            .get(id)
            .is_some_and(|members| members.len() > 1)
    }

    /// Classes in representative order.
    pub fn classes(&self) -> impl Iterator<Item = (&str, &[Identifier])> {
        self.classes
            .iter()
            .map(|(root, members)| (root.as_str(), members.as_ref()))
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::CanonicalUriMapping;

    #[test]
    fn test_alternatives_cover_whole_class() {
        let mut mapping = CanonicalUriMapping::new();
        mapping.add_link("c", "a");
        mapping.add_link("b", "a");
        mapping.add_link("x", "y");
        let frozen = mapping.freeze();
        let index = frozen.alternatives();

        assert_eq!(index.num_classes(), 2);
        assert_eq!(*index.alternatives("b"), ["a", "b", "c"]);
        assert_eq!(*index.alternatives("c"), ["a", "b", "c"]);
        assert!(index.has_alternatives("y"));
    }

    #[test]
    fn test_unlinked_identifier_is_singleton() {
        let frozen = CanonicalUriMapping::new().freeze();
        let index = frozen.alternatives();

        assert_eq!(*index.alternatives("lonely"), ["lonely"]);
        assert!(!index.has_alternatives("lonely"));
    }

    #[test]
    fn test_classes_are_keyed_by_representative() {
        let mut mapping = CanonicalUriMapping::with_preferred(["z"]);
        mapping.add_link("a", "z");
        let frozen = mapping.freeze();

        let classes: Vec<_> = frozen.alternatives().classes().collect();
        assert_eq!(classes.len(), 1);
        assert_eq!(classes[0].0, "z");
    }
}
