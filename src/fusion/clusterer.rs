//! Grouping of the canonical statement stream into conflict clusters.
//!
//! Rows arrive contiguous per resource key. All rows of one key form a
//! [`ResourceDescription`]: statements whose canonical subject is the key are
//! the resource's own, the rest belong to dependent resources attached through
//! resource-description links. Own statements are partitioned by canonical
//! (subject, predicate) and every partition is handed to the policy registered
//! for its predicate. Only one description is held in memory at a time.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::core::{Identifier, Quad, ResolvedStatement, Term};
use crate::error::{FusionError, Result, Stage, StageContext};
use crate::fusion::ingest::CanonicalRow;
use crate::fusion::policy::{PolicyRegistry, QualitySettings};
use crate::mapping::{FrozenUriMapping, IdentifierMapping};

/// All statements reached from one resource key, canonicalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescription {
    pub resource: Term,
    pub statements: Vec<Quad>,
    /// Canonical subject -> statements of a dependent resource
    pub dependents: BTreeMap<Term, Vec<Quad>>,
}

impl ResourceDescription {
    pub fn new(resource: Term) -> Self {
        Self {
            resource,
            statements: Vec::new(),
            dependents: BTreeMap::new(),
        }
    }

    /// Adds a raw quad, canonicalizing subject, predicate and object.
    pub fn push(&mut self, quad: &Quad, mapping: &impl IdentifierMapping) {
        let canonical = quad.map_resources(|term| mapping.map_term(term));
        if *canonical.subject() == self.resource {
            self.statements.push(canonical);
        } else {
            self.dependents
                .entry(canonical.subject().clone())
                .or_default()
                .push(canonical);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// What a policy gets to see besides the cluster itself.
pub struct ClusterContext<'a> {
    /// Unique within one run, in visiting order
    pub cluster_id: u64,
    pub subject: &'a Term,
    pub predicate: &'a str,
    /// Cluster members before duplicate removal, sorted
    pub members: &'a [Quad],
    /// Distinct graphs contributing to the cluster
    pub source_graphs: &'a BTreeSet<Identifier>,
    pub quality: &'a QualitySettings,
    /// Identifiers equivalent to the subject, the subject included
    pub alternatives: Cow<'a, [Identifier]>,
    dependents: &'a BTreeMap<Term, Vec<Quad>>,
}

impl ClusterContext<'_> {
    pub fn graph_score(&self, graph: Option<&str>) -> f64 {
        self.quality.graph_score(graph)
    }

    /// Statements of the dependent resource `object`, empty when none were attached.
    pub fn dependent_description(&self, object: &Term) -> &[Quad] {
        self.dependents.get(object).map_or(&[], Vec::as_slice)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    pub descriptions: u64,
    pub clusters: u64,
    pub statements_in: u64,
    pub duplicates_removed: u64,
    pub resolved: u64,
}

pub struct ConflictClusterer<'a> {
    mapping: &'a FrozenUriMapping,
    registry: &'a PolicyRegistry,
    quality: &'a QualitySettings,
    cancel: Option<Arc<AtomicBool>>,
    stats: ClusterStats,
}

impl<'a> ConflictClusterer<'a> {
    pub fn new(
        mapping: &'a FrozenUriMapping,
        registry: &'a PolicyRegistry,
        quality: &'a QualitySettings,
    ) -> Self {
        Self {
            mapping,
            registry,
            quality,
            cancel: None,
            stats: ClusterStats::default(),
        }
    }

    /// Checked before each description; once set the run ends with [`FusionError::Cancelled`].
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn stats(&self) -> ClusterStats {
        self.stats
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Resolves every description of `rows`, passing results to `sink`.
    pub fn run<I, S>(&mut self, rows: I, mut sink: S) -> Result<ClusterStats>
    where
        I: IntoIterator<Item = Result<CanonicalRow>>,
        S: FnMut(ResolvedStatement) -> Result<()>,
    {
        let mut current: Option<ResourceDescription> = None;
        for row in rows {
            let CanonicalRow { key, quad } = row?;
            if current.as_ref().is_some_and(|held| held.resource != key) {
                if let Some(done) = current.take() {
                    self.resolve_description(&done, &mut sink)?;
                }
            }
            current
                .get_or_insert_with(|| ResourceDescription::new(key))
                .push(&quad, self.mapping);
        }
        if let Some(done) = current {
            self.resolve_description(&done, &mut sink)?;
        }

        tracing::info!(
            descriptions = self.stats.descriptions,
            clusters = self.stats.clusters,
            duplicates = self.stats.duplicates_removed,
            resolved = self.stats.resolved,
            "clustering finished"
        );
        Ok(self.stats)
    }

    /// Clusters and resolves one description.
    pub fn resolve_description<S>(
        &mut self,
        description: &ResourceDescription,
        sink: &mut S,
    ) -> Result<()>
    where
        S: FnMut(ResolvedStatement) -> Result<()>,
    {
        if self.is_cancelled() {
            tracing::warn!(resource = %description.resource, "fusion cancelled");
            return Err(FusionError::Cancelled);
        }
        self.stats.descriptions += 1;
        if description.is_empty() {
            return Ok(());
        }

        let mut clusters: BTreeMap<(&Term, &str), Vec<Quad>> = BTreeMap::new();
        for quad in &description.statements {
            clusters
                .entry((quad.subject(), quad.predicate()))
                .or_default()
                .push(quad.clone());
        }

        let alternatives_index = self.mapping.alternatives();
        for ((subject, predicate), mut members) in clusters {
            members.sort();
            let mut distinct = members.clone();
            distinct.dedup();
            let source_graphs: BTreeSet<Identifier> = distinct
                .iter()
                .filter_map(|quad| quad.graph().map(str::to_string))
                .collect();

            let cluster_id = self.stats.clusters;
            self.stats.clusters += 1;
            self.stats.statements_in += members.len() as u64;
            self.stats.duplicates_removed += (members.len() - distinct.len()) as u64;

            let subject_id = match subject {
                Term::Uri(id) | Term::BlankNode(id) => id.as_str(),
                Term::Literal(literal) => literal.lexical.as_str(),
            };
            let context = ClusterContext {
                cluster_id,
                subject,
                predicate,
                members: &members,
                source_graphs: &source_graphs,
                quality: self.quality,
                alternatives: alternatives_index.alternatives(subject_id),
                dependents: &description.dependents,
            };

            let policy = self.registry.policy_for(predicate);
            let resolved = match policy.resolve(&distinct, &context) {
                Ok(resolved) => resolved,
                Err(e) => {
                    let context = format!(
                        "cluster {cluster_id} ({subject} <{predicate}>) with {}",
                        policy.name()
                    );
                    return Err(e).stage(Stage::Resolve, context);
                }
            };
            tracing::trace!(
                cluster_id,
                policy = policy.name(),
                statements = resolved.len(),
                "resolved cluster"
            );

            for statement in resolved {
                self.stats.resolved += 1;
                sink(statement)?;
            }
        }
        Ok(())
    }
}
