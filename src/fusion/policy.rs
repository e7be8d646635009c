//! Conflict resolution policies and the registry choosing one per predicate.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::{Identifier, ModelError, Quad, ResolvedStatement, Term};
use crate::fusion::clusterer::ClusterContext;
use crate::mapping::{FrozenUriMapping, IdentifierMapping};

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy {policy} failed: {message}")]
    Failed { policy: String, message: String },
    #[error("policy {policy} produced an invalid statement: {source}")]
    Model {
        policy: String,
        #[source]
        source: ModelError,
    },
}

pub type Resolution = Result<Vec<ResolvedStatement>, PolicyError>;

/// Turns one conflict cluster into resolved statements.
pub trait ResolutionPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// `cluster` holds the distinct quads of one (subject, predicate) pair, sorted.
    fn resolve(&self, cluster: &[Quad], context: &ClusterContext<'_>) -> Resolution;
}

/// A policy backed by a closure, see [`from_fn`].
pub struct FnPolicy<F> {
    name: String,
    resolve: F,
}

/// Wraps a closure as a named policy.
pub fn from_fn<F>(name: impl Into<String>, resolve: F) -> FnPolicy<F>
where
    F: Fn(&[Quad], &ClusterContext<'_>) -> Resolution + Send + Sync,
{
    FnPolicy {
        name: name.into(),
        resolve,
    }
}

impl<F> ResolutionPolicy for FnPolicy<F>
where
    F: Fn(&[Quad], &ClusterContext<'_>) -> Resolution + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn resolve(&self, cluster: &[Quad], context: &ClusterContext<'_>) -> Resolution {
        (self.resolve)(cluster, context)
    }
}

/// Scores used to derive the quality of resolved statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Score of graphs without an entry in `graph_scores`
    pub default_score: f64,
    /// How fast agreement between sources raises quality
    pub agree_coefficient: f64,
    pub graph_scores: BTreeMap<Identifier, f64>,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            default_score: 1.0,
            agree_coefficient: 4.0,
            graph_scores: BTreeMap::new(),
        }
    }
}

impl QualitySettings {
    pub fn graph_score(&self, graph: Option<&str>) -> f64 {
        graph
            .and_then(|graph| self.graph_scores.get(graph))
            .copied()
            .unwrap_or(self.default_score)
    }
}

/// Keeps every distinct value.
///
/// Emits one statement per distinct (subject, predicate, object); its graph is
/// the first contributing graph. Quality starts from the best contributing
/// graph score and rises with the share of sources that agree on the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllPolicy;

impl AllPolicy {
    pub const NAME: &'static str = "ALL";
}

impl ResolutionPolicy for AllPolicy {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn resolve(&self, cluster: &[Quad], context: &ClusterContext<'_>) -> Resolution {
        let mut values: BTreeMap<(&Term, &str, &Term), BTreeSet<Identifier>> = BTreeMap::new();
        for quad in cluster {
            let key = (quad.subject(), quad.predicate(), quad.object());
            let graphs = values.entry(key).or_default();
            if let Some(graph) = quad.graph() {
                graphs.insert(graph.to_string());
            }
        }

        let total_sources = context.source_graphs.len().max(1) as f64;
        let quality = context.quality;
        values
            .into_iter()
            .map(|((subject, predicate, object), graphs)| -> Result<_, PolicyError> {
                let base = graphs
                    .iter()
                    .map(|graph| context.graph_score(Some(graph.as_str())))
                    .reduce(f64::max)
                    .unwrap_or(quality.default_score);
                let support = graphs.len().saturating_sub(1) as f64 / total_sources;
                let agreement = 1.0 - 1.0 / (1.0 + quality.agree_coefficient * support);
                let score = (base + (1.0 - base) * agreement).clamp(0.0, 1.0);

                let graph = graphs.first().cloned();
                let quad = Quad::new(subject.clone(), predicate, object.clone(), graph)
                    .map_err(|source| PolicyError::Model {
                        policy: Self::NAME.to_string(),
                        source,
                    })?;
                Ok(ResolvedStatement::new(quad, score, graphs))
            })
            .collect()
    }
}

/// Names and per-property choices of resolution policies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub default: String,
    /// Predicate IRI -> policy name
    pub properties: BTreeMap<Identifier, String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default: AllPolicy::NAME.to_string(),
            properties: BTreeMap::new(),
        }
    }
}

/// Policy per canonical predicate, with a default for the rest.
pub struct PolicyRegistry {
    default: Box<dyn ResolutionPolicy>,
    by_property: HashMap<Identifier, Box<dyn ResolutionPolicy>>,
}

impl PolicyRegistry {
    pub fn new(default: impl ResolutionPolicy + 'static) -> Self {
        Self {
            default: Box::new(default),
            by_property: HashMap::new(),
        }
    }

    /// Registers `policy` for `predicate`, which must be a canonical IRI.
    #[must_use]
    pub fn with_property(
        mut self,
        predicate: impl Into<Identifier>,
        policy: impl ResolutionPolicy + 'static,
    ) -> Self {
        self.by_property.insert(predicate.into(), Box::new(policy));
        self
    }

    /// Built-in policy registered under `name`, case-insensitive.
    pub fn builtin(name: &str) -> Option<Box<dyn ResolutionPolicy>> {
        if name.eq_ignore_ascii_case(AllPolicy::NAME) {
            Some(Box::new(AllPolicy))
        } else {
            None
        }
    }

    /// Resolves every configured name; predicate keys are canonicalized.
    pub fn from_config(
        config: &PolicyConfig,
        mapping: &FrozenUriMapping,
    ) -> Result<Self, ConfigError> {
        if config.default.trim().is_empty() {
            return Err(ConfigError::MissingDefaultPolicy);
        }
        let default = Self::builtin(&config.default).ok_or_else(|| ConfigError::UnknownPolicy {
            name: config.default.clone(),
            scope: "the default".to_string(),
        })?;

        let mut by_property = HashMap::with_capacity(config.properties.len());
        for (predicate, name) in &config.properties {
            let policy = Self::builtin(name).ok_or_else(|| ConfigError::UnknownPolicy {
                name: name.clone(),
                scope: format!("<{predicate}>"),
            })?;
            by_property.insert(mapping.canonical(predicate).to_string(), policy);
        }

        Ok(Self {
            default,
            by_property,
        })
    }

    pub fn policy_for(&self, predicate: &str) -> &dyn ResolutionPolicy {
        self.by_property
            .get(predicate)
            .unwrap_or(&self.default)
            .as_ref()
    }

    pub fn default_policy(&self) -> &dyn ResolutionPolicy {
        self.default.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::CanonicalUriMapping;

    #[test]
    fn test_quality_uses_graph_scores() {
        let mut settings = QualitySettings::default();
        settings.graph_scores.insert("http://g/low".into(), 0.2);
        assert_eq!(settings.graph_score(Some("http://g/low")), 0.2);
        assert_eq!(settings.graph_score(Some("http://g/other")), 1.0);
        assert_eq!(settings.graph_score(None), 1.0);
    }

    #[test]
    fn test_registry_canonicalizes_property_keys() {
        let mut mapping = CanonicalUriMapping::with_preferred(["http://ex.org/name"]);
        mapping.add_link("http://other.org/label", "http://ex.org/name");
        let frozen = mapping.freeze();

        let config = PolicyConfig {
            default: "all".to_string(),
            properties: [("http://other.org/label".to_string(), "ALL".to_string())].into(),
        };
        let registry = PolicyRegistry::from_config(&config, &frozen).unwrap();
        assert!(registry.by_property.contains_key("http://ex.org/name"));
        assert_eq!(registry.policy_for("http://ex.org/unrelated").name(), "ALL");
    }

    #[test]
    fn test_unknown_and_missing_policies_are_rejected() {
        let frozen = FrozenUriMapping::empty();
        let unknown = PolicyConfig {
            default: "BEST".to_string(),
            properties: BTreeMap::new(),
        };
        assert!(matches!(
            PolicyRegistry::from_config(&unknown, &frozen),
            Err(ConfigError::UnknownPolicy { .. })
        ));

        let missing = PolicyConfig {
            default: String::new(),
            properties: BTreeMap::new(),
        };
        assert!(matches!(
            PolicyRegistry::from_config(&missing, &frozen),
            Err(ConfigError::MissingDefaultPolicy)
        ));
    }

    #[test]
    fn test_closure_policy_is_registered_per_property() {
        let first_only = from_fn("FIRST", |cluster: &[Quad], _: &ClusterContext<'_>| {
            let statements: Vec<_> = cluster
                .iter()
                .take(1)
                .map(|q| ResolvedStatement::new(q.clone(), 1.0, BTreeSet::new()))
                .collect();
            Ok(statements)
        });
        let registry = PolicyRegistry::new(AllPolicy).with_property("http://ex.org/p", first_only);
        assert_eq!(registry.policy_for("http://ex.org/p").name(), "FIRST");
        assert_eq!(registry.default_policy().name(), "ALL");
    }
}
