//! Configuration of a fusion run, loaded from JSON.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::Identifier;
use crate::fusion::output::OutputConfig;
use crate::fusion::policy::{PolicyConfig, PolicyRegistry, QualitySettings};
use crate::parsing::ParsePolicy;
use crate::sources::{RetryPolicy, SourceConfig};
use crate::storage::SortConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read configuration {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed configuration {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no default resolution policy configured")]
    MissingDefaultPolicy,
    #[error("unknown resolution policy `{name}` for {scope}")]
    UnknownPolicy { name: String, scope: String },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub sources: Vec<SourceConfig>,
    /// Files holding same-as links
    pub same_as: Vec<SourceConfig>,
    pub preferred_uris: Vec<Identifier>,
    /// One preferred IRI per line, e.g. the canonical file of a previous run
    pub preferred_uris_file: Option<PathBuf>,
    /// Predicates attaching the object's description to the subject's
    pub resource_description_links: Vec<Identifier>,
    pub sort: SortConfig,
    pub parse: ParsePolicy,
    pub quality: QualitySettings,
    pub policies: PolicyConfig,
    pub output: OutputConfig,
    pub retry: RetryPolicy,
}

impl FusionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Checks everything that can be checked before touching the inputs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(invalid("no input sources configured"));
        }
        for source in self.sources.iter().chain(&self.same_as) {
            source
                .resolved_format()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }

        if self.sort.memory_budget_bytes == 0 {
            return Err(invalid("sort.memory_budget_bytes must be positive"));
        }
        if self.sort.max_temp_files == 0 {
            return Err(invalid("sort.max_temp_files must be positive"));
        }

        let graph_scores = self.quality.graph_scores.values();
        let scores = std::iter::once(("default_score", self.quality.default_score))
            .chain(graph_scores.map(|score| ("graph_scores", *score)));
        for (field, score) in scores {
            if !(0.0..=1.0).contains(&score) {
                let message = format!("quality.{field} must be within [0, 1], got {score}");
                return Err(ConfigError::Invalid(message));
            }
        }
        if !self.quality.agree_coefficient.is_finite() || self.quality.agree_coefficient < 0.0 {
            return Err(invalid("quality.agree_coefficient must be non-negative"));
        }

        if self.policies.default.trim().is_empty() {
            return Err(ConfigError::MissingDefaultPolicy);
        }
        let properties = self.policies.properties.iter();
        let names = std::iter::once(("the default".to_string(), &self.policies.default))
            .chain(properties.map(|(key, name)| (format!("<{key}>"), name)));
        for (scope, name) in names {
            if PolicyRegistry::builtin(name).is_none() {
                return Err(ConfigError::UnknownPolicy {
                    name: name.clone(),
                    scope,
                });
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::output::OutputFormat;
    use crate::parsing::ParseErrorKind;

    fn minimal() -> FusionConfig {
        FusionConfig {
            sources: vec![SourceConfig::new("data.nq")],
            ..FusionConfig::default()
        }
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusion.json");
        fs::write(
            &path,
            r#"{
                "sources": [{"path": "a.ttl"}, {"path": "b.data", "format": "nquads"}],
                "parse": {"skippable": ["missing_dot"]},
                "policies": {"properties": {"http://ex.org/name": "all"}},
                "output": {"format": "trig", "max_statements": 10}
            }"#,
        )
        .unwrap();

        let config = FusionConfig::from_file(&path).unwrap();
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sort, SortConfig::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.policies.default, "ALL");
        assert_eq!(config.output.format, OutputFormat::TriG);
        assert_eq!(config.output.max_statements, Some(10));
        assert!(config.parse.skippable.contains(&ParseErrorKind::MissingDot));
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusion.json");
        fs::write(&path, "{ sources: ").unwrap();
        let malformed = FusionConfig::from_file(&path);
        assert!(matches!(malformed, Err(ConfigError::Parse { .. })));
        let missing = FusionConfig::from_file(dir.path().join("none.json"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let empty = FusionConfig::default();
        assert!(matches!(empty.validate(), Err(ConfigError::Invalid(_))));

        let mut unknown_format = minimal();
        unknown_format.sources.push(SourceConfig::new("notes.txt"));
        assert!(matches!(unknown_format.validate(), Err(ConfigError::Invalid(_))));

        let mut no_budget = minimal();
        no_budget.sort.memory_budget_bytes = 0;
        assert!(matches!(no_budget.validate(), Err(ConfigError::Invalid(_))));

        let mut scored = minimal();
        scored.quality.graph_scores.insert("http://g".into(), 1.5);
        assert!(matches!(scored.validate(), Err(ConfigError::Invalid(_))));

        let mut unknown_policy = minimal();
        let properties = &mut unknown_policy.policies.properties;
        properties.insert("http://ex.org/p".into(), "VOTE".into());
        let err = unknown_policy.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown resolution policy `VOTE` for <http://ex.org/p>"
        );

        let mut blank = minimal();
        blank.policies.default = " ".to_string();
        assert!(matches!(blank.validate(), Err(ConfigError::MissingDefaultPolicy)));
    }
}
