//! A complete fusion run, from configuration to written outputs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::FusionConfig;
use crate::error::{FusionError, Result, Stage, StageContext};
use crate::fusion::clusterer::ConflictClusterer;
use crate::fusion::ingest::FusionIngestPipeline;
use crate::fusion::output::OutputWriter;
use crate::fusion::policy::PolicyRegistry;
use crate::mapping::{
    read_identifier_file, write_canonical_identifiers, write_same_as_links, CanonicalUriMapping,
    FrozenUriMapping,
};
use crate::sources::{load_same_as_file, FileQuadSource};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FusionStats {
    pub quads_read: u64,
    pub same_as_links: u64,
    pub identifier_classes: usize,
    pub descriptions: u64,
    pub clusters: u64,
    pub duplicates_removed: u64,
    pub statements_written: u64,
    /// Resolved statements beyond the output cap
    pub statements_dropped: u64,
    pub duration: Duration,
}

pub struct FusionExecutor {
    config: FusionConfig,
    cancel: Arc<AtomicBool>,
}

impl FusionExecutor {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares `flag` with the caller; setting it stops the run between resource descriptions.
    #[must_use]
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(FusionError::Cancelled);
        }
        Ok(())
    }

    pub fn run(&self) -> Result<FusionStats> {
        let started = Instant::now();
        let config = &self.config;
        config.validate()?;

        let mut stats = FusionStats::default();
        let mapping = {
            let _span = tracing::info_span!("same_as").entered();
            self.build_mapping(&mut stats)?
        };
        let registry = PolicyRegistry::from_config(&config.policies, &mapping)?;
        self.check_cancelled()?;

        let sources = config
            .sources
            .iter()
            .enumerate()
            .map(|(index, source)| {
                FileQuadSource::open(source, index, &config.parse, &config.retry)
                    .stage(Stage::Ingest, format!("opening {}", source.path.display()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stream = {
            let _span = tracing::info_span!("ingest").entered();
            FusionIngestPipeline::new(&mapping, config.sort.clone())
                .with_link_predicates(&config.resource_description_links)
                .run(sources)?
        };
        self.check_cancelled()?;

        let mut output =
            OutputWriter::from_config(&config.output).stage(Stage::Output, "opening outputs")?;
        let cluster_stats = {
            let _span = tracing::info_span!("resolve").entered();
            ConflictClusterer::new(&mapping, &registry, &config.quality)
                .with_cancellation(self.cancel_flag())
                .run(&mut stream, |statement| {
                    output
                        .accept(&statement)
                        .map(drop)
                        .stage(Stage::Output, "writing resolved statement")
                })?
        };
        stats.quads_read = stream.stats().quads_read;
        drop(stream);

        let output_stats = output.close().stage(Stage::Output, "closing outputs")?;
        self.write_identifier_files(&mapping)?;

        stats.descriptions = cluster_stats.descriptions;
        stats.clusters = cluster_stats.clusters;
        stats.duplicates_removed = cluster_stats.duplicates_removed;
        stats.statements_written = output_stats.written;
        stats.statements_dropped = output_stats.dropped;
        stats.duration = started.elapsed();

        tracing::info!(
            quads = stats.quads_read,
            clusters = stats.clusters,
            written = stats.statements_written,
            dropped = stats.statements_dropped,
            elapsed_ms = stats.duration.as_millis() as u64,
            "fusion finished"
        );
        Ok(stats)
    }

    fn build_mapping(&self, stats: &mut FusionStats) -> Result<FrozenUriMapping> {
        let config = &self.config;
        let mut mapping = CanonicalUriMapping::with_preferred(&config.preferred_uris);
        if let Some(path) = &config.preferred_uris_file {
            let context = format!("reading preferred URIs from {}", path.display());
            let preferred = read_identifier_file(path).stage(Stage::Config, context)?;
            let count = preferred.len();
            tracing::info!(path = %path.display(), count, "loaded preferred URIs");
            for id in preferred {
                mapping.add_preferred(id);
            }
        }

        let first_index = config.sources.len();
        for (offset, source) in config.same_as.iter().enumerate() {
            self.check_cancelled()?;
            let index = first_index + offset;
            let context = format!("loading same-as links from {}", source.path.display());
            let links = load_same_as_file(source, index, &config.parse, &config.retry, &mut mapping)
                .stage(Stage::Ingest, context)?;
            stats.same_as_links += links;
        }

        let frozen = mapping.freeze();
        stats.identifier_classes = frozen.alternatives().num_classes();
        tracing::info!(
            identifiers = frozen.len(),
            classes = stats.identifier_classes,
            links = stats.same_as_links,
            "identifier mapping frozen"
        );
        Ok(frozen)
    }

    fn write_identifier_files(&self, mapping: &FrozenUriMapping) -> Result<()> {
        let output = &self.config.output;
        if let Some(path) = &output.canonical_uris_path {
            let context = format!("writing canonical URIs to {}", path.display());
            let count = write_canonical_identifiers(mapping, path).stage(Stage::Output, context)?;
            tracing::info!(path = %path.display(), count, "canonical URIs written");
        }
        if let Some(path) = &output.same_as_path {
            let context = format!("writing same-as links to {}", path.display());
            let count = write_same_as_links(mapping, path).stage(Stage::Output, context)?;
            tracing::info!(path = %path.display(), count, "same-as links written");
        }
        Ok(())
    }
}
