//! Conflict clustering, resolution and output of a fusion run.

pub mod clusterer;
pub mod executor;
pub mod ingest;
pub mod output;
pub mod policy;

pub use clusterer::{ClusterContext, ClusterStats, ConflictClusterer, ResourceDescription};
pub use executor::{FusionExecutor, FusionStats};
pub use ingest::{
    CanonicalRow, CanonicalStatementStream, FusionIngestPipeline, IngestStats, PipelineState,
};
pub use output::{
    MetadataSink, NQuadsSink, OutputConfig, OutputError, OutputFormat, OutputSink, OutputStats,
    OutputWriter, TriGSink,
};
pub use policy::{
    from_fn, AllPolicy, FnPolicy, PolicyConfig, PolicyError, PolicyRegistry, QualitySettings,
    Resolution, ResolutionPolicy,
};
