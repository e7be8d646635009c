//! quadfuse - fuses RDF quads from many sources into one conflict-resolved dataset.
//!
//! Usage:
//!   quadfuse --config fusion.json
//!   quadfuse --input a.nq --input b.ttl --same-as links.nt --output fused.nq
//!   quadfuse --config fusion.json --format trig --memory-budget 1073741824 --temp-dir /scratch

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use quadfuse::config::FusionConfig;
use quadfuse::fusion::{FusionExecutor, OutputFormat};
use quadfuse::sources::SourceConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quadfuse")]
#[command(about = "Fuse RDF quads from many sources, resolving conflicts per predicate")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file, added to the configured sources (repeatable)
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// File with owl:sameAs links or identifier pairs (repeatable)
    #[arg(long)]
    same_as: Vec<PathBuf>,

    /// Output file, standard output when neither this nor the config sets one
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format: nquads or trig
    #[arg(short, long)]
    format: Option<OutputFormat>,

    /// Sort memory budget in bytes
    #[arg(long)]
    memory_budget: Option<usize>,

    /// Directory for temporary files
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<FusionConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => FusionConfig::from_file(path)?,
            None => FusionConfig::default(),
        };
        let inputs = self.input.into_iter().map(SourceConfig::new);
        config.sources.extend(inputs);
        let links = self.same_as.into_iter().map(SourceConfig::new);
        config.same_as.extend(links);
        if let Some(output) = self.output {
            config.output.path = Some(output);
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        if let Some(budget) = self.memory_budget {
            config.sort.memory_budget_bytes = budget;
        }
        if let Some(temp_dir) = self.temp_dir {
            config.sort.temp_dir = Some(temp_dir);
        }
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quadfuse=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Args::parse().into_config()?;

    let should_stop = Arc::new(AtomicBool::new(false));
    let should_stop_clone = Arc::clone(&should_stop);
    ctrlc::set_handler(move || {
        eprintln!("\nReceived Ctrl+C, stopping...");
        should_stop_clone.store(true, Ordering::Relaxed);
    })?;

    let stats = FusionExecutor::new(config)
        .with_cancellation(should_stop)
        .run()?;

    eprintln!("\nFusion Complete!");
    eprintln!("================");
    eprintln!("Quads read:         {}", stats.quads_read);
    eprintln!("Same-as links:      {}", stats.same_as_links);
    eprintln!("Identifier classes: {}", stats.identifier_classes);
    eprintln!("Descriptions:       {}", stats.descriptions);
    eprintln!("Clusters:           {}", stats.clusters);
    eprintln!("Duplicates removed: {}", stats.duplicates_removed);
    eprintln!("Statements written: {}", stats.statements_written);
    if stats.statements_dropped > 0 {
        let dropped = stats.statements_dropped;
        eprintln!("Statements dropped: {dropped} (output limit)");
    }
    eprintln!("Elapsed time:       {:.2}s", stats.duration.as_secs_f64());

    Ok(())
}
