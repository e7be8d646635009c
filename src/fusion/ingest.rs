//! Turns raw quads into the canonical statement stream.
//!
//! ```text
//! Idle -> WritingTemp -> Sorting -> Merging -> Streaming -> Done
//!                 \__________\__________\___________\-----> Failed
//! ```
//!
//! Every quad is written to the primary file as
//! `(canonical subject, subject, predicate, object, graph)`. Quads whose
//! canonical predicate is a resource-description link also go to the
//! attribute file as `(canonical object, canonical subject)`. Both files are
//! sorted, the attribute rows are joined with the primary rows to copy each
//! dependent resource's statements under the key of the resource linking to
//! it, and the joined rows are merged back into the primary order.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;

use crate::core::{Identifier, Quad, Term, Tuple};
use crate::error::{FusionError, Result, Stage, StageContext};
use crate::mapping::{FrozenUriMapping, IdentifierMapping};
use crate::parsing::{TupleReader, TupleWriter};
use crate::sources::QuadSource;
use crate::storage::external_sort::{SortedStream, TupleSorter};
use crate::storage::merge_join::{StreamMerger, TransformError};
use crate::storage::run_format::{TupleRunFormat, TupleRunReader};
use crate::storage::util::{create_scope, release_scope, SortConfig};
use crate::storage::ExternalSorter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    WritingTemp,
    Sorting,
    Merging,
    Streaming,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub sources: u64,
    pub quads_read: u64,
    pub primary_rows: u64,
    pub attribute_rows: u64,
    pub dependent_rows: u64,
    pub sort_runs: usize,
    pub stream_rows: u64,
}

/// One row of the canonical statement stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRow {
    /// Canonical resource whose description the quad belongs to
    pub key: Term,
    /// The quad as read, graph filled in
    pub quad: Quad,
}

type FinalStream = SortedStream<Tuple, fn(&Tuple, &Tuple) -> Ordering, TupleRunReader>;

pub struct FusionIngestPipeline<'m> {
    mapping: &'m FrozenUriMapping,
    sort: SortConfig,
    link_predicates: BTreeSet<Identifier>,
    state: PipelineState,
    stats: IngestStats,
}

struct TempFiles {
    primary: PathBuf,
    attributes: PathBuf,
    primary_sorted: PathBuf,
    attributes_sorted: PathBuf,
    joined: PathBuf,
    joined_sorted: PathBuf,
}

impl TempFiles {
    fn new(dir: &Path) -> Self {
        Self {
            primary: dir.join("primary.tmp"),
            attributes: dir.join("attributes.tmp"),
            primary_sorted: dir.join("primary.sorted"),
            attributes_sorted: dir.join("attributes.sorted"),
            joined: dir.join("dependents.tmp"),
            joined_sorted: dir.join("dependents.sorted"),
        }
    }
}

impl<'m> FusionIngestPipeline<'m> {
    pub fn new(mapping: &'m FrozenUriMapping, sort: SortConfig) -> Self {
        Self {
            mapping,
            sort,
            link_predicates: BTreeSet::new(),
            state: PipelineState::Idle,
            stats: IngestStats::default(),
        }
    }

    /// Predicates whose object's description is attached to the subject's.
    #[must_use]
    pub fn with_link_predicates<I, S>(mut self, predicates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.link_predicates = predicates
            .into_iter()
            .map(|p| self.mapping.canonical(p.as_ref()).to_string())
            .collect();
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::info!(from = %self.state, to = %next, "ingest pipeline state change");
        self.state = next;
    }

    /// Reads all `sources` and returns the sorted canonical statement stream.
    pub fn run<S, I>(&mut self, sources: I) -> Result<CanonicalStatementStream>
    where
        S: QuadSource,
        I: IntoIterator<Item = S>,
    {
        let result = self.run_stages(sources);
        if result.is_err() {
            self.transition(PipelineState::Failed);
        }
        result
    }

    fn run_stages<S, I>(&mut self, sources: I) -> Result<CanonicalStatementStream>
    where
        S: QuadSource,
        I: IntoIterator<Item = S>,
    {
        self.stats = IngestStats::default();
        self.transition(PipelineState::WritingTemp);
        let scope = create_scope(&self.sort, "quadfuse-ingest-")
            .stage(Stage::Ingest, "creating scratch directory")?;
        let files = TempFiles::new(scope.path());
        self.write_temp_files(sources, &files)?;

        self.transition(PipelineState::Sorting);
        let sorter = TupleSorter::for_tuples(self.sort.clone()).distinct(true);
        self.sort_file(&sorter, &files.primary, &files.primary_sorted, 5)?;
        self.sort_file(&sorter, &files.attributes, &files.attributes_sorted, 2)?;

        self.transition(PipelineState::Merging);
        self.join_dependents(&files)?;
        self.sort_file(&sorter, &files.joined, &files.joined_sorted, 5)?;
        let merger = ExternalSorter::new(
            self.sort.clone(),
            Ord::cmp as fn(&Tuple, &Tuple) -> Ordering,
            TupleRunFormat::with_arity(5),
        )
        .distinct(true);
        let rows = merger
            .merge_sorted(&[&files.primary_sorted, &files.joined_sorted])
            .stage(Stage::Merge, "merging own and dependent statements")?;

        self.transition(PipelineState::Streaming);
        tracing::info!(
            quads = self.stats.quads_read,
            attribute_rows = self.stats.attribute_rows,
            dependent_rows = self.stats.dependent_rows,
            runs = self.stats.sort_runs,
            "canonical statement stream ready"
        );
        Ok(CanonicalStatementStream {
            rows: Some(rows),
            scope: Some(scope),
            state: PipelineState::Streaming,
            stats: self.stats,
        })
    }

    fn write_temp_files<S, I>(&mut self, sources: I, files: &TempFiles) -> Result<()>
    where
        S: QuadSource,
        I: IntoIterator<Item = S>,
    {
        let create = |path: &Path| {
            TupleWriter::create(path).stage(Stage::Ingest, format!("creating {}", path.display()))
        };
        let mut primary = create(&files.primary)?;
        let mut attributes = create(&files.attributes)?;

        for mut source in sources {
            let name = source.name().to_string();
            let default_graph = source.default_graph().to_string();
            let _span = tracing::info_span!("source", name = %name).entered();
            self.stats.sources += 1;

            let mut read = 0u64;
            for quad in &mut source {
                let quad = quad.stage(Stage::Ingest, format!("reading {name}"))?;
                self.write_quad(quad, &default_graph, &mut primary, &mut attributes)
                    .stage(Stage::Ingest, format!("writing rows of {name}"))?;
                read += 1;
            }
            self.stats.quads_read += read;
            tracing::info!(quads = read, "source ingested");
        }

        primary
            .finish()
            .stage(Stage::Ingest, "flushing primary rows")?;
        attributes
            .finish()
            .stage(Stage::Ingest, "flushing attribute rows")?;
        Ok(())
    }

    fn write_quad(
        &mut self,
        quad: Quad,
        default_graph: &str,
        primary: &mut TupleWriter<BufWriter<File>>,
        attributes: &mut TupleWriter<BufWriter<File>>,
    ) -> io::Result<()> {
        let subject = self.mapping.map_term(quad.subject());
        let predicate = self.mapping.canonical(quad.predicate());
        if self.link_predicates.contains(predicate) && quad.object().is_resource() {
            let object = self.mapping.map_term(quad.object());
            if object != subject {
                attributes.write(&[object, subject.clone()])?;
                self.stats.attribute_rows += 1;
            }
        }

        let (s, p, o, g) = quad.into_parts();
        let graph = g.unwrap_or_else(|| default_graph.to_string());
        primary.write(&[subject, s, Term::Uri(p), o, Term::Uri(graph)])?;
        self.stats.primary_rows += 1;
        Ok(())
    }

    fn sort_file(
        &mut self,
        sorter: &TupleSorter,
        input: &Path,
        output: &Path,
        arity: usize,
    ) -> Result<()> {
        let context = || format!("sorting {}", input.display());
        let size = fs::metadata(input).stage(Stage::Sort, context())?.len();
        let rows = TupleReader::open(input)
            .stage(Stage::Sort, context())?
            .with_arity(arity..=arity);
        let stats = sorter
            .sort_to_file(rows, Some(size), output)
            .stage(Stage::Sort, context())?;

        self.stats.sort_runs += stats.runs;
        tracing::debug!(
            file = %input.display(),
            records_in = stats.records_in,
            records_out = stats.records_out,
            runs = stats.runs,
            batch_limit = stats.batch_limit,
            "sorted temporary file"
        );
        Ok(())
    }

    fn join_dependents(&mut self, files: &TempFiles) -> Result<()> {
        let open = |path: &Path, arity: usize| {
            TupleReader::open(path)
                .map(|reader| reader.with_arity(arity..=arity))
                .stage(Stage::Merge, format!("opening {}", path.display()))
        };
        let attributes = open(&files.attributes_sorted, 2)?;
        let primary = open(&files.primary_sorted, 5)?;

        let mut writer =
            TupleWriter::create(&files.joined).stage(Stage::Merge, "creating dependent rows")?;
        let joined = StreamMerger::new(attributes, primary, rekey_dependent)
            .write_to(&mut writer)
            .stage(Stage::Merge, "joining attribute and primary rows")?;
        writer
            .finish()
            .stage(Stage::Merge, "flushing dependent rows")?;

        self.stats.dependent_rows = joined;
        Ok(())
    }
}

/// `(X, P)` joined with `(X, s, p, o, g)` gives `(P, s, p, o, g)`.
fn rekey_dependent(
    attribute: &Tuple,
    primary: &Tuple,
) -> std::result::Result<Tuple, TransformError> {
    match (attribute.terms(), primary.terms()) {
        ([_, parent], [_, rest @ ..]) if rest.len() == 4 => {
            let mut terms = Vec::with_capacity(5);
            terms.push(parent.clone());
            terms.extend_from_slice(rest);
            Ok(Tuple::new(terms))
        }
        (a, p) => {
            let message = format!("expected 2 and 5 terms, got {} and {}", a.len(), p.len());
            Err(message.into())
        }
    }
}

/// Sorted canonical statements; owns the scratch directory of the run.
///
/// Dropping the stream removes every temporary file.
pub struct CanonicalStatementStream {
    rows: Option<FinalStream>,
    scope: Option<TempDir>,
    state: PipelineState,
    stats: IngestStats,
}

impl CanonicalStatementStream {
    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    fn decode(row: Tuple) -> Result<CanonicalRow> {
        let [key, subject, predicate, object, graph] =
            row.into_array::<5>().stage(Stage::Stream, "decoding row")?;
        let quad = Quad::from_terms(subject, predicate, object, Some(graph))
            .stage(Stage::Stream, "decoding row")?;
        Ok(CanonicalRow { key, quad })
    }
}

impl Iterator for CanonicalStatementStream {
    type Item = Result<CanonicalRow>;

    fn next(&mut self) -> Option<Self::Item> {
        let rows = self.rows.as_mut()?;
        match rows.next() {
            Some(Ok(row)) => {
                self.stats.stream_rows += 1;
                let decoded = Self::decode(row);
                if decoded.is_err() {
                    self.state = PipelineState::Failed;
                    self.rows = None;
                }
                Some(decoded)
            }
            Some(Err(source)) => {
                self.state = PipelineState::Failed;
                self.rows = None;
                Some(Err(FusionError::Stage {
                    stage: Stage::Stream,
                    context: "reading canonical statement stream".to_string(),
                    source: source.into(),
                }))
            }
            None => {
                tracing::info!(
                    from = %self.state,
                    to = %PipelineState::Done,
                    rows = self.stats.stream_rows,
                    "ingest pipeline state change"
                );
                self.state = PipelineState::Done;
                self.rows = None;
                None
            }
        }
    }
}

impl Drop for CanonicalStatementStream {
    fn drop(&mut self) {
        self.rows = None;
        if let Some(scope) = self.scope.take() {
            release_scope(scope);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::CanonicalUriMapping;
    use crate::sources::MemoryQuadSource;

    const ADDRESS: &str = "http://ex.org/address";

    fn quad(s: &str, p: &str, o: Term, g: Option<&str>) -> Quad {
        Quad::new(Term::uri(s), p, o, g.map(str::to_string)).unwrap()
    }

    fn config(dir: &Path) -> SortConfig {
        SortConfig {
            memory_budget_bytes: 512,
            max_temp_files: 4,
            temp_dir: Some(dir.to_path_buf()),
        }
    }

    #[test]
    fn test_rows_are_keyed_by_canonical_subject() {
        let dir = tempfile::tempdir().unwrap();
        let mut mapping = CanonicalUriMapping::new();
        mapping.add_link("http://a", "http://b");
        let mapping = mapping.freeze();

        let source = MemoryQuadSource::new(
            "memory",
            "http://default",
            vec![
                quad("http://b", "http://p", Term::literal("1"), None),
                quad("http://c", "http://p", Term::literal("2"), Some("http://g")),
                quad("http://a", "http://p", Term::literal("3"), Some("http://g")),
            ],
        );
        let mut pipeline = FusionIngestPipeline::new(&mapping, config(dir.path()));
        let stream = pipeline.run([source]).unwrap();
        assert_eq!(pipeline.state(), PipelineState::Streaming);

        let rows: Vec<CanonicalRow> = stream.map(Result::unwrap).collect();
        let keys: Vec<&Term> = rows.iter().map(|row| &row.key).collect();
        let (a, c) = (Term::uri("http://a"), Term::uri("http://c"));
        assert_eq!(keys, vec![&a, &a, &c]);
        assert_eq!(rows[1].quad.graph(), Some("http://default"));
    }

    #[test]
    fn test_dependent_statements_follow_their_parent() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = FrozenUriMapping::empty();
        let source = MemoryQuadSource::new(
            "memory",
            "http://g",
            vec![
                quad("http://person", ADDRESS, Term::uri("http://addr"), None),
                quad("http://addr", "http://city", Term::literal("Prague"), None),
                quad("http://person", "http://name", Term::literal("Ann"), None),
            ],
        );
        let mut pipeline =
            FusionIngestPipeline::new(&mapping, config(dir.path())).with_link_predicates([ADDRESS]);
        let mut stream = pipeline.run([source]).unwrap();
        let rows: Vec<CanonicalRow> = stream.by_ref().map(Result::unwrap).collect();

        assert_eq!(stream.state(), PipelineState::Done);
        assert_eq!(stream.stats().dependent_rows, 1);
        let person_rows: Vec<&Quad> = rows
            .iter()
            .filter(|row| row.key == Term::uri("http://person"))
            .map(|row| &row.quad)
            .collect();
        let addr = Term::uri("http://addr");
        assert_eq!(person_rows.len(), 3);
        assert!(person_rows.iter().any(|quad| quad.subject() == &addr));
        assert_eq!(rows.len(), 4);
    }

    #[test]
    fn test_scratch_directory_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = FrozenUriMapping::empty();
        let quads = vec![quad("http://s", "http://p", Term::literal("v"), None)];
        let source = MemoryQuadSource::new("m", "http://g", quads);

        let stream = FusionIngestPipeline::new(&mapping, config(dir.path()))
            .run([source])
            .unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        drop(stream);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_rekey_rejects_wrong_arity() {
        let short = Tuple::new(vec![Term::uri("http://x")]);
        assert!(rekey_dependent(&short, &short).is_err());
    }
}
