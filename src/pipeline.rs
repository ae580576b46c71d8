//! End-to-end surveillance run: sample discovery, per-sample aggregation,
//! scoring and export on a worker pool, then the shared matrix and the
//! lineage summary.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::config::{ConfigError, PipelineConfig};
use crate::export::{
    persist_all, write_atomically, write_matrix_csv, write_summary_csv, ExportError,
    PileupExportKind, PileupExporter,
};
use crate::genomics::{
    AggregationError, AggregationStats, BamPileupSource, PileupAggregator, PileupSource,
    PileupSourceError, PileupTable, ReferenceError, ReferenceSequence,
};
use crate::surveillance::{
    CatalogError, LineageMutationTable, MatrixError, MutationCatalog, MutationScorer,
    SampleFrequencyMatrix, SurveillanceAggregator, SurveillanceSummary,
};

/// File-name suffixes stripped to obtain a sample id, longest first.
pub const SAMPLE_SUFFIXES: [&str; 3] = [".mapped.sorted.bam", ".sorted.bam", ".bam"];

/// Failure confined to one sample; the run continues without it.
#[derive(Debug, Error)]
pub enum SampleError {
    /// The alignments could not be opened or aggregated.
    #[error("sample '{sample}': pileup failed: {source}")]
    SamplePileupFailure {
        /// Sample id.
        sample: String,
        /// Underlying failure.
        #[source]
        source: AggregationError,
    },
    /// The counts could not be joined with the reference.
    #[error("sample '{sample}': {source}")]
    Reference {
        /// Sample id.
        sample: String,
        /// Underlying failure.
        #[source]
        source: ReferenceError,
    },
    /// A per-sample table could not be written.
    #[error("sample '{sample}': export failed: {source}")]
    Export {
        /// Sample id.
        sample: String,
        /// Underlying failure.
        #[source]
        source: ExportError,
    },
}

impl SampleError {
    /// Sample the failure belongs to.
    pub fn sample(&self) -> &str {
        match self {
            SampleError::SamplePileupFailure { sample, .. }
            | SampleError::Reference { sample, .. }
            | SampleError::Export { sample, .. } => sample,
        }
    }
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Reference missing or of the wrong length.
    #[error(transparent)]
    Reference(#[from] ReferenceError),
    /// Catalog unreadable.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// A directory could not be listed or created.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The sample directory holds no alignment files.
    #[error("no alignment files found in {0}")]
    NoSamples(PathBuf),
    /// A sample column could not be appended.
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    /// The matrix or summary could not be written.
    #[error(transparent)]
    Export(#[from] ExportError),
    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// One alignment file to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleInput {
    /// Sample id derived from the file name.
    pub id: String,
    /// Alignment file.
    pub path: PathBuf,
}

/// Sample id for an alignment file, `None` when the name carries no known
/// suffix.
pub fn sample_id(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    SAMPLE_SUFFIXES.iter().find_map(|suffix| {
        name.strip_suffix(suffix)
            .filter(|stem| !stem.is_empty())
            .map(str::to_string)
    })
}

/// Alignment files in `dir`, sorted by sample id. When two files map to the
/// same id the one whose path sorts first is kept.
pub fn discover_samples<P: AsRef<Path>>(dir: P) -> Result<Vec<SampleInput>, PipelineError> {
    let dir = dir.as_ref();
    let io_err = |source| PipelineError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    let mut samples: Vec<SampleInput> = Vec::new();
    for path in paths {
        let Some(id) = sample_id(&path) else { continue };
        if let Some(kept) = samples.iter().find(|sample| sample.id == id) {
            warn!(
                sample = %id,
                kept = %kept.path.display(),
                skipped = %path.display(),
                "duplicate sample id"
            );
            continue;
        }
        samples.push(SampleInput { id, path });
    }
    samples.sort_by(|left, right| left.id.cmp(&right.id));
    Ok(samples)
}

/// Locations of every output file under one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Output root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scored catalog rows with one column per sample.
    pub fn monitored_mutations(&self) -> PathBuf {
        self.root.join("monitored_mutations.csv")
    }

    /// Lineage summary.
    pub fn surveillance_table(&self) -> PathBuf {
        self.root.join("surveillance_table.csv")
    }

    /// Full pileup table of a sample.
    pub fn full_pileup(&self, sample: &str) -> PathBuf {
        self.root.join("pileups").join(format!("{sample}.csv"))
    }

    /// Mutations-only pileup table of a sample.
    pub fn mutations_pileup(&self, sample: &str) -> PathBuf {
        self.root.join("mutationsPileups").join(format!("{sample}.csv"))
    }

    /// Create the output directories.
    pub fn prepare(&self) -> Result<(), PipelineError> {
        for dir in [
            self.root.clone(),
            self.root.join("pileups"),
            self.root.join("mutationsPileups"),
        ] {
            fs::create_dir_all(&dir).map_err(|source| PipelineError::Io { path: dir, source })?;
        }
        Ok(())
    }
}

/// Result of one successfully processed sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    /// Sample id.
    pub sample: String,
    /// Scored frequency per mutation row.
    pub values: Vec<Option<f64>>,
    /// Aggregation counters.
    pub stats: AggregationStats,
}

/// Outcome of a full run.
#[derive(Debug)]
pub struct RunReport {
    /// Samples appended to the matrix, in column order.
    pub processed: Vec<String>,
    /// Samples left out, with the reason.
    pub skipped: Vec<SampleError>,
    /// Aggregation counters of every processed sample, in column order.
    pub sample_stats: Vec<(String, AggregationStats)>,
    /// Fingerprint of the mutation rows the matrix was built on.
    pub catalog_fingerprint: String,
    /// Scored matrix.
    pub matrix: SampleFrequencyMatrix,
    /// Lineage summary.
    pub summary: SurveillanceSummary,
}

/// A configured surveillance pipeline over one reference and one catalog.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    reference: Arc<ReferenceSequence>,
    mutations: Arc<LineageMutationTable>,
}

impl Pipeline {
    /// Validate the configuration and reference, and explode the catalog.
    pub fn new(
        config: PipelineConfig,
        reference: ReferenceSequence,
        catalog: &MutationCatalog,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if reference.len() != config.genome_length {
            return Err(ReferenceError::LengthMismatch {
                name: reference.name().to_string(),
                expected: config.genome_length,
                actual: reference.len(),
            }
            .into());
        }

        let mut mutations = catalog.explode();
        if config.sort_mutation_rows {
            mutations = mutations.sorted_by_lineage_and_gene();
        }
        debug!(
            rows = mutations.len(),
            lineages = mutations.lineages().len(),
            "mutation table ready"
        );

        Ok(Self {
            config,
            reference: Arc::new(reference),
            mutations: Arc::new(mutations),
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Reference genome.
    pub fn reference(&self) -> &ReferenceSequence {
        &self.reference
    }

    /// Mutation rows every sample is scored against.
    pub fn mutations(&self) -> &Arc<LineageMutationTable> {
        &self.mutations
    }

    fn exporter(&self) -> PileupExporter {
        PileupExporter::new(self.config.pileup_filter, self.config.export_symbol_frequencies)
    }

    /// Aggregate a source and derive its frequency table.
    pub fn pileup_table<S: PileupSource + ?Sized>(
        &self,
        sample: &str,
        source: &mut S,
    ) -> Result<PileupTable, SampleError> {
        let counts = PileupAggregator::new(self.config.genome_length)
            .aggregate(source)
            .map_err(|source| SampleError::SamplePileupFailure {
                sample: sample.to_string(),
                source,
            })?;
        PileupTable::derive(&counts, &self.reference).map_err(|source| SampleError::Reference {
            sample: sample.to_string(),
            source,
        })
    }

    /// Write a sample's pileup exports into `layout`. Both tables are staged
    /// first; neither lands unless both can.
    pub fn export_pileups(
        &self,
        sample: &str,
        table: &PileupTable,
        layout: &OutputLayout,
    ) -> Result<(), SampleError> {
        let exporter = self.exporter();
        let wrap = |source| SampleError::Export {
            sample: sample.to_string(),
            source,
        };
        let mut staged = Vec::with_capacity(2);
        if self.config.export_full_pileups {
            staged.push(
                exporter
                    .stage(layout.full_pileup(sample), table, PileupExportKind::Full)
                    .map_err(wrap)?,
            );
        }
        staged.push(
            exporter
                .stage(
                    layout.mutations_pileup(sample),
                    table,
                    PileupExportKind::MutationsOnly,
                )
                .map_err(wrap)?,
        );
        persist_all(staged).map_err(wrap)
    }

    /// Process one sample: aggregate, derive, optionally export, and score.
    pub fn process_sample<S: PileupSource + ?Sized>(
        &self,
        sample: &str,
        source: &mut S,
        layout: Option<&OutputLayout>,
    ) -> Result<SampleResult, SampleError> {
        let _span = info_span!("sample", sample = %sample).entered();
        let table = self.pileup_table(sample, source)?;
        let unrecognized = table.stats().unrecognized_calls;
        if unrecognized > 0 {
            warn!(
                sample = %sample,
                unrecognized,
                "base calls outside ACGTN were not counted"
            );
        }
        if let Some(layout) = layout {
            self.export_pileups(sample, &table, layout)?;
        }
        let values = MutationScorer::new(self.config.depth_threshold)
            .score_sample(&self.mutations, &table);
        let stats = *table.stats();
        debug!(
            sample,
            visited = stats.visited_positions,
            observations = stats.observations,
            "sample scored"
        );
        Ok(SampleResult {
            sample: sample.to_string(),
            values,
            stats,
        })
    }

    /// Process every sample in parallel and write the run outputs.
    ///
    /// `open` builds the pileup source of one sample. Sample failures are
    /// collected into the report; columns are appended in sample id order.
    pub fn run<F, S>(
        &self,
        samples: &[SampleInput],
        open: F,
        layout: &OutputLayout,
    ) -> Result<RunReport, PipelineError>
    where
        F: Fn(&SampleInput) -> Result<S, PileupSourceError> + Send + Sync,
        S: PileupSource,
    {
        layout.prepare()?;

        let mut ordered: Vec<&SampleInput> = samples.iter().collect();
        ordered.sort_by(|left, right| left.id.cmp(&right.id));
        ordered.dedup_by(|later, earlier| later.id == earlier.id);

        let process = || -> Vec<Result<SampleResult, SampleError>> {
            ordered
                .par_iter()
                .map(|&input| {
                    let mut source = open(input).map_err(|err| SampleError::SamplePileupFailure {
                        sample: input.id.clone(),
                        source: AggregationError::Source(err),
                    })?;
                    self.process_sample(&input.id, &mut source, Some(layout))
                })
                .collect()
        };
        let results = match self.config.threads {
            Some(threads) => {
                info!(threads, "using dedicated worker pool");
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()?
                    .install(process)
            }
            None => process(),
        };

        let mut matrix = SampleFrequencyMatrix::new(Arc::clone(&self.mutations));
        let mut processed = Vec::new();
        let mut sample_stats = Vec::new();
        let mut skipped = Vec::new();
        for result in results {
            match result {
                Ok(sample) => {
                    matrix.append_sample(sample.sample.clone(), sample.values)?;
                    sample_stats.push((sample.sample.clone(), sample.stats));
                    processed.push(sample.sample);
                }
                Err(err) => {
                    warn!(sample = %err.sample(), error = %err, "sample skipped");
                    skipped.push(err);
                }
            }
        }

        let summary = SurveillanceAggregator::new(self.config.column_order.clone())
            .with_average_mode(self.config.average_mode)
            .with_excluded_lineages(self.config.excluded_lineages.clone())
            .aggregate(&matrix);

        write_atomically(layout.monitored_mutations(), |writer| {
            write_matrix_csv(writer, &matrix)
        })?;
        let form = self.config.surveillance_freq_form;
        write_atomically(layout.surveillance_table(), |writer| {
            write_summary_csv(writer, &summary, form)
        })?;

        let catalog_fingerprint = self.mutations.fingerprint();
        info!(
            processed = processed.len(),
            skipped = skipped.len(),
            catalog = %catalog_fingerprint,
            "surveillance run complete"
        );

        Ok(RunReport {
            processed,
            skipped,
            sample_stats,
            catalog_fingerprint,
            matrix,
            summary,
        })
    }

    /// Run over every alignment file in `dir`. When `contig` is given only
    /// that target of each file is piled up.
    pub fn run_bam_directory<P: AsRef<Path>>(
        &self,
        dir: P,
        contig: Option<&str>,
        layout: &OutputLayout,
    ) -> Result<RunReport, PipelineError> {
        let dir = dir.as_ref();
        let samples = discover_samples(dir)?;
        if samples.is_empty() {
            return Err(PipelineError::NoSamples(dir.to_path_buf()));
        }
        info!(samples = samples.len(), dir = %dir.display(), "discovered alignment files");

        let max_depth = self.config.max_pileup_depth;
        self.run(
            &samples,
            |input| BamPileupSource::from_path(&input.path, contig, max_depth),
            layout,
        )
    }
}
