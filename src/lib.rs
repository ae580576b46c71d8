//! # sewerscan
//!
//! Wastewater surveillance of a pathogen genome from pooled sequencing data.
//!
//! ## Pipeline
//!
//! 1. **Pileup aggregation**: per-position tallies of `A`, `C`, `G`, `T`, `N`
//!    and deletions for every sample
//! 2. **Frequency derivation**: per-symbol percentages against total depth,
//!    joined with the reference base
//! 3. **Mutation scoring**: catalog mutations (each tagged with lineages)
//!    scored under a minimum-depth confidence policy
//! 4. **Surveillance summary**: per-sample, per-lineage average frequency and
//!    detection ratio
//!
//! ## Usage Example
//!
//! ```ignore
//! use sewerscan::{MutationCatalog, OutputLayout, Pipeline, PipelineConfig, ReferenceSequence};
//!
//! let config = PipelineConfig::default().with_depth_threshold(10);
//! let reference = ReferenceSequence::from_fasta("NC_045512.2.fasta", None, config.genome_length)?;
//! let catalog = MutationCatalog::from_path("mutationsTable.csv", config.genome_length)?;
//! let pipeline = Pipeline::new(config, reference, &catalog)?;
//! let report = pipeline.run_bam_directory("bams/", None, &OutputLayout::new("results"))?;
//! println!("{} samples scored", report.processed.len());
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod config;       // Run configuration
pub mod genomics;     // Pileups, reference and frequencies
pub mod surveillance; // Catalog, scoring and lineage summary
pub mod export;       // CSV output and re-ingestion
pub mod pipeline;     // Parallel end-to-end run

// Re-exports for convenience
pub use config::{ConfigError, PipelineConfig};
pub use export::{ExportError, PileupExportKind, PileupExporter, PileupFilterPolicy};
pub use genomics::{
    AlignedRead, AlignedReadSource, BamPileupSource, PileupAggregator, PileupSource, PileupTable,
    ReferenceSequence, Symbol,
};
pub use pipeline::{OutputLayout, Pipeline, PipelineError, RunReport, SampleError, SampleInput};
pub use surveillance::{
    FreqForm, LineageMutationTable, MutationCatalog, MutationScorer, SampleFrequencyMatrix,
    SurveillanceAggregator, SurveillanceSummary,
};
