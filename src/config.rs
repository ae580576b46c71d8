//! Run configuration shared by the library pipeline and the CLI.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::PileupFilterPolicy;
use crate::genomics::DEFAULT_MAX_PILEUP_DEPTH;
use crate::surveillance::{AverageMode, ColumnOrder, FreqForm};

/// Length of the SARS-CoV-2 reference genome (NC_045512.2).
pub const DEFAULT_GENOME_LENGTH: usize = 29_903;

/// Default minimum depth for a mutation call.
pub const DEFAULT_DEPTH_THRESHOLD: u32 = 10;

/// Errors raised while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid JSON for [`PipelineConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Parameters of one surveillance run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reference length; every table has one row per reference position.
    pub genome_length: usize,
    /// Minimum total depth and minimum mutated-base count for a call.
    pub depth_threshold: u32,
    /// Write `pileups/<sample>.csv` next to the mutations-only table.
    pub export_full_pileups: bool,
    /// Add per-symbol frequency columns to exported pileup tables.
    pub export_symbol_frequencies: bool,
    /// Rendering of the surveillance `freq` cells.
    pub surveillance_freq_form: FreqForm,
    /// Lineage column order of the surveillance table.
    pub column_order: ColumnOrder,
    /// Which values the surveillance `avg` is taken over.
    pub average_mode: AverageMode,
    /// Lineages left out of the surveillance table.
    pub excluded_lineages: Vec<String>,
    /// Sort matrix rows by lineage ascending, then gene descending.
    pub sort_mutation_rows: bool,
    /// Pileup export thresholds.
    pub pileup_filter: PileupFilterPolicy,
    /// Per-column read cap handed to the BAM pileup engine.
    pub max_pileup_depth: u32,
    /// Worker threads; `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            genome_length: DEFAULT_GENOME_LENGTH,
            depth_threshold: DEFAULT_DEPTH_THRESHOLD,
            export_full_pileups: true,
            export_symbol_frequencies: true,
            surveillance_freq_form: FreqForm::default(),
            column_order: ColumnOrder::default(),
            average_mode: AverageMode::default(),
            excluded_lineages: Vec::new(),
            sort_mutation_rows: true,
            pileup_filter: PileupFilterPolicy::default(),
            max_pileup_depth: DEFAULT_MAX_PILEUP_DEPTH,
            threads: None,
        }
    }
}

impl PipelineConfig {
    /// Load a JSON configuration; absent fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.genome_length == 0 {
            return Err(ConfigError::Invalid("genome length must be > 0".to_string()));
        }
        if u32::try_from(self.genome_length).is_err() {
            return Err(ConfigError::Invalid(format!(
                "genome length {} does not fit 32-bit positions",
                self.genome_length
            )));
        }
        if self.max_pileup_depth == 0 {
            return Err(ConfigError::Invalid("max pileup depth must be > 0".to_string()));
        }
        if self.threads == Some(0) {
            return Err(ConfigError::Invalid("thread count must be > 0".to_string()));
        }
        Ok(())
    }

    /// Set the reference length.
    pub fn with_genome_length(mut self, genome_length: usize) -> Self {
        self.genome_length = genome_length;
        self
    }

    /// Set the depth floor.
    pub fn with_depth_threshold(mut self, depth_threshold: u32) -> Self {
        self.depth_threshold = depth_threshold;
        self
    }

    /// Enable or disable the full pileup export.
    pub fn with_full_pileups(mut self, enabled: bool) -> Self {
        self.export_full_pileups = enabled;
        self
    }

    /// Enable or disable per-symbol frequency columns.
    pub fn with_symbol_frequencies(mut self, enabled: bool) -> Self {
        self.export_symbol_frequencies = enabled;
        self
    }

    /// Set the `freq` rendering.
    pub fn with_freq_form(mut self, form: FreqForm) -> Self {
        self.surveillance_freq_form = form;
        self
    }

    /// Set the lineage column order.
    pub fn with_column_order(mut self, order: ColumnOrder) -> Self {
        self.column_order = order;
        self
    }

    /// Set the averaging mode.
    pub fn with_average_mode(mut self, mode: AverageMode) -> Self {
        self.average_mode = mode;
        self
    }

    /// Set the excluded lineages.
    pub fn with_excluded_lineages(mut self, lineages: Vec<String>) -> Self {
        self.excluded_lineages = lineages;
        self
    }

    /// Enable or disable matrix row sorting.
    pub fn with_sorted_mutation_rows(mut self, enabled: bool) -> Self {
        self.sort_mutation_rows = enabled;
        self
    }

    /// Set the pileup export thresholds.
    pub fn with_pileup_filter(mut self, policy: PileupFilterPolicy) -> Self {
        self.pileup_filter = policy;
        self
    }

    /// Set the BAM pileup read cap.
    pub fn with_max_pileup_depth(mut self, depth: u32) -> Self {
        self.max_pileup_depth = depth;
        self
    }

    /// Use a dedicated pool with this many threads.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }
}
