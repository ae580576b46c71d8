use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::genomics::{AlignedRead, PileupColumn, ReadOutcome};

/// Errors raised while pulling pileup columns from an alignment source.
#[derive(Debug, Error)]
pub enum PileupSourceError {
    /// The alignment file could not be opened.
    #[error("failed to open alignments {path}: {message}")]
    Open {
        /// Path that failed to open.
        path: PathBuf,
        /// Underlying reader message.
        message: String,
    },
    /// The requested contig is not present in the alignment header.
    #[error("contig '{contig}' not found in {path}")]
    UnknownContig {
        /// Requested contig name.
        contig: String,
        /// Alignment file searched.
        path: PathBuf,
    },
    /// Reading or decoding a pileup column failed.
    #[error("failed to read pileup: {0}")]
    Read(String),
}

/// Column stream returned by [`PileupSource::columns`].
pub type PileupColumns<'a> = Box<dyn Iterator<Item = Result<PileupColumn, PileupSourceError>> + 'a>;

/// Lazy, position-ordered stream of pileup columns for a single sample.
///
/// Implementations never mutate the underlying alignments; each call to
/// [`PileupSource::columns`] walks the data from the start.
pub trait PileupSource {
    /// Iterate columns in ascending reference position.
    fn columns(&mut self) -> PileupColumns<'_>;
}

/// Pileup source over aligned reads already held in memory.
#[derive(Debug, Clone)]
pub struct AlignedReadSource {
    reads: Arc<[AlignedRead]>,
}

impl AlignedReadSource {
    /// Wrap a collection of aligned reads.
    pub fn new(reads: Vec<AlignedRead>) -> Self {
        Self {
            reads: Arc::from(reads.into_boxed_slice()),
        }
    }

    /// Reads backing this source.
    pub fn reads(&self) -> &[AlignedRead] {
        &self.reads
    }

    fn build_columns(&self) -> BTreeMap<u32, Vec<ReadOutcome>> {
        let mut columns: BTreeMap<u32, Vec<ReadOutcome>> = BTreeMap::new();
        for read in self.reads.iter() {
            for (position, outcome) in read.reference_outcomes() {
                columns.entry(position).or_default().push(outcome);
            }
        }
        columns
    }
}

impl PileupSource for AlignedReadSource {
    fn columns(&mut self) -> PileupColumns<'_> {
        Box::new(
            self.build_columns()
                .into_iter()
                .map(|(position, reads)| Ok(PileupColumn::new(position, reads))),
        )
    }
}

impl<S: PileupSource + ?Sized> PileupSource for Box<S> {
    fn columns(&mut self) -> PileupColumns<'_> {
        (**self).columns()
    }
}
