//! Genomics primitives: read outcomes, pileup sources, the reference genome,
//! per-position aggregation and frequency derivation.
//!
//! Data flows leaf to root: a [`PileupSource`] yields [`PileupColumn`]s, the
//! [`PileupAggregator`] folds them into a dense [`CountTable`], and
//! [`PileupTable::derive`] joins those counts with the
//! [`ReferenceSequence`] to produce frequencies.

mod types;
mod source;
mod hts;
mod reference;
mod pileup;
mod frequency;

pub use types::{AlignedRead, CigarOp, CigarOpKind, PileupColumn, ReadOutcome, Symbol, NUM_SYMBOLS};
pub use source::{AlignedReadSource, PileupColumns, PileupSource, PileupSourceError};
pub use hts::{BamPileupSource, DEFAULT_MAX_PILEUP_DEPTH};
pub use reference::{ReferenceError, ReferenceSequence};
pub use pileup::{AggregationError, AggregationStats, CountTable, PileupAggregator, PositionCounts};
pub use frequency::{PileupRow, PileupTable, SymbolFrequencies};
