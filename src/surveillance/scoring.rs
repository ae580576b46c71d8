use crate::genomics::{PileupTable, PositionCounts, Symbol};
use crate::surveillance::{LineageMutationTable, MutationRecord};

/// Outcome of scoring one mutation against one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    /// No read covers the position.
    NoCoverage,
    /// Total depth is below the confidence floor; the mutation is unknown.
    InsufficientDepth,
    /// Enough depth, but too few reads carry the mutated base: reported as
    /// absent.
    BelowDetection,
    /// Percentage of reads carrying the mutated base.
    Detected(f64),
}

impl Score {
    /// Value written to the sample column: `None` for unknown, `0.0` below
    /// detection.
    pub fn value(self) -> Option<f64> {
        match self {
            Score::NoCoverage | Score::InsufficientDepth => None,
            Score::BelowDetection => Some(0.0),
            Score::Detected(freq) => Some(freq),
        }
    }
}

/// Apply the depth confidence policy to the tallies at one position.
///
/// Both the total depth and the mutated symbol's own count must reach
/// `min_depth` for a non-zero result.
pub fn score_counts(counts: Option<&PositionCounts>, symbol: Symbol, min_depth: u32) -> Score {
    let Some(counts) = counts else {
        return Score::NoCoverage;
    };
    let depth = counts.total_depth();
    if depth == 0 {
        return Score::NoCoverage;
    }
    if depth < min_depth {
        return Score::InsufficientDepth;
    }
    let count = counts.get(symbol);
    if count < min_depth {
        return Score::BelowDetection;
    }
    Score::Detected(100.0 * f64::from(count) / f64::from(depth))
}

/// Scores catalog mutations against a sample's pileup table.
#[derive(Debug, Clone, Copy)]
pub struct MutationScorer {
    min_depth: u32,
}

impl MutationScorer {
    /// Create a scorer with the given depth floor.
    pub fn new(min_depth: u32) -> Self {
        Self { min_depth }
    }

    /// Depth floor in use.
    pub fn min_depth(&self) -> u32 {
        self.min_depth
    }

    /// Score one mutation. Catalog positions are 1-based; position 0 has no
    /// coverage.
    pub fn score(&self, record: &MutationRecord, pileup: &PileupTable) -> Score {
        let counts = record
            .index()
            .and_then(|index| pileup.row(index))
            .and_then(|row| row.counts.as_ref());
        score_counts(counts, record.mutated_base, self.min_depth)
    }

    /// Score every row of the exploded catalog, producing one sample column.
    pub fn score_sample(
        &self,
        mutations: &LineageMutationTable,
        pileup: &PileupTable,
    ) -> Vec<Option<f64>> {
        mutations
            .rows()
            .iter()
            .map(|row| self.score(&row.record, pileup).value())
            .collect()
    }
}
