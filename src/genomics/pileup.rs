use thiserror::Error;
use tracing::debug;

use crate::genomics::{
    PileupColumn, PileupSource, PileupSourceError, ReadOutcome, Symbol, NUM_SYMBOLS,
};

/// Per-symbol read tallies for one position of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionCounts {
    counts: [u32; NUM_SYMBOLS],
}

impl PositionCounts {
    /// Counts with every tally at zero (a visited position with no reads).
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts from an array in [`Symbol::ALL`] order.
    pub fn from_counts(counts: [u32; NUM_SYMBOLS]) -> Self {
        Self { counts }
    }

    /// Tally for one symbol.
    #[inline]
    pub fn get(&self, symbol: Symbol) -> u32 {
        self.counts[symbol.index()]
    }

    /// Tallies in [`Symbol::ALL`] order.
    pub fn as_array(&self) -> &[u32; NUM_SYMBOLS] {
        &self.counts
    }

    /// Sum of all six tallies.
    pub fn total_depth(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub(crate) fn observe(&mut self, symbol: Symbol) {
        self.counts[symbol.index()] += 1;
    }
}

/// Bookkeeping gathered while aggregating one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AggregationStats {
    /// Positions reported by the source.
    pub visited_positions: usize,
    /// Read outcomes tallied.
    pub observations: u64,
    /// Base calls outside `ACGTN`, reported but not tallied.
    pub unrecognized_calls: u64,
}

/// Errors that abort aggregation of a sample.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The underlying source failed.
    #[error(transparent)]
    Source(#[from] PileupSourceError),
    /// The source reported a position beyond the genome.
    #[error("pileup position {position} outside genome of length {genome_length}")]
    PositionOutOfRange {
        /// Offending 0-based position.
        position: u32,
        /// Configured genome length.
        genome_length: usize,
    },
    /// The source reported the same position twice.
    #[error("pileup position {0} reported more than once")]
    DuplicatePosition(u32),
}

/// Dense per-position tallies for one sample.
///
/// Index `i` holds position `i`; `None` marks a position the source never
/// visited, which is distinct from a visited position with zero depth.
#[derive(Debug, Clone, PartialEq)]
pub struct CountTable {
    counts: Vec<Option<PositionCounts>>,
    stats: AggregationStats,
}

impl CountTable {
    /// Table of the given length with every position unvisited.
    pub fn unvisited(genome_length: usize) -> Self {
        Self {
            counts: vec![None; genome_length],
            stats: AggregationStats::default(),
        }
    }

    /// Number of positions (the genome length).
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the table covers no positions.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Tallies at a 0-based position.
    pub fn get(&self, position: usize) -> Option<&PositionCounts> {
        self.counts.get(position).and_then(Option::as_ref)
    }

    /// All positions in order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&PositionCounts>> {
        self.counts.iter().map(Option::as_ref)
    }

    /// Aggregation bookkeeping.
    pub fn stats(&self) -> &AggregationStats {
        &self.stats
    }

    /// Tally one column into the table.
    pub fn observe_column(&mut self, column: &PileupColumn) -> Result<(), AggregationError> {
        let genome_length = self.counts.len();
        let slot = self
            .counts
            .get_mut(column.position as usize)
            .ok_or(AggregationError::PositionOutOfRange {
                position: column.position,
                genome_length,
            })?;
        if slot.is_some() {
            return Err(AggregationError::DuplicatePosition(column.position));
        }

        let mut counts = PositionCounts::new();
        for outcome in &column.reads {
            match *outcome {
                ReadOutcome::Base(base) => match Symbol::from_call(base) {
                    Some(symbol) => counts.observe(symbol),
                    None => {
                        self.stats.unrecognized_calls += 1;
                        debug!(
                            position = column.position,
                            base = %char::from(base),
                            "unrecognized base call"
                        );
                        continue;
                    }
                },
                ReadOutcome::Deletion => counts.observe(Symbol::Del),
                ReadOutcome::RefSkip => counts.observe(Symbol::N),
            }
            self.stats.observations += 1;
        }

        *slot = Some(counts);
        self.stats.visited_positions += 1;
        Ok(())
    }
}

/// Builds a [`CountTable`] from one pass over a pileup source.
#[derive(Debug, Clone)]
pub struct PileupAggregator {
    genome_length: usize,
}

impl PileupAggregator {
    /// Create an aggregator for a genome of the given length.
    pub fn new(genome_length: usize) -> Self {
        Self { genome_length }
    }

    /// Genome length every table is sized to.
    pub fn genome_length(&self) -> usize {
        self.genome_length
    }

    /// Consume every column of `source` into a dense table.
    pub fn aggregate<S: PileupSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<CountTable, AggregationError> {
        let mut table = CountTable::unvisited(self.genome_length);
        for column in source.columns() {
            table.observe_column(&column?)?;
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genomics::{AlignedRead, AlignedReadSource, CigarOp, CigarOpKind};

    #[test]
    fn aggregator_counts_bases_deletions_and_skips() {
        let reads = vec![
            AlignedRead::contiguous("ref", 0, b"ACGT"),
            AlignedRead::contiguous("ref", 1, b"cgta"),
            AlignedRead::new(
                "ref",
                0,
                vec![
                    CigarOp::new(CigarOpKind::Match, 1),
                    CigarOp::new(CigarOpKind::Deletion, 1),
                    CigarOp::new(CigarOpKind::RefSkip, 1),
                    CigarOp::new(CigarOpKind::Match, 1),
                ],
                b"AT".to_vec(),
            ),
        ];
        let mut source = AlignedReadSource::new(reads);
        let table = PileupAggregator::new(8).aggregate(&mut source).unwrap();

        let at = |pos: usize| table.get(pos).copied().expect("visited");
        assert_eq!(at(0).get(Symbol::A), 2);
        assert_eq!(at(1).get(Symbol::C), 2);
        assert_eq!(at(1).get(Symbol::Del), 1);
        assert_eq!(at(2).get(Symbol::G), 2);
        assert_eq!(at(2).get(Symbol::N), 1);
        assert_eq!(at(3).get(Symbol::T), 3);
        assert_eq!(at(4).get(Symbol::A), 1);
        assert_eq!(at(1).total_depth(), 3);
        assert!(table.get(5).is_none());
        assert_eq!(table.len(), 8);
        assert_eq!(table.stats().visited_positions, 5);
    }

    #[test]
    fn unrecognized_calls_are_reported_not_tallied() {
        let mut table = CountTable::unvisited(3);
        let column = PileupColumn::new(
            1,
            vec![ReadOutcome::Base(b'R'), ReadOutcome::Base(b'a'), ReadOutcome::Base(b'n')],
        );
        table.observe_column(&column).unwrap();

        let counts = table.get(1).unwrap();
        assert_eq!(counts.get(Symbol::A), 1);
        assert_eq!(counts.get(Symbol::N), 1);
        assert_eq!(counts.total_depth(), 2);
        assert_eq!(table.stats().unrecognized_calls, 1);
    }

    #[test]
    fn zero_read_column_is_visited_with_zero_depth() {
        let mut table = CountTable::unvisited(2);
        table.observe_column(&PileupColumn::new(0, Vec::new())).unwrap();
        assert_eq!(table.get(0).map(PositionCounts::total_depth), Some(0));
        assert!(table.get(1).is_none());
    }

    #[test]
    fn out_of_range_and_duplicate_positions_fail() {
        let mut table = CountTable::unvisited(2);
        assert!(matches!(
            table.observe_column(&PileupColumn::new(2, Vec::new())),
            Err(AggregationError::PositionOutOfRange { position: 2, genome_length: 2 })
        ));
        table.observe_column(&PileupColumn::new(1, Vec::new())).unwrap();
        assert!(matches!(
            table.observe_column(&PileupColumn::new(1, Vec::new())),
            Err(AggregationError::DuplicatePosition(1))
        ));
    }
}
