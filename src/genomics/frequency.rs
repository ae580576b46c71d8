use crate::genomics::{
    AggregationStats, CountTable, PositionCounts, ReferenceError, ReferenceSequence, Symbol,
    NUM_SYMBOLS,
};

/// Percentage frequency (0-100) of every symbol at a covered position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolFrequencies([f64; NUM_SYMBOLS]);

impl SymbolFrequencies {
    /// Frequencies relative to total depth; `None` when depth is zero.
    pub fn from_counts(counts: &PositionCounts) -> Option<Self> {
        let depth = counts.total_depth();
        if depth == 0 {
            return None;
        }
        let depth = f64::from(depth);
        let mut freqs = [0.0; NUM_SYMBOLS];
        for symbol in Symbol::ALL {
            freqs[symbol.index()] = 100.0 * f64::from(counts.get(symbol)) / depth;
        }
        Some(Self(freqs))
    }

    /// Frequency of one symbol.
    #[inline]
    pub fn get(&self, symbol: Symbol) -> f64 {
        self.0[symbol.index()]
    }

    /// Frequencies in [`Symbol::ALL`] order.
    pub fn as_array(&self) -> &[f64; NUM_SYMBOLS] {
        &self.0
    }
}

/// One position of a sample's pileup table.
#[derive(Debug, Clone, PartialEq)]
pub struct PileupRow {
    /// 0-based position.
    pub position: u32,
    /// Tallies, `None` if no read was ever aligned here.
    pub counts: Option<PositionCounts>,
    /// Reference base (uppercase ASCII).
    pub ref_base: u8,
    /// Per-symbol frequencies, `None` without coverage.
    pub frequencies: Option<SymbolFrequencies>,
    /// Frequency of the reference base, `None` without coverage or when the
    /// reference base is not A/C/G/T.
    pub ref_frequency: Option<f64>,
}

impl PileupRow {
    /// Derive frequencies for a position from its tallies and reference base.
    pub fn derive(position: u32, counts: Option<PositionCounts>, ref_base: u8) -> Self {
        let frequencies = counts.as_ref().and_then(SymbolFrequencies::from_counts);
        let ref_frequency = match (frequencies, Symbol::from_nucleotide(ref_base)) {
            (Some(freqs), Some(symbol)) => Some(freqs.get(symbol)),
            _ => None,
        };
        Self {
            position,
            counts,
            ref_base: ref_base.to_ascii_uppercase(),
            frequencies,
            ref_frequency,
        }
    }

    /// Total depth, `None` for unvisited positions.
    pub fn total_depth(&self) -> Option<u32> {
        self.counts.as_ref().map(PositionCounts::total_depth)
    }

    /// Tally of one symbol, `None` for unvisited positions.
    pub fn count(&self, symbol: Symbol) -> Option<u32> {
        self.counts.as_ref().map(|counts| counts.get(symbol))
    }

    /// Frequency of one symbol, `None` without coverage.
    pub fn frequency(&self, symbol: Symbol) -> Option<f64> {
        self.frequencies.map(|freqs| freqs.get(symbol))
    }
}

/// A sample's per-position counts joined with the reference and derived
/// frequencies.
///
/// Tables built by [`PileupTable::derive`] are dense over the genome; tables
/// re-read from an export hold only the rows that were written.
#[derive(Debug, Clone, PartialEq)]
pub struct PileupTable {
    rows: Vec<PileupRow>,
    stats: AggregationStats,
}

impl PileupTable {
    /// Run the frequency derivation over a complete count table.
    pub fn derive(
        counts: &CountTable,
        reference: &ReferenceSequence,
    ) -> Result<Self, ReferenceError> {
        if counts.len() != reference.len() {
            return Err(ReferenceError::LengthMismatch {
                name: reference.name().to_string(),
                expected: counts.len(),
                actual: reference.len(),
            });
        }

        let rows = counts
            .iter()
            .zip(reference.bases())
            .enumerate()
            .map(|(position, (counts, &ref_base))| {
                PileupRow::derive(position as u32, counts.copied(), ref_base)
            })
            .collect();

        Ok(Self {
            rows,
            stats: *counts.stats(),
        })
    }

    /// Table from rows sorted by position.
    pub fn from_rows(mut rows: Vec<PileupRow>) -> Self {
        rows.sort_by_key(|row| row.position);
        Self {
            rows,
            stats: AggregationStats::default(),
        }
    }

    /// Rows in position order.
    pub fn rows(&self) -> &[PileupRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Aggregation bookkeeping carried over from the count table.
    pub fn stats(&self) -> &AggregationStats {
        &self.stats
    }

    /// Row for a 0-based position.
    pub fn row(&self, position: u32) -> Option<&PileupRow> {
        match self.rows.get(position as usize) {
            Some(row) if row.position == position => Some(row),
            _ => self
                .rows
                .binary_search_by_key(&position, |row| row.position)
                .ok()
                .map(|idx| &self.rows[idx]),
        }
    }
}
