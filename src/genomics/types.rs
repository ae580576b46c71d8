use std::fmt;
use std::sync::Arc;

/// Number of outcomes tallied per position: A, C, G, T, N and deletion.
pub const NUM_SYMBOLS: usize = 6;

/// Outcome symbol counted at a pileup position.
///
/// The discriminant doubles as the index into every per-symbol array in the
/// crate, so accessors resolve through [`Symbol::index`] instead of looking up
/// columns by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Symbol {
    /// Adenine.
    A = 0,
    /// Cytosine.
    C = 1,
    /// Guanine.
    G = 2,
    /// Thymine.
    T = 3,
    /// No-call (reference skip or an `N` base call).
    N = 4,
    /// Deletion relative to the reference.
    Del = 5,
}

impl Symbol {
    /// All symbols in index order.
    pub const ALL: [Symbol; NUM_SYMBOLS] = [
        Symbol::A,
        Symbol::C,
        Symbol::G,
        Symbol::T,
        Symbol::N,
        Symbol::Del,
    ];

    /// Position of this symbol in per-symbol arrays.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Canonical nucleotide (A/C/G/T), case-insensitive.
    pub fn from_nucleotide(base: u8) -> Option<Self> {
        match base {
            b'A' | b'a' => Some(Symbol::A),
            b'C' | b'c' => Some(Symbol::C),
            b'G' | b'g' => Some(Symbol::G),
            b'T' | b't' => Some(Symbol::T),
            _ => None,
        }
    }

    /// Base call observed in a read. `N` is a valid no-call; anything outside
    /// `ACGTN` is rejected.
    pub fn from_call(base: u8) -> Option<Self> {
        match base {
            b'N' | b'n' => Some(Symbol::N),
            other => Self::from_nucleotide(other),
        }
    }

    /// Mutated base as written in a mutation catalog, where `-` marks a
    /// deletion.
    pub fn from_catalog(base: &str) -> Option<Self> {
        match base.trim().as_bytes() {
            [b'-'] => Some(Symbol::Del),
            [single] => Self::from_nucleotide(*single),
            _ => None,
        }
    }

    /// Column label used in exported tables.
    pub const fn label(self) -> &'static str {
        match self {
            Symbol::A => "A",
            Symbol::C => "C",
            Symbol::G => "G",
            Symbol::T => "T",
            Symbol::N => "N",
            Symbol::Del => "del",
        }
    }

    /// Representation used in catalog files (`-` for deletions).
    pub const fn catalog_char(self) -> char {
        match self {
            Symbol::A => 'A',
            Symbol::C => 'C',
            Symbol::G => 'G',
            Symbol::T => 'T',
            Symbol::N => 'N',
            Symbol::Del => '-',
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a single covering read contributes at one pileup position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Aligned base as reported by the read (raw ASCII, any case).
    Base(u8),
    /// The read has a deletion over this position.
    Deletion,
    /// The read skips this reference position (e.g. an `N` CIGAR operation).
    RefSkip,
}

/// All read outcomes observed at one 0-based reference position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PileupColumn {
    /// 0-based reference coordinate.
    pub position: u32,
    /// One outcome per covering read.
    pub reads: Vec<ReadOutcome>,
}

impl PileupColumn {
    /// Construct a column from its position and outcomes.
    pub fn new(position: u32, reads: Vec<ReadOutcome>) -> Self {
        Self { position, reads }
    }
}

/// Simple CIGAR operation kinds describing how a read aligns to the reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOpKind {
    /// Consuming match/mismatch.
    Match,
    /// Insertion relative to the reference.
    Insertion,
    /// Deletion relative to the reference.
    Deletion,
    /// Skipped reference region.
    RefSkip,
    /// Soft clipping (sequence present in read only).
    SoftClip,
    /// Hard clipping (trimmed sequence not present in read).
    HardClip,
}

impl CigarOpKind {
    fn consumes_reference(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match | CigarOpKind::Deletion | CigarOpKind::RefSkip
        )
    }

    fn consumes_query(self) -> bool {
        matches!(
            self,
            CigarOpKind::Match | CigarOpKind::Insertion | CigarOpKind::SoftClip
        )
    }
}

/// CIGAR operation with length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarOp {
    /// Operation kind.
    pub kind: CigarOpKind,
    /// Number of bases affected by the operation.
    pub len: u32,
}

impl CigarOp {
    /// Construct a new CIGAR operation.
    pub fn new(kind: CigarOpKind, len: u32) -> Self {
        Self { kind, len }
    }
}

/// Aligned read held in memory, used where no alignment file is involved.
#[derive(Debug, Clone)]
pub struct AlignedRead {
    /// Reference contig name.
    pub chrom: Arc<str>,
    /// 0-based leftmost reference coordinate.
    pub pos: u32,
    /// CIGAR describing the alignment.
    pub cigar: Vec<CigarOp>,
    /// Read sequence as ASCII.
    pub sequence: Arc<[u8]>,
}

impl AlignedRead {
    /// Construct a new aligned read.
    pub fn new(
        chrom: impl Into<Arc<str>>,
        pos: u32,
        cigar: Vec<CigarOp>,
        sequence: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            chrom: chrom.into(),
            pos,
            cigar,
            sequence: sequence.into(),
        }
    }

    /// Read aligned end to end without gaps.
    pub fn contiguous(chrom: impl Into<Arc<str>>, pos: u32, sequence: &[u8]) -> Self {
        Self::new(
            chrom,
            pos,
            vec![CigarOp::new(CigarOpKind::Match, sequence.len() as u32)],
            sequence.to_vec(),
        )
    }

    /// Read length inferred from the sequence.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Whether the read carries no bases.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// Number of reference bases spanned by the alignment.
    pub fn reference_span(&self) -> u32 {
        self.cigar
            .iter()
            .filter(|op| op.kind.consumes_reference())
            .map(|op| op.len)
            .sum()
    }

    /// End position (half-open) on the reference.
    pub fn end(&self) -> u32 {
        self.pos + self.reference_span()
    }

    /// Base at the provided read offset.
    pub fn base_at(&self, offset: usize) -> Option<u8> {
        self.sequence.get(offset).copied()
    }

    /// Walk the CIGAR and report the outcome this read contributes at every
    /// reference position it covers, in reference order.
    ///
    /// Match positions whose query offset runs past the stored sequence are
    /// skipped.
    pub fn reference_outcomes(&self) -> Vec<(u32, ReadOutcome)> {
        let mut outcomes = Vec::with_capacity(self.reference_span() as usize);
        let mut ref_pos = self.pos;
        let mut query_offset = 0usize;

        for op in &self.cigar {
            match op.kind {
                CigarOpKind::Match => {
                    for step in 0..op.len {
                        if let Some(base) = self.base_at(query_offset + step as usize) {
                            outcomes.push((ref_pos + step, ReadOutcome::Base(base)));
                        }
                    }
                }
                CigarOpKind::Deletion => {
                    outcomes.extend(
                        (0..op.len).map(|step| (ref_pos + step, ReadOutcome::Deletion)),
                    );
                }
                CigarOpKind::RefSkip => {
                    outcomes.extend((0..op.len).map(|step| (ref_pos + step, ReadOutcome::RefSkip)));
                }
                CigarOpKind::Insertion | CigarOpKind::SoftClip | CigarOpKind::HardClip => {}
            }
            if op.kind.consumes_reference() {
                ref_pos += op.len;
            }
            if op.kind.consumes_query() {
                query_offset += op.len as usize;
            }
        }

        outcomes
    }
}
