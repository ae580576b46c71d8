use std::path::{Path, PathBuf};
use std::sync::Arc;

use rust_htslib::faidx;
use thiserror::Error;
use tracing::debug;

use crate::genomics::Symbol;

/// Errors raised while loading or querying the reference sequence.
#[derive(Debug, Error)]
pub enum ReferenceError {
    /// The FASTA file could not be indexed or read.
    #[error("failed to read reference {path}: {message}")]
    Fasta {
        /// FASTA path.
        path: PathBuf,
        /// Underlying htslib message.
        message: String,
    },
    /// The FASTA file holds no records.
    #[error("reference {0} contains no sequences")]
    Empty(PathBuf),
    /// Reference length disagrees with the configured genome length.
    #[error("reference '{name}' has length {actual}, expected {expected}")]
    LengthMismatch {
        /// Reference record name.
        name: String,
        /// Configured genome length.
        expected: usize,
        /// Actual record length.
        actual: usize,
    },
    /// Lookup outside the genome bounds.
    #[error("no reference base at position {position} (genome length {length})")]
    MissingReferenceBase {
        /// Requested 0-based position.
        position: usize,
        /// Genome length.
        length: usize,
    },
}

/// Reference genome held in memory, length-validated against the genome
/// length used by every table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSequence {
    name: Arc<str>,
    bases: Arc<[u8]>,
}

impl ReferenceSequence {
    /// Build a reference from raw bases (stored uppercase).
    pub fn new(
        name: impl Into<Arc<str>>,
        bases: impl AsRef<[u8]>,
        genome_length: usize,
    ) -> Result<Self, ReferenceError> {
        let name = name.into();
        let bases = bases.as_ref().to_ascii_uppercase();
        if bases.len() != genome_length {
            return Err(ReferenceError::LengthMismatch {
                name: name.to_string(),
                expected: genome_length,
                actual: bases.len(),
            });
        }
        Ok(Self {
            name,
            bases: Arc::from(bases.into_boxed_slice()),
        })
    }

    /// Load a record from an (optionally pre-indexed) FASTA file. Without a
    /// record name the first record is used. A missing `.fai` index is built
    /// next to the FASTA.
    pub fn from_fasta<P: AsRef<Path>>(
        path: P,
        record: Option<&str>,
        genome_length: usize,
    ) -> Result<Self, ReferenceError> {
        let path = path.as_ref();
        let fasta_error = |message: String| ReferenceError::Fasta {
            path: path.to_path_buf(),
            message,
        };

        let reader = faidx::Reader::from_path(path).map_err(|err| fasta_error(err.to_string()))?;
        let name = match record {
            Some(name) => name.to_string(),
            None => {
                if reader.n_seqs() == 0 {
                    return Err(ReferenceError::Empty(path.to_path_buf()));
                }
                reader
                    .seq_name(0)
                    .map_err(|err| fasta_error(err.to_string()))?
            }
        };

        let length = reader.fetch_seq_len(&name) as usize;
        if length == 0 {
            return Err(ReferenceError::LengthMismatch {
                name,
                expected: genome_length,
                actual: 0,
            });
        }
        // faidx ranges are inclusive
        let sequence = reader
            .fetch_seq_string(&name, 0, length - 1)
            .map_err(|err| fasta_error(err.to_string()))?;
        debug!(reference = %name, length, "loaded reference sequence");

        Self::new(name, sequence.as_bytes(), genome_length)
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of bases.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Whether the reference is empty.
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Uppercase bases.
    pub fn bases(&self) -> &[u8] {
        &self.bases
    }

    /// Base at a 0-based position.
    pub fn fetch(&self, position: usize) -> Result<u8, ReferenceError> {
        self.bases
            .get(position)
            .copied()
            .ok_or(ReferenceError::MissingReferenceBase {
                position,
                length: self.bases.len(),
            })
    }

    /// Reference base at a position as a canonical nucleotide symbol, `None`
    /// for ambiguity codes.
    pub fn symbol(&self, position: usize) -> Result<Option<Symbol>, ReferenceError> {
        self.fetch(position).map(Symbol::from_nucleotide)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn length_must_match_genome() {
        let err = ReferenceSequence::new("ref", b"ACGT", 5).expect_err("length mismatch");
        assert!(matches!(
            err,
            ReferenceError::LengthMismatch {
                expected: 5,
                actual: 4,
                ..
            }
        ));
    }

    #[test]
    fn fetch_outside_bounds_is_missing_base() {
        let reference = ReferenceSequence::new("ref", b"acgt", 4).unwrap();
        assert_eq!(reference.fetch(0).unwrap(), b'A');
        assert_eq!(reference.symbol(3).unwrap(), Some(Symbol::T));
        assert!(matches!(
            reference.fetch(4),
            Err(ReferenceError::MissingReferenceBase {
                position: 4,
                length: 4
            })
        ));
    }

    #[test]
    fn fasta_first_record_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ref.fasta");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, ">MN908947.3 test genome\nACGTNACGTA\nCCGG").unwrap();
        drop(file);

        let reference = ReferenceSequence::from_fasta(&path, None, 14).unwrap();
        assert_eq!(reference.name(), "MN908947.3");
        assert_eq!(reference.bases(), b"ACGTNACGTACCGG");
        assert_eq!(reference.symbol(4).unwrap(), None);
    }
}
