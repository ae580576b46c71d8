use std::path::{Path, PathBuf};

use rust_htslib::bam::{self, pileup::Pileup, Read};

use crate::genomics::{
    PileupColumn, PileupColumns, PileupSource, PileupSourceError, ReadOutcome,
};

/// Default cap on reads per pileup column, matching htslib's own default.
pub const DEFAULT_MAX_PILEUP_DEPTH: u32 = 8000;

/// Pileup source backed by a BAM/CRAM file read through htslib.
///
/// Every read reported by htslib is counted; no flag or quality filtering is
/// applied.
pub struct BamPileupSource {
    path: PathBuf,
    reader: bam::Reader,
    tid: Option<u32>,
    max_depth: u32,
}

impl std::fmt::Debug for BamPileupSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BamPileupSource")
            .field("path", &self.path)
            .field("tid", &self.tid)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

impl BamPileupSource {
    /// Open an alignment file. When `contig` is given only columns on that
    /// target are reported.
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        contig: Option<&str>,
        max_depth: u32,
    ) -> Result<Self, PileupSourceError> {
        let path = path.as_ref().to_path_buf();
        let reader = bam::Reader::from_path(&path).map_err(|err| PileupSourceError::Open {
            path: path.clone(),
            message: err.to_string(),
        })?;

        let tid = match contig {
            Some(name) => Some(reader.header().tid(name.as_bytes()).ok_or_else(|| {
                PileupSourceError::UnknownContig {
                    contig: name.to_string(),
                    path: path.clone(),
                }
            })?),
            None => None,
        };

        Ok(Self {
            path,
            reader,
            tid,
            max_depth,
        })
    }

    /// Path of the underlying alignment file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PileupSource for BamPileupSource {
    fn columns(&mut self) -> PileupColumns<'_> {
        let tid = self.tid;
        let mut pileups = self.reader.pileup();
        pileups.set_max_depth(self.max_depth);

        Box::new(pileups.filter_map(move |result| match result {
            Ok(pileup) => {
                if tid.map_or(false, |wanted| wanted != pileup.tid()) {
                    return None;
                }
                Some(Ok(column_from_pileup(&pileup)))
            }
            Err(err) => Some(Err(PileupSourceError::Read(err.to_string()))),
        }))
    }
}

fn column_from_pileup(pileup: &Pileup) -> PileupColumn {
    let reads = pileup
        .alignments()
        .map(|alignment| {
            // htslib marks reference skips as deletions too.
            if alignment.is_refskip() {
                ReadOutcome::RefSkip
            } else if alignment.is_del() {
                ReadOutcome::Deletion
            } else {
                match alignment.qpos() {
                    Some(qpos) => ReadOutcome::Base(alignment.record().seq()[qpos]),
                    // no query base to report: a no-call
                    None => ReadOutcome::RefSkip,
                }
            }
        })
        .collect();

    PileupColumn::new(pileup.pos(), reads)
}
