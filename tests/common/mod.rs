#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use sewerscan::genomics::{
    AlignedRead, AlignedReadSource, CigarOp, CigarOpKind, PileupSourceError,
};
use sewerscan::pipeline::SampleInput;
use sewerscan::{
    MutationCatalog, OutputLayout, Pipeline, PipelineConfig, ReferenceSequence, RunReport,
};

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("SEWERSCAN_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set SEWERSCAN_UPDATE_SNAPSHOTS=1 to regenerate.\n\
             Expected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

pub const GENOME_LENGTH: usize = 12;
pub const REFERENCE: &[u8] = b"ACGTACGTACGT";
pub const CHROM: &str = "toy";

/// Four scorable entries over three lineages plus one insertion.
pub const CATALOG_CSV: &str = "\
pos,REF,mut,gene,AA,type,lineage,nucleotide
3,G,T,S,G3T,SNP,\"B.1.1.7, P.1\",G3T
5,A,-,S,H5-,deletion,B.1.1.7,A5-
9,A,C,ORF1ab,T9C,SNP,P.1,A9C
11,G,A,N,Q11A,SNP,B.1.351,G11A
7,G,GA,S,ins7,insertion,P.1,
";

pub fn reference() -> ReferenceSequence {
    ReferenceSequence::new(CHROM, REFERENCE, GENOME_LENGTH).expect("toy reference")
}

pub fn catalog() -> MutationCatalog {
    MutationCatalog::from_reader(CATALOG_CSV.as_bytes(), GENOME_LENGTH).expect("toy catalog")
}

pub fn config() -> PipelineConfig {
    PipelineConfig::default().with_genome_length(GENOME_LENGTH)
}

pub fn pipeline(config: PipelineConfig) -> Pipeline {
    Pipeline::new(config, reference(), &catalog()).expect("pipeline")
}

fn repeat(read: AlignedRead, times: usize) -> Vec<AlignedRead> {
    vec![read; times]
}

/// `s1`: depth 20 everywhere, 14 T at index 2, 12 deletions at index 4.
/// `s2`: depth 5 everywhere.
/// `s3`: a read running off the end of the genome.
pub fn sample_reads(sample: &str) -> Option<Vec<AlignedRead>> {
    match sample {
        "s1" => {
            let mut reads = repeat(AlignedRead::contiguous(CHROM, 0, REFERENCE), 6);
            reads.extend(repeat(AlignedRead::contiguous(CHROM, 0, b"ACTTACGTACGT"), 2));
            reads.extend(repeat(
                AlignedRead::new(
                    CHROM,
                    0,
                    vec![
                        CigarOp::new(CigarOpKind::Match, 4),
                        CigarOp::new(CigarOpKind::Deletion, 1),
                        CigarOp::new(CigarOpKind::Match, 7),
                    ],
                    b"ACTTCGTACGT".to_vec(),
                ),
                12,
            ));
            Some(reads)
        }
        "s2" => Some(repeat(AlignedRead::contiguous(CHROM, 0, REFERENCE), 5)),
        "s3" => Some(vec![AlignedRead::contiguous(CHROM, 9, b"ACGTA")]),
        _ => None,
    }
}

pub fn inputs(ids: &[&str]) -> Vec<SampleInput> {
    ids.iter()
        .map(|id| SampleInput {
            id: id.to_string(),
            path: PathBuf::from(format!("{id}.mapped.sorted.bam")),
        })
        .collect()
}

pub fn open_fixture(input: &SampleInput) -> Result<AlignedReadSource, PileupSourceError> {
    sample_reads(&input.id)
        .map(AlignedReadSource::new)
        .ok_or_else(|| PileupSourceError::Open {
            path: input.path.clone(),
            message: "no such file".to_string(),
        })
}

/// Run the fixture samples `s1`..`s4` (`s3` and `s4` fail) into `out`.
pub fn run_fixture(config: PipelineConfig, out: &Path) -> RunReport {
    pipeline(config)
        .run(&inputs(&["s2", "s4", "s1", "s3"]), open_fixture, &OutputLayout::new(out))
        .expect("fixture run")
}
