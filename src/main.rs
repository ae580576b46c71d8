use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sewerscan::genomics::{AlignedRead, AlignedReadSource, BamPileupSource, PileupSource};
use sewerscan::surveillance::ColumnOrder;
use sewerscan::{
    FreqForm, MutationCatalog, OutputLayout, Pipeline, PipelineConfig, ReferenceSequence,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sewerscan", about = "Lineage surveillance from wastewater sequencing pileups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Score every alignment file in a directory against the mutation catalog.
    Run {
        /// Directory of per-sample `*.bam` files.
        bam_dir: PathBuf,
        /// Output directory.
        out_dir: PathBuf,
        /// Minimum depth (total and mutated base) for a call.
        min_depth: u32,
        /// Reference genome FASTA.
        reference: PathBuf,
        /// Mutation catalog CSV.
        #[arg(long)]
        catalog: PathBuf,
        /// JSON configuration; command-line flags override it.
        #[arg(long)]
        config: Option<PathBuf>,
        /// FASTA record to use (default: first record).
        #[arg(long)]
        reference_name: Option<String>,
        /// Only pile up this contig of each alignment file.
        #[arg(long)]
        contig: Option<String>,
        /// Rendering of the surveillance `freq` cells (ratio or string).
        #[arg(long)]
        freq_form: Option<FreqForm>,
        /// Lineages to place first in the surveillance table.
        #[arg(long, value_delimiter = ',')]
        lineage_order: Option<Vec<String>>,
        /// Lineage to leave out of the surveillance table (repeatable).
        #[arg(long = "exclude-lineage")]
        exclude_lineages: Vec<String>,
        /// Worker threads.
        #[arg(long)]
        threads: Option<usize>,
        /// Skip writing `pileups/<sample>.csv`.
        #[arg(long)]
        no_full_pileups: bool,
    },
    /// Export the pileup tables of a single sample.
    Pileup {
        /// Alignment file (BAM, or `<position>\t<sequence>` lines with `--plain`).
        alignments: PathBuf,
        /// Reference genome FASTA.
        reference: PathBuf,
        /// Output directory.
        out_dir: PathBuf,
        /// Treat the alignments as plain `<position>\t<sequence>` lines.
        #[arg(long)]
        plain: bool,
        /// Sample id (default: derived from the file name).
        #[arg(long)]
        sample: Option<String>,
        /// FASTA record to use (default: first record).
        #[arg(long)]
        reference_name: Option<String>,
        /// Only pile up this contig.
        #[arg(long)]
        contig: Option<String>,
        /// JSON configuration.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            bam_dir,
            out_dir,
            min_depth,
            reference,
            catalog,
            config,
            reference_name,
            contig,
            freq_form,
            lineage_order,
            exclude_lineages,
            threads,
            no_full_pileups,
        } => {
            let mut config = load_config(config.as_deref())?.with_depth_threshold(min_depth);
            if let Some(form) = freq_form {
                config = config.with_freq_form(form);
            }
            if let Some(order) = lineage_order {
                config = config.with_column_order(ColumnOrder::Pinned(order));
            }
            if !exclude_lineages.is_empty() {
                config = config.with_excluded_lineages(exclude_lineages);
            }
            if let Some(threads) = threads {
                config = config.with_threads(threads);
            }
            if no_full_pileups {
                config = config.with_full_pileups(false);
            }
            run_surveillance(
                config,
                &bam_dir,
                &out_dir,
                &reference,
                reference_name.as_deref(),
                &catalog,
                contig.as_deref(),
            )?
        }
        Commands::Pileup {
            alignments,
            reference,
            out_dir,
            plain,
            sample,
            reference_name,
            contig,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            run_pileup(
                config,
                &alignments,
                &reference,
                reference_name.as_deref(),
                &out_dir,
                plain,
                sample,
                contig.as_deref(),
            )?
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_reference(
    config: &PipelineConfig,
    path: &Path,
    name: Option<&str>,
) -> Result<ReferenceSequence> {
    ReferenceSequence::from_fasta(path, name, config.genome_length)
        .with_context(|| format!("failed to load reference from {}", path.display()))
}

fn run_surveillance(
    config: PipelineConfig,
    bam_dir: &Path,
    out_dir: &Path,
    reference_path: &Path,
    reference_name: Option<&str>,
    catalog_path: &Path,
    contig: Option<&str>,
) -> Result<()> {
    if !bam_dir.is_dir() {
        bail!("alignment directory {} does not exist", bam_dir.display());
    }
    let reference = load_reference(&config, reference_path, reference_name)?;
    let catalog = MutationCatalog::from_path(catalog_path, config.genome_length)
        .with_context(|| format!("failed to load catalog from {}", catalog_path.display()))?;

    let pipeline =
        Pipeline::new(config, reference, &catalog).context("failed to initialize pipeline")?;
    let layout = OutputLayout::new(out_dir);
    let report = pipeline
        .run_bam_directory(bam_dir, contig, &layout)
        .context("surveillance run failed")?;

    for (sample, stats) in &report.sample_stats {
        if stats.unrecognized_calls > 0 {
            println!("{sample}: {} unrecognized base calls ignored", stats.unrecognized_calls);
        }
    }
    for failure in &report.skipped {
        println!("skipped {}: {failure}", failure.sample());
    }
    println!(
        "{} samples scored, {} skipped; catalog {}",
        report.processed.len(),
        report.skipped.len(),
        report.catalog_fingerprint
    );
    println!("surveillance table: {}", layout.surveillance_table().display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_pileup(
    config: PipelineConfig,
    alignments: &Path,
    reference_path: &Path,
    reference_name: Option<&str>,
    out_dir: &Path,
    plain: bool,
    sample: Option<String>,
    contig: Option<&str>,
) -> Result<()> {
    let sample = match sample {
        Some(sample) => sample,
        None => sewerscan::pipeline::sample_id(alignments)
            .or_else(|| alignments.file_stem().and_then(|stem| stem.to_str()).map(str::to_string))
            .with_context(|| format!("cannot derive a sample id from {}", alignments.display()))?,
    };
    let reference = load_reference(&config, reference_path, reference_name)?;
    let max_depth = config.max_pileup_depth;
    let pipeline = Pipeline::new(config, reference, &MutationCatalog::from_records(Vec::new()))
        .context("failed to initialize pipeline")?;

    let mut source: Box<dyn PileupSource> = if plain {
        let chrom = contig.unwrap_or_else(|| pipeline.reference().name()).to_string();
        Box::new(AlignedReadSource::new(read_alignment_file(alignments, &chrom)?))
    } else {
        Box::new(
            BamPileupSource::from_path(alignments, contig, max_depth)
                .with_context(|| format!("failed to open {}", alignments.display()))?,
        )
    };

    let table = pipeline
        .pileup_table(&sample, source.as_mut())
        .with_context(|| format!("pileup failed for {}", alignments.display()))?;
    let layout = OutputLayout::new(out_dir);
    layout.prepare().context("failed to create output directories")?;
    pipeline
        .export_pileups(&sample, &table, &layout)
        .context("failed to export pileup tables")?;

    let stats = table.stats();
    info!(
        sample = %sample,
        visited = stats.visited_positions,
        unrecognized = stats.unrecognized_calls,
        "pileup exported"
    );
    println!(
        "{}\t{} positions visited\tmutations table: {}",
        sample,
        stats.visited_positions,
        layout.mutations_pileup(&sample).display()
    );
    if pipeline.config().export_full_pileups {
        println!("full table: {}", layout.full_pileup(&sample).display());
    }
    Ok(())
}

/// Read `<position>\t<sequence>` lines (0-based positions, gapless reads).
fn read_alignment_file(path: &Path, chrom: &str) -> Result<Vec<AlignedRead>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open alignments {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut reads = Vec::new();

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let pos_str = fields
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing position on line {}", line_no + 1))?;
        let seq = fields
            .next()
            .ok_or_else(|| anyhow::anyhow!("missing sequence on line {}", line_no + 1))?;

        let pos: u32 = pos_str.parse().with_context(|| {
            format!("invalid position '{}' on line {}", pos_str, line_no + 1)
        })?;

        reads.push(AlignedRead::contiguous(chrom, pos, seq.as_bytes()));
    }

    Ok(reads)
}
