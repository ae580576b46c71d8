//! CSV export of pileup tables, the sample frequency matrix and the
//! surveillance summary, plus re-ingestion of exported pileup tables.
//!
//! Missing values are written as empty cells. Every file is written through a
//! temporary file in the destination directory and renamed into place, so a
//! failure never leaves a partial file behind.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::warn;

use crate::genomics::{PileupRow, PileupTable, PositionCounts, Symbol, NUM_SYMBOLS};
use crate::surveillance::{FreqForm, SampleFrequencyMatrix, SurveillanceSummary};

/// Errors raised while writing or re-reading exported tables.
#[derive(Debug, Error)]
pub enum ExportError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV encoding or decoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    /// The temporary file could not be moved into place.
    #[error("failed to persist {path}: {source}")]
    Persist {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A re-read table is missing a column.
    #[error("pileup table has no '{0}' column")]
    MissingColumn(String),
    /// A re-read table holds an unparsable value.
    #[error("invalid value '{value}' in column '{column}' on line {line}")]
    InvalidValue {
        /// 1-based line.
        line: u64,
        /// Column name.
        column: String,
        /// Offending cell.
        value: String,
    },
}

/// Thresholds deciding which pileup rows are worth exporting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PileupFilterPolicy {
    /// Rows with fewer non-null cells (excluding `pos`) are dropped from every
    /// export.
    pub min_non_null: usize,
    /// Mutations-only export: minimum total depth.
    pub min_depth: u32,
    /// Mutations-only export: rows whose reference frequency exceeds this are
    /// dropped.
    pub max_ref_frequency: f64,
    /// Mutations-only export: rows whose `N` frequency exceeds this are
    /// dropped.
    pub max_n_frequency: f64,
}

impl Default for PileupFilterPolicy {
    fn default() -> Self {
        Self {
            min_non_null: 3,
            min_depth: 10,
            max_ref_frequency: 99.0,
            max_n_frequency: 99.0,
        }
    }
}

impl PileupFilterPolicy {
    /// Whether a row carries enough observed data to be exported at all.
    pub fn has_enough_data(&self, row: &PileupRow, with_frequencies: bool) -> bool {
        non_null_cells(row, with_frequencies) >= self.min_non_null
    }

    /// Whether a row belongs in the mutations-only export. Null values never
    /// trigger an exclusion.
    pub fn is_informative(&self, row: &PileupRow) -> bool {
        let shallow = row.total_depth().map_or(false, |depth| depth < self.min_depth);
        let reference_like = row
            .ref_frequency
            .map_or(false, |freq| freq > self.max_ref_frequency);
        let no_call = row
            .frequency(Symbol::N)
            .map_or(false, |freq| freq > self.max_n_frequency);
        !(shallow || reference_like || no_call)
    }
}

fn non_null_cells(row: &PileupRow, with_frequencies: bool) -> usize {
    // the reference base is always present
    let mut cells = 1;
    if row.counts.is_some() {
        cells += NUM_SYMBOLS + 1;
    }
    if row.ref_frequency.is_some() {
        cells += 1;
    }
    if with_frequencies && row.frequencies.is_some() {
        cells += NUM_SYMBOLS;
    }
    cells
}

/// Render a float the way the tables store it (shortest round-trip form).
pub fn format_float(value: f64) -> String {
    format!("{value:?}")
}

fn optional_float(value: Option<f64>) -> String {
    value.map(format_float).unwrap_or_default()
}

fn pileup_header(with_frequencies: bool) -> Vec<String> {
    let mut header: Vec<String> = std::iter::once("pos".to_string())
        .chain(Symbol::ALL.iter().map(|symbol| symbol.label().to_string()))
        .chain(["sum", "ref", "ref_freq"].iter().map(|label| label.to_string()))
        .collect();
    if with_frequencies {
        header.extend(Symbol::ALL.iter().map(|symbol| format!("{}_freq", symbol.label())));
    }
    header
}

fn pileup_record(row: &PileupRow, with_frequencies: bool) -> Vec<String> {
    let mut record = Vec::with_capacity(10 + NUM_SYMBOLS);
    record.push(row.position.to_string());
    match &row.counts {
        Some(counts) => {
            record.extend(counts.as_array().iter().map(u32::to_string));
            record.push(counts.total_depth().to_string());
        }
        None => record.extend(std::iter::repeat(String::new()).take(NUM_SYMBOLS + 1)),
    }
    record.push(char::from(row.ref_base).to_string());
    record.push(optional_float(row.ref_frequency));
    if with_frequencies {
        for symbol in Symbol::ALL {
            record.push(optional_float(row.frequency(symbol)));
        }
    }
    record
}

/// Which rows of a pileup table an export holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PileupExportKind {
    /// Every row with enough observed data.
    Full,
    /// Rows with enough data that also pass the depth/reference/no-call
    /// filter.
    MutationsOnly,
}

/// Writes per-sample pileup tables under a [`PileupFilterPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PileupExporter {
    policy: PileupFilterPolicy,
    with_frequencies: bool,
}

impl PileupExporter {
    /// Create an exporter; `with_frequencies` adds the per-symbol frequency
    /// columns.
    pub fn new(policy: PileupFilterPolicy, with_frequencies: bool) -> Self {
        Self {
            policy,
            with_frequencies,
        }
    }

    /// Rows selected for an export kind.
    pub fn select<'a>(
        &'a self,
        table: &'a PileupTable,
        kind: PileupExportKind,
    ) -> impl Iterator<Item = &'a PileupRow> + 'a {
        table.rows().iter().filter(move |row| {
            self.policy.has_enough_data(row, self.with_frequencies)
                && (kind == PileupExportKind::Full || self.policy.is_informative(row))
        })
    }

    /// Write the selected rows as CSV.
    pub fn write<W: Write>(
        &self,
        writer: W,
        table: &PileupTable,
        kind: PileupExportKind,
    ) -> Result<(), ExportError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(pileup_header(self.with_frequencies))?;
        for row in self.select(table, kind) {
            csv_writer.write_record(pileup_record(row, self.with_frequencies))?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Write the selected rows to `path` atomically.
    pub fn write_to_path<P: AsRef<Path>>(
        &self,
        path: P,
        table: &PileupTable,
        kind: PileupExportKind,
    ) -> Result<(), ExportError> {
        write_atomically(path, |writer| self.write(writer, table, kind))
    }

    /// Write the selected rows into a [`StagedFile`] for `path`.
    pub fn stage<P: AsRef<Path>>(
        &self,
        path: P,
        table: &PileupTable,
        kind: PileupExportKind,
    ) -> Result<StagedFile, ExportError> {
        stage(path, |writer| self.write(writer, table, kind))
    }
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, ExportError> {
    headers
        .iter()
        .position(|header| header == name)
        .ok_or_else(|| ExportError::MissingColumn(name.to_string()))
}

fn parse_count(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().or_else(|| {
        // tables written by pandas store counts as floats
        let float = value.parse::<f64>().ok()?;
        (float >= 0.0 && float.fract() == 0.0 && float <= f64::from(u32::MAX)).then(|| float as u32)
    })
}

/// Re-read an exported pileup table. Counts and the reference base are read
/// back; frequencies are derived again from them.
pub fn read_pileup_csv<R: Read>(reader: R) -> Result<PileupTable, ExportError> {
    let mut csv_reader = csv::Reader::from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let pos_idx = column_index(&headers, "pos")?;
    let ref_idx = column_index(&headers, "ref")?;
    let count_idx = Symbol::ALL
        .iter()
        .map(|symbol| column_index(&headers, symbol.label()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows = Vec::new();
    for (idx, result) in csv_reader.records().enumerate() {
        let record = result?;
        let line = idx as u64 + 2;
        let invalid = |column: &str, value: &str| ExportError::InvalidValue {
            line,
            column: column.to_string(),
            value: value.to_string(),
        };

        let pos_cell = record.get(pos_idx).unwrap_or_default();
        let position = pos_cell.parse::<u32>().map_err(|_| invalid("pos", pos_cell))?;

        let cells: Vec<&str> = count_idx
            .iter()
            .map(|&col| record.get(col).unwrap_or_default())
            .collect();
        let counts = if cells.iter().all(|cell| cell.is_empty()) {
            None
        } else {
            let mut tallies = [0u32; NUM_SYMBOLS];
            for (symbol, cell) in Symbol::ALL.iter().zip(&cells) {
                tallies[symbol.index()] =
                    parse_count(cell).ok_or_else(|| invalid(symbol.label(), *cell))?;
            }
            Some(PositionCounts::from_counts(tallies))
        };

        let ref_base = record
            .get(ref_idx)
            .and_then(|cell| cell.bytes().next())
            .unwrap_or(b'N');
        rows.push(PileupRow::derive(position, counts, ref_base));
    }

    Ok(PileupTable::from_rows(rows))
}

/// Write the sample frequency matrix: catalog columns followed by one column
/// per sample.
pub fn write_matrix_csv<W: Write>(
    writer: W,
    matrix: &SampleFrequencyMatrix,
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header: Vec<String> = [
        "lineage",
        "position",
        "mutated_base",
        "gene",
        "amino_acid_change",
        "mutation_type",
        "reference_base",
        "nucleotide",
    ]
    .iter()
    .map(|label| label.to_string())
    .collect();
    header.extend(matrix.samples().iter().map(|column| column.sample.clone()));
    csv_writer.write_record(&header)?;

    for (idx, row) in matrix.mutations().rows().iter().enumerate() {
        let record = &row.record;
        let mut cells = vec![
            row.lineage.to_string(),
            record.position.to_string(),
            record.mutated_base.catalog_char().to_string(),
            record.gene.clone(),
            record.amino_acid_change.clone(),
            record.mutation_type.to_string(),
            record.reference_base.clone().unwrap_or_default(),
            record.nucleotide.clone().unwrap_or_default(),
        ];
        cells.extend(matrix.samples().iter().map(|column| optional_float(column.values[idx])));
        csv_writer.write_record(&cells)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Write the surveillance summary: one row per sample, `<lineage> avg` and
/// `<lineage> freq` for every lineage.
pub fn write_summary_csv<W: Write>(
    writer: W,
    summary: &SurveillanceSummary,
    form: FreqForm,
) -> Result<(), ExportError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let mut header = vec!["sample".to_string()];
    for lineage in summary.lineages() {
        header.push(format!("{lineage} avg"));
        header.push(format!("{lineage} freq"));
    }
    csv_writer.write_record(&header)?;

    for row in summary.samples() {
        let mut cells = vec![row.sample.clone()];
        for stats in &row.lineages {
            cells.push(optional_float(stats.avg));
            cells.push(match form {
                FreqForm::Ratio => optional_float(stats.ratio()),
                FreqForm::String => format!("{}\\{}", stats.detected, stats.total),
            });
        }
        csv_writer.write_record(&cells)?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// A fully written export waiting in a temporary file next to its
/// destination. Dropping it without [`StagedFile::persist`] discards it.
#[derive(Debug)]
pub struct StagedFile {
    tmp: NamedTempFile,
    path: PathBuf,
}

impl StagedFile {
    /// Destination the file will be moved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Move the staged file into place.
    pub fn persist(self) -> Result<PathBuf, ExportError> {
        let Self { tmp, path } = self;
        tmp.persist(&path).map_err(|err| ExportError::Persist {
            path: path.clone(),
            source: err.error,
        })?;
        Ok(path)
    }
}

/// Run `write` against a temporary file next to `path` without moving it into
/// place yet. On error the temporary file is removed.
pub fn stage<P, F>(path: P, write: F) -> Result<StagedFile, ExportError>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn Write) -> Result<(), ExportError>,
{
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut buffered: BufWriter<&mut File> = BufWriter::new(tmp.as_file_mut());
        write(&mut buffered)?;
        buffered.flush()?;
    }
    Ok(StagedFile {
        tmp,
        path: path.to_path_buf(),
    })
}

/// Persist a group of staged files. If any of them fails, the ones already
/// moved into place by this call are removed again and the rest are
/// discarded, so the group lands whole or not at all.
pub fn persist_all(staged: Vec<StagedFile>) -> Result<(), ExportError> {
    let mut persisted = Vec::with_capacity(staged.len());
    for file in staged {
        match file.persist() {
            Ok(path) => persisted.push(path),
            Err(err) => {
                for path in persisted {
                    if let Err(cleanup) = std::fs::remove_file(&path) {
                        warn!(
                            path = %path.display(),
                            error = %cleanup,
                            "failed to roll back export"
                        );
                    }
                }
                return Err(err);
            }
        }
    }
    Ok(())
}

/// Run `write` against a temporary file next to `path`, then move it into
/// place. On error the temporary file is removed and `path` is untouched.
pub fn write_atomically<P, F>(path: P, write: F) -> Result<(), ExportError>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn Write) -> Result<(), ExportError>,
{
    stage(path, write)?.persist()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn row(depth_counts: [u32; NUM_SYMBOLS], ref_base: u8) -> PileupRow {
        PileupRow::derive(0, Some(PositionCounts::from_counts(depth_counts)), ref_base)
    }

    #[test_case([5, 0, 0, 0, 0, 0], b'C' => false ; "shallow row")]
    #[test_case([995, 5, 0, 0, 0, 0], b'A' => false ; "reference frequency 99.5")]
    #[test_case([4000, 1000, 0, 0, 0, 0], b'A' => true ; "deep mixed row")]
    #[test_case([0, 0, 0, 0, 200, 1], b'A' => false ; "mostly no-call")]
    #[test_case([99, 1, 0, 0, 0, 0], b'A' => true ; "reference frequency exactly 99")]
    #[test_case([12, 0, 0, 0, 0, 0], b'N' => true ; "null reference frequency never excludes")]
    fn mutations_only_filter(counts: [u32; NUM_SYMBOLS], ref_base: u8) -> bool {
        PileupFilterPolicy::default().is_informative(&row(counts, ref_base))
    }

    #[test]
    fn unvisited_rows_lack_enough_data() {
        let policy = PileupFilterPolicy::default();
        assert!(!policy.has_enough_data(&PileupRow::derive(0, None, b'A'), true));
        assert!(policy.has_enough_data(
            &PileupRow::derive(0, Some(PositionCounts::new()), b'A'),
            false
        ));
    }

    #[test]
    fn pileup_export_writes_empty_cells_for_nulls() {
        let table = PileupTable::from_rows(vec![
            PileupRow::derive(0, None, b'A'),
            PileupRow::derive(1, Some(PositionCounts::new()), b'C'),
            PileupRow::derive(2, Some(PositionCounts::from_counts([1, 3, 0, 0, 0, 0])), b'C'),
        ]);
        let mut buffer = Vec::new();
        PileupExporter::new(PileupFilterPolicy::default(), false)
            .write(&mut buffer, &table, PileupExportKind::Full)
            .unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "pos,A,C,G,T,N,del,sum,ref,ref_freq\n\
             1,0,0,0,0,0,0,0,C,\n\
             2,1,3,0,0,0,0,4,C,75.0\n"
        );
    }

    #[test]
    fn pandas_float_counts_are_accepted() {
        let csv = "pos,A,C,G,T,N,del,sum,ref,ref_freq\n4,10.0,0.0,0.0,2.0,0.0,0.0,12.0,A,83.3\n";
        let table = read_pileup_csv(csv.as_bytes()).unwrap();
        let row = table.row(4).unwrap();
        assert_eq!(row.total_depth(), Some(12));
        assert_eq!(row.count(Symbol::T), Some(2));
    }

    #[test]
    fn bad_counts_are_reported_with_line() {
        let csv = "pos,A,C,G,T,N,del,ref\n0,1,x,0,0,0,0,A\n";
        let err = read_pileup_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ExportError::InvalidValue { line: 2, ref column, .. } if column == "C"
        ));
    }

    #[test]
    fn failed_atomic_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.csv");
        let result = write_atomically(&path, |writer| {
            writer.write_all(b"partial")?;
            Err(ExportError::MissingColumn("boom".into()))
        });
        assert!(result.is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_group_persist_rolls_back_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.csv");
        let blocked = dir.path().join("blocked.csv");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), b"x").unwrap();

        let staged = vec![
            stage(&first, |writer| Ok(writer.write_all(b"first")?)).unwrap(),
            stage(&blocked, |writer| Ok(writer.write_all(b"second")?)).unwrap(),
        ];
        let err = persist_all(staged).unwrap_err();
        assert!(matches!(err, ExportError::Persist { ref path, .. } if *path == blocked));
        assert!(!first.exists());
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("blocked.csv")]);
    }
}
