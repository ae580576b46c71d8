use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::genomics::Symbol;

/// Errors raised while loading a mutation catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be opened.
    #[error("failed to open catalog {path}: {source}")]
    Io {
        /// Catalog path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The CSV header could not be read.
    #[error("failed to read catalog header: {0}")]
    Header(#[from] csv::Error),
    /// A single entry was rejected.
    #[error("malformed catalog entry on line {line}: {reason}")]
    MalformedCatalogEntry {
        /// 1-based line in the catalog file (header is line 1).
        line: u64,
        /// Why the entry was rejected.
        reason: String,
    },
}

/// Kind of change a catalog entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationType {
    /// Single-base substitution.
    Substitution,
    /// Deletion of a reference base.
    Deletion,
    /// Insertion; never scored.
    Insertion,
}

impl MutationType {
    /// Label written to exported tables.
    pub const fn label(self) -> &'static str {
        match self {
            MutationType::Substitution => "Substitution",
            MutationType::Deletion => "Deletion",
            MutationType::Insertion => "Insertion",
        }
    }
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MutationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substitution" | "snp" | "snv" => Ok(MutationType::Substitution),
            "deletion" | "del" => Ok(MutationType::Deletion),
            "insertion" | "ins" => Ok(MutationType::Insertion),
            other => Err(format!("unknown mutation type '{other}'")),
        }
    }
}

/// A known, lineage-informative single-base change.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    /// 1-based genome position.
    pub position: u32,
    /// Base the mutation produces (`Del` for deletions).
    pub mutated_base: Symbol,
    /// Gene name.
    pub gene: String,
    /// Amino-acid change label, e.g. `N501Y`.
    pub amino_acid_change: String,
    /// Kind of change.
    pub mutation_type: MutationType,
    /// Lineages this mutation is informative for, in catalog order.
    pub lineages: Vec<String>,
    /// Reference base recorded in the catalog, if present.
    pub reference_base: Option<String>,
    /// Nucleotide change label recorded in the catalog, if present.
    pub nucleotide: Option<String>,
}

impl MutationRecord {
    /// 0-based index into per-position tables; `None` for position 0.
    #[inline]
    pub fn index(&self) -> Option<u32> {
        self.position.checked_sub(1)
    }
}

#[derive(Debug, Deserialize)]
struct CatalogRow {
    #[serde(alias = "pos")]
    position: u32,
    #[serde(alias = "mut")]
    mutated_base: String,
    #[serde(default)]
    gene: String,
    #[serde(default, alias = "AA")]
    amino_acid_change: String,
    #[serde(alias = "type")]
    mutation_type: String,
    #[serde(default)]
    lineage: String,
    #[serde(default, alias = "REF")]
    reference_base: Option<String>,
    #[serde(default)]
    nucleotide: Option<String>,
}

/// Split a comma-separated lineage field into trimmed, de-duplicated labels.
pub fn parse_lineages(field: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for token in field.split(',').map(str::trim).filter(|token| !token.is_empty()) {
        if !labels.iter().any(|label| label == token) {
            labels.push(token.to_string());
        }
    }
    labels
}

enum Parsed {
    Record(MutationRecord),
    Insertion,
}

fn parse_row(row: CatalogRow, genome_length: usize) -> Result<Parsed, String> {
    let mutation_type = row.mutation_type.parse::<MutationType>()?;
    if mutation_type == MutationType::Insertion {
        return Ok(Parsed::Insertion);
    }

    let lineages = parse_lineages(&row.lineage);
    if lineages.is_empty() {
        return Err("missing lineage".to_string());
    }
    if row.position == 0 || row.position as usize > genome_length {
        return Err(format!(
            "position {} outside genome of length {genome_length}",
            row.position
        ));
    }
    let mutated_base = Symbol::from_catalog(&row.mutated_base)
        .ok_or_else(|| format!("unsupported mutated base '{}'", row.mutated_base))?;

    Ok(Parsed::Record(MutationRecord {
        position: row.position,
        mutated_base,
        gene: row.gene,
        amino_acid_change: row.amino_acid_change,
        mutation_type,
        lineages,
        reference_base: row.reference_base.filter(|value| !value.is_empty()),
        nucleotide: row.nucleotide.filter(|value| !value.is_empty()),
    }))
}

/// Scorable catalog entries plus a record of what was left out.
#[derive(Debug, Clone, Default)]
pub struct MutationCatalog {
    records: Vec<Arc<MutationRecord>>,
    rejected: Vec<(u64, String)>,
    insertions_dropped: usize,
}

impl MutationCatalog {
    /// Catalog from already-validated records.
    pub fn from_records(records: Vec<MutationRecord>) -> Self {
        Self {
            records: records.into_iter().map(Arc::new).collect(),
            ..Self::default()
        }
    }

    /// Load a CSV catalog from disk.
    pub fn from_path<P: AsRef<Path>>(path: P, genome_length: usize) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_reader(BufReader::new(file), genome_length)?;
        info!(
            path = %path.display(),
            records = catalog.records.len(),
            rejected = catalog.rejected.len(),
            insertions = catalog.insertions_dropped,
            "loaded mutation catalog"
        );
        Ok(catalog)
    }

    /// Load a CSV catalog from any reader. Malformed entries are rejected one
    /// by one and loading continues; only an unreadable header is fatal.
    pub fn from_reader<R: Read>(reader: R, genome_length: usize) -> Result<Self, CatalogError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        csv_reader.headers()?;

        let mut catalog = Self::default();
        for (idx, result) in csv_reader.deserialize::<CatalogRow>().enumerate() {
            let line = idx as u64 + 2;
            let parsed = result
                .map_err(|err| err.to_string())
                .and_then(|row| parse_row(row, genome_length));
            match parsed {
                Ok(Parsed::Record(record)) => catalog.records.push(Arc::new(record)),
                Ok(Parsed::Insertion) => catalog.insertions_dropped += 1,
                Err(reason) => {
                    let err = CatalogError::MalformedCatalogEntry {
                        line,
                        reason: reason.clone(),
                    };
                    warn!("{err}");
                    catalog.rejected.push((line, reason));
                }
            }
        }
        Ok(catalog)
    }

    /// Accepted records in catalog order.
    pub fn records(&self) -> &[Arc<MutationRecord>] {
        &self.records
    }

    /// Rejected entries as [`CatalogError::MalformedCatalogEntry`] values.
    pub fn rejected(&self) -> Vec<CatalogError> {
        self.rejected
            .iter()
            .map(|(line, reason)| CatalogError::MalformedCatalogEntry {
                line: *line,
                reason: reason.clone(),
            })
            .collect()
    }

    /// Number of insertion entries skipped.
    pub fn insertions_dropped(&self) -> usize {
        self.insertions_dropped
    }

    /// Distinct lineage labels in first-encounter order.
    pub fn lineages(&self) -> Vec<Arc<str>> {
        let mut seen: Vec<Arc<str>> = Vec::new();
        for label in self.records.iter().flat_map(|record| record.lineages.iter()) {
            if !seen.iter().any(|known| known.as_ref() == label) {
                seen.push(Arc::from(label.as_str()));
            }
        }
        seen
    }

    /// Explode the catalog into one row per (record, lineage) membership,
    /// grouped by lineage in encounter order.
    pub fn explode(&self) -> LineageMutationTable {
        let lineages = self.lineages();
        let mut rows = Vec::new();
        for lineage in &lineages {
            rows.extend(
                self.records
                    .iter()
                    .filter(|record| record.lineages.iter().any(|label| label == lineage.as_ref()))
                    .map(|record| LineageMutation {
                        lineage: Arc::clone(lineage),
                        record: Arc::clone(record),
                    }),
            );
        }
        LineageMutationTable { rows, lineages }
    }
}

/// One catalog record pinned to a single lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct LineageMutation {
    /// The single lineage this row counts towards.
    pub lineage: Arc<str>,
    /// Shared catalog record.
    pub record: Arc<MutationRecord>,
}

/// The catalog exploded to (mutation, lineage) rows. Immutable once built;
/// its row order is the row order of every sample column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineageMutationTable {
    rows: Vec<LineageMutation>,
    lineages: Vec<Arc<str>>,
}

impl LineageMutationTable {
    /// Rows in table order.
    pub fn rows(&self) -> &[LineageMutation] {
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

    /// Lineages in encounter order.
    pub fn lineages(&self) -> &[Arc<str>] {
        &self.lineages
    }

    /// Row indices grouped by lineage, keyed by label.
    pub fn rows_by_lineage(&self) -> HashMap<&str, Vec<usize>> {
        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, row) in self.rows.iter().enumerate() {
            groups.entry(row.lineage.as_ref()).or_default().push(idx);
        }
        groups
    }

    /// Stable sort by lineage ascending, then gene descending.
    pub fn sorted_by_lineage_and_gene(mut self) -> Self {
        self.rows.sort_by(|left, right| {
            left.lineage
                .cmp(&right.lineage)
                .then_with(|| right.record.gene.cmp(&left.record.gene))
        });
        self
    }

    /// Content fingerprint of the rows, stable across runs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for row in &self.rows {
            let record = &row.record;
            let line = format!(
                "{}\t{}\t{}\t{}\t{}\t{}\n",
                row.lineage,
                record.position,
                record.mutated_base.catalog_char(),
                record.gene,
                record.amino_acid_change,
                record.mutation_type
            );
            hasher.update(line.as_bytes());
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = "\
nucleotide,AA,gene,type,pos,REF,mut,lineage
A23063T,N501Y,S,SNP,23063,A,T,\"B.1.1.7, B.1.351\"
C3267T,T1001I,ORF1ab,SNP,3267,C,T,B.1.1.7
T21765-,H69-,S,Deletion,21765,T,-,B.1.1.7
28281insA,,N,Insertion,28281,T,TA,B.1.1.7
G22813T,K417N,S,SNP,22813,G,T,B.1.351
X1,,S,Inversion,100,A,T,B.1.351
A2,,S,SNP,200,A,T,
A3,,S,SNP,40000,A,T,P.1
A4,,S,SNP,300,A,R,P.1
";

    fn load() -> MutationCatalog {
        MutationCatalog::from_reader(CATALOG.as_bytes(), 29_903).expect("header is valid")
    }

    #[test]
    fn malformed_entries_are_rejected_individually() {
        let catalog = load();
        assert_eq!(catalog.records().len(), 4);
        assert_eq!(catalog.insertions_dropped(), 1);

        let lines: Vec<u64> = catalog
            .rejected()
            .iter()
            .map(|err| match err {
                CatalogError::MalformedCatalogEntry { line, .. } => *line,
                other => panic!("unexpected error {other}"),
            })
            .collect();
        assert_eq!(lines, vec![7, 8, 9, 10]);
    }

    #[test]
    fn pandas_style_column_names_are_accepted() {
        let catalog = load();
        let first = &catalog.records()[0];
        assert_eq!(first.position, 23063);
        assert_eq!(first.mutated_base, Symbol::T);
        assert_eq!(first.amino_acid_change, "N501Y");
        assert_eq!(first.reference_base.as_deref(), Some("A"));
        assert_eq!(first.lineages, vec!["B.1.1.7", "B.1.351"]);
        assert_eq!(catalog.records()[2].mutated_base, Symbol::Del);
    }

    #[test]
    fn explode_pins_one_lineage_per_row() {
        let table = load().explode();
        let lineages: Vec<&str> = table.lineages().iter().map(|l| l.as_ref()).collect();
        assert_eq!(lineages, vec!["B.1.1.7", "B.1.351"]);
        // B.1.1.7: N501Y, T1001I, H69-; B.1.351: N501Y, K417N
        assert_eq!(table.len(), 5);

        let n501y: Vec<&str> = table
            .rows()
            .iter()
            .filter(|row| row.record.amino_acid_change == "N501Y")
            .map(|row| row.lineage.as_ref())
            .collect();
        assert_eq!(n501y, vec!["B.1.1.7", "B.1.351"]);
    }

    #[test]
    fn lineage_membership_is_exact_not_substring() {
        let catalog = MutationCatalog::from_reader(
            "pos,mut,type,lineage\n10,A,SNP,B.1.1\n20,C,SNP,B.1.1.7\n".as_bytes(),
            100,
        )
        .unwrap();
        let table = catalog.explode();
        let groups = table.rows_by_lineage();
        assert_eq!(groups["B.1.1"].len(), 1);
        assert_eq!(groups["B.1.1.7"].len(), 1);
    }

    #[test]
    fn sorting_orders_lineage_then_gene_descending() {
        let table = load().explode().sorted_by_lineage_and_gene();
        let keys: Vec<(&str, &str)> = table
            .rows()
            .iter()
            .map(|row| (row.lineage.as_ref(), row.record.gene.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("B.1.1.7", "S"),
                ("B.1.1.7", "S"),
                ("B.1.1.7", "ORF1ab"),
                ("B.1.351", "S"),
                ("B.1.351", "S"),
            ]
        );
    }

    #[test]
    fn fingerprint_depends_on_content() {
        let table = load().explode();
        assert_eq!(table.fingerprint(), load().explode().fingerprint());
        assert_ne!(
            table.fingerprint(),
            table.clone().sorted_by_lineage_and_gene().fingerprint()
        );
    }
}
