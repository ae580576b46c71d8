use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::surveillance::SampleFrequencyMatrix;

/// How the per-lineage `freq` cell is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreqForm {
    /// `100 * detected / total`.
    #[default]
    Ratio,
    /// Literal `detected\total`.
    String,
}

impl FromStr for FreqForm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ratio" => Ok(FreqForm::Ratio),
            "string" => Ok(FreqForm::String),
            other => Err(format!("unknown freq form '{other}' (expected ratio or string)")),
        }
    }
}

impl fmt::Display for FreqForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FreqForm::Ratio => "ratio",
            FreqForm::String => "string",
        })
    }
}

/// Order of lineage columns in the surveillance table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrder {
    /// Order lineages were first seen in the catalog.
    #[default]
    Encounter,
    /// Named lineages first, in this order; the rest sorted by their
    /// embedded number.
    Pinned(Vec<String>),
}

/// Which values the per-lineage `avg` is taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageMode {
    /// Every non-null value, zeros included.
    #[default]
    NonNull,
    /// Only detected (non-null, non-zero) values.
    Detected,
}

/// Aggregate of one lineage's mutation rows for one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineageStats {
    /// Mean under the configured [`AverageMode`], `None` when no value
    /// qualifies.
    pub avg: Option<f64>,
    /// Rows with a non-null, non-zero value.
    pub detected: usize,
    /// Rows belonging to the lineage.
    pub total: usize,
}

impl LineageStats {
    /// Fold one lineage's values for one sample.
    pub fn from_values<I>(values: I, mode: AverageMode) -> Self
    where
        I: IntoIterator<Item = Option<f64>>,
    {
        let mut total = 0;
        let mut present = 0usize;
        let mut detected = 0;
        let mut sum = 0.0;
        for value in values.into_iter() {
            total += 1;
            let Some(value) = value else { continue };
            present += 1;
            if value != 0.0 {
                detected += 1;
            }
            sum += value;
        }
        // zeros add nothing to the sum, so only the divisor differs
        let divisor = match mode {
            AverageMode::NonNull => present,
            AverageMode::Detected => detected,
        };
        Self {
            avg: (divisor > 0).then(|| sum / divisor as f64),
            detected,
            total,
        }
    }

    /// `100 * detected / total`, `None` for an empty lineage.
    pub fn ratio(&self) -> Option<f64> {
        (self.total > 0).then(|| 100.0 * self.detected as f64 / self.total as f64)
    }
}

/// Per-sample lineage statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSummary {
    /// Sample identifier.
    pub sample: String,
    /// Statistics aligned with [`SurveillanceSummary::lineages`].
    pub lineages: Vec<LineageStats>,
}

/// Surveillance table: one row per sample, one statistics pair per lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveillanceSummary {
    lineages: Vec<Arc<str>>,
    samples: Vec<SampleSummary>,
}

impl SurveillanceSummary {
    /// Lineage columns in output order.
    pub fn lineages(&self) -> &[Arc<str>] {
        &self.lineages
    }

    /// Sample rows.
    pub fn samples(&self) -> &[SampleSummary] {
        &self.samples
    }

    /// Statistics for a (sample, lineage) pair.
    pub fn stats(&self, sample: &str, lineage: &str) -> Option<&LineageStats> {
        let column = self.lineages.iter().position(|l| l.as_ref() == lineage)?;
        self.samples
            .iter()
            .find(|row| row.sample == sample)
            .and_then(|row| row.lineages.get(column))
    }
}

/// First run of ASCII digits in a lineage name.
fn numeric_token(name: &str) -> Option<u64> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..].chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn compare_by_numeric_token(left: &str, right: &str) -> Ordering {
    match (numeric_token(left), numeric_token(right)) {
        (Some(l), Some(r)) => l.cmp(&r).then_with(|| left.cmp(right)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.cmp(right),
    }
}

/// Groups the sample frequency matrix by lineage.
#[derive(Debug, Clone, Default)]
pub struct SurveillanceAggregator {
    order: ColumnOrder,
    excluded: Vec<String>,
    average: AverageMode,
}

impl SurveillanceAggregator {
    /// Aggregator with the given column ordering.
    pub fn new(order: ColumnOrder) -> Self {
        Self {
            order,
            excluded: Vec::new(),
            average: AverageMode::default(),
        }
    }

    /// Choose which values `avg` is taken over.
    pub fn with_average_mode(mut self, average: AverageMode) -> Self {
        self.average = average;
        self
    }

    /// Leave these lineages out of the summary.
    pub fn with_excluded_lineages(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Apply exclusion and ordering rules to lineages given in encounter
    /// order.
    pub fn order_lineages(&self, encountered: &[Arc<str>]) -> Vec<Arc<str>> {
        let kept: Vec<Arc<str>> = encountered
            .iter()
            .filter(|lineage| !self.excluded.iter().any(|ex| ex == lineage.as_ref()))
            .cloned()
            .collect();

        match &self.order {
            ColumnOrder::Encounter => kept,
            ColumnOrder::Pinned(pinned) => {
                let mut ordered: Vec<Arc<str>> = pinned
                    .iter()
                    .filter_map(|name| kept.iter().find(|l| l.as_ref() == name).cloned())
                    .collect();
                let mut rest: Vec<Arc<str>> = kept
                    .iter()
                    .filter(|lineage| !pinned.iter().any(|name| name == lineage.as_ref()))
                    .cloned()
                    .collect();
                rest.sort_by(|l, r| compare_by_numeric_token(l, r));
                ordered.extend(rest);
                ordered
            }
        }
    }

    /// Build the surveillance summary.
    pub fn aggregate(&self, matrix: &SampleFrequencyMatrix) -> SurveillanceSummary {
        let mutations = matrix.mutations();
        let groups = mutations.rows_by_lineage();
        let lineages = self.order_lineages(mutations.lineages());

        let samples = matrix
            .samples()
            .iter()
            .map(|column| SampleSummary {
                sample: column.sample.clone(),
                lineages: lineages
                    .iter()
                    .map(|lineage| {
                        let rows = groups.get(lineage.as_ref()).map(Vec::as_slice).unwrap_or(&[]);
                        LineageStats::from_values(
                            rows.iter().map(|&idx| column.values[idx]),
                            self.average,
                        )
                    })
                    .collect(),
            })
            .collect();

        SurveillanceSummary { lineages, samples }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surveillance::MutationCatalog;

    fn names(lineages: &[Arc<str>]) -> Vec<&str> {
        lineages.iter().map(|l| l.as_ref()).collect()
    }

    fn arcs(names: &[&str]) -> Vec<Arc<str>> {
        names.iter().map(|&name| Arc::from(name)).collect()
    }

    #[test]
    fn nulls_are_excluded_from_mean_but_zeros_are_not() {
        let values = [None, Some(0.0), Some(12.0), Some(30.0)];
        let stats = LineageStats::from_values(values, AverageMode::NonNull);
        assert_eq!(stats.avg, Some(14.0));
        assert_eq!(stats.detected, 2);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.ratio(), Some(50.0));

        let detected_only = LineageStats::from_values(values, AverageMode::Detected);
        assert_eq!(detected_only.avg, Some(21.0));
        assert_eq!(detected_only.ratio(), Some(50.0));

        let all_null = LineageStats::from_values([None, None], AverageMode::NonNull);
        assert_eq!(all_null.avg, None);
        assert_eq!(all_null.ratio(), Some(0.0));
    }

    #[test]
    fn pinned_order_then_numeric_tokens() {
        let aggregator = SurveillanceAggregator::new(ColumnOrder::Pinned(vec![
            "B.1.1.7".into(),
            "Missing".into(),
            "P.1".into(),
        ]));
        let ordered =
            aggregator.order_lineages(&arcs(&["VOI-10", "P.1", "Other", "VOI-2", "B.1.1.7"]));
        assert_eq!(names(&ordered), vec!["B.1.1.7", "P.1", "VOI-2", "VOI-10", "Other"]);
    }

    #[test]
    fn exclusion_is_exact_list_membership() {
        let aggregator = SurveillanceAggregator::default()
            .with_excluded_lineages(vec!["B.1.1.7".into(), "UK".into()]);
        let ordered = aggregator.order_lineages(&arcs(&["B.1.1.7", "B.1.1.7.1", "P.1"]));
        assert_eq!(names(&ordered), vec!["B.1.1.7.1", "P.1"]);
    }

    #[test]
    fn aggregate_groups_matrix_rows_by_lineage() {
        let catalog = MutationCatalog::from_reader(
            "pos,mut,type,lineage\n1,A,SNP,X\n2,A,SNP,\"X,Y\"\n3,A,SNP,X\n4,A,SNP,X\n".as_bytes(),
            10,
        )
        .unwrap();
        let mut matrix = SampleFrequencyMatrix::new(Arc::new(catalog.explode()));
        // rows: X:1, X:2, X:3, X:4, Y:2
        matrix
            .append_sample("s1", vec![None, Some(0.0), Some(12.0), Some(30.0), Some(5.0)])
            .unwrap();

        let summary = SurveillanceAggregator::default().aggregate(&matrix);
        assert_eq!(names(summary.lineages()), vec!["X", "Y"]);
        let x = summary.stats("s1", "X").unwrap();
        assert_eq!(x.avg, Some(14.0));
        assert_eq!(x.detected, 2);
        assert_eq!(x.ratio(), Some(50.0));
        let y = summary.stats("s1", "Y").unwrap();
        assert_eq!((y.avg, y.detected, y.total), (Some(5.0), 1, 1));
    }
}
