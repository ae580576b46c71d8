//! Lineage surveillance: the mutation catalog, per-sample mutation scoring,
//! the sample frequency matrix and the lineage-level summary.

mod catalog;
mod scoring;
mod matrix;
mod summary;

pub use catalog::{
    parse_lineages, CatalogError, LineageMutation, LineageMutationTable, MutationCatalog,
    MutationRecord, MutationType,
};
pub use scoring::{score_counts, MutationScorer, Score};
pub use matrix::{MatrixError, SampleColumn, SampleFrequencyMatrix};
pub use summary::{
    AverageMode, ColumnOrder, FreqForm, LineageStats, SampleSummary, SurveillanceAggregator,
    SurveillanceSummary,
};
