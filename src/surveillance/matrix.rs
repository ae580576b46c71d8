use std::sync::Arc;

use thiserror::Error;

use crate::surveillance::LineageMutationTable;

/// Errors raised when appending sample columns.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    /// A column with this sample id already exists.
    #[error("sample '{0}' already has a column")]
    DuplicateSample(String),
    /// The column does not have one value per mutation row.
    #[error("sample '{sample}' has {actual} values, expected {expected}")]
    ColumnLength {
        /// Sample id.
        sample: String,
        /// Number of mutation rows.
        expected: usize,
        /// Values supplied.
        actual: usize,
    },
}

/// One sample's scored frequencies, aligned with the mutation rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleColumn {
    /// Sample identifier.
    pub sample: String,
    /// Scored frequency per mutation row (`None` = no call).
    pub values: Vec<Option<f64>>,
}

/// Mutation rows crossed with one scored column per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFrequencyMatrix {
    mutations: Arc<LineageMutationTable>,
    samples: Vec<SampleColumn>,
}

impl SampleFrequencyMatrix {
    /// Matrix with the given rows and no sample columns yet.
    pub fn new(mutations: Arc<LineageMutationTable>) -> Self {
        Self {
            mutations,
            samples: Vec::new(),
        }
    }

    /// Append one sample column.
    pub fn append_sample(
        &mut self,
        sample: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), MatrixError> {
        let sample = sample.into();
        if self.samples.iter().any(|column| column.sample == sample) {
            return Err(MatrixError::DuplicateSample(sample));
        }
        if values.len() != self.mutations.len() {
            return Err(MatrixError::ColumnLength {
                sample,
                expected: self.mutations.len(),
                actual: values.len(),
            });
        }
        self.samples.push(SampleColumn { sample, values });
        Ok(())
    }

    /// Mutation rows.
    pub fn mutations(&self) -> &LineageMutationTable {
        &self.mutations
    }

    /// Sample columns in append order.
    pub fn samples(&self) -> &[SampleColumn] {
        &self.samples
    }

    /// Column for a sample id.
    pub fn sample(&self, sample: &str) -> Option<&SampleColumn> {
        self.samples.iter().find(|column| column.sample == sample)
    }
}
