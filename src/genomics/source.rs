use std::sync::Arc;

use thiserror::Error;

use super::VariantRecord;

/// Errors raised while pulling records from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Error reported by htslib while reading a VCF/BCF file.
    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    /// Input that cannot be turned into a variant record.
    #[error("malformed input for sample '{sample}': {message}")]
    Malformed {
        /// Sample whose input is malformed.
        sample: String,
        /// Description of the problem.
        message: String,
    },
}

impl SourceError {
    /// Helper for constructing malformed-input errors.
    pub fn malformed(sample: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Malformed {
            sample: sample.into(),
            message: message.into(),
        }
    }
}

/// Per-sample handle yielding records in ascending position order.
///
/// A source is positioned on its first record when constructed; `advance`
/// moves to the next one and reports whether a current record remains.
pub trait RecordSource {
    /// Name of the sample the records belong to.
    fn sample_name(&self) -> &str;

    /// Dataset-wide identifier of the sample.
    fn sample_id(&self) -> u32;

    /// Record the source is positioned on, if any.
    fn current_record(&self) -> Option<&Arc<VariantRecord>>;

    /// Move to the next record.
    fn advance(&mut self) -> Result<bool, SourceError>;

    /// 0-based inclusive end position of a record.
    fn end_position(&self, record: &VariantRecord) -> u32 {
        record.end
    }

    /// Contig name of a record.
    fn contig_name<'r>(&self, record: &'r VariantRecord) -> &'r str {
        &record.contig
    }
}

/// Record source over records already held in memory.
#[derive(Debug, Clone)]
pub struct VecRecordSource {
    sample_name: String,
    sample_id: u32,
    records: Vec<Arc<VariantRecord>>,
    cursor: usize,
}

impl VecRecordSource {
    /// Create a source positioned on the first record.
    pub fn new(
        sample_name: impl Into<String>,
        sample_id: u32,
        records: impl IntoIterator<Item = VariantRecord>,
    ) -> Self {
        Self {
            sample_name: sample_name.into(),
            sample_id,
            records: records.into_iter().map(Arc::new).collect(),
            cursor: 0,
        }
    }

    /// Number of records not yet consumed, including the current one.
    pub fn remaining(&self) -> usize {
        self.records.len().saturating_sub(self.cursor)
    }
}

impl RecordSource for VecRecordSource {
    fn sample_name(&self) -> &str {
        &self.sample_name
    }

    fn sample_id(&self) -> u32 {
        self.sample_id
    }

    fn current_record(&self) -> Option<&Arc<VariantRecord>> {
        self.records.get(self.cursor)
    }

    fn advance(&mut self) -> Result<bool, SourceError> {
        if self.cursor < self.records.len() {
            self.cursor += 1;
        }
        Ok(self.cursor < self.records.len())
    }
}
