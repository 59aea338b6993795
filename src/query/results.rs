use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::logging::debug_enabled;
use crate::store::{Datatype, QueryStatus};

/// Name of the contig dimension (V4 datasets).
pub const CONTIG: &str = "contig";
/// Name of the locus start position field.
pub const START_POS: &str = "start_pos";
/// Name of the sample field.
pub const SAMPLE: &str = "sample";
/// Name of the variant id attribute.
pub const ID: &str = "id";
/// Name of the alleles attribute.
pub const ALLELES: &str = "alleles";
/// Name of the filter ids attribute.
pub const FILTER_IDS: &str = "filter_ids";
/// Name of the INFO blob attribute.
pub const INFO: &str = "info";
/// Name of the FORMAT blob attribute.
pub const FMT: &str = "fmt";

/// Dataset schema version.
///
/// Versions before V4 store samples as a fixed-width integer attribute;
/// V4 stores them as a variable-length string dimension alongside the contig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DatasetVersion {
    /// Version 2.
    V2,
    /// Version 3.
    V3,
    /// Version 4.
    V4,
}

/// Element counts one query step wrote into an attribute's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AttributeResultSize {
    /// Number of offsets written (zero for fixed-width attributes).
    pub offsets: u64,
    /// Number of data elements written.
    pub elements: u64,
}

impl AttributeResultSize {
    /// Construct a size pair.
    pub fn new(offsets: u64, elements: u64) -> Self {
        Self { offsets, elements }
    }

    /// Data bytes for elements of `datatype`.
    pub fn bytes(&self, datatype: Datatype) -> u64 {
        self.elements * datatype.size() as u64
    }
}

/// Outcome of one read-query step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadStep {
    /// Completion status of the step.
    pub status: QueryStatus,
    /// Element counts per attribute.
    pub sizes: HashMap<String, AttributeResultSize>,
}

impl ReadStep {
    /// Size pair of one attribute, zero when the step did not report it.
    pub fn size(&self, name: &str) -> AttributeResultSize {
        self.sizes.get(name).copied().unwrap_or_default()
    }
}

/// Snapshot of the per-attribute result sizes of the latest query step.
///
/// Every [`update`](Self::update) overwrites the previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct ResultBufferTracker {
    status: QueryStatus,
    cell_count: u64,
    contig_size: AttributeResultSize,
    sample_size: AttributeResultSize,
    start_pos_size: AttributeResultSize,
    id_size: AttributeResultSize,
    alleles_size: AttributeResultSize,
    filter_ids_size: AttributeResultSize,
    info_size: AttributeResultSize,
    fmt_size: AttributeResultSize,
    extra_attrs_size: HashMap<String, AttributeResultSize>,
}

impl ResultBufferTracker {
    /// Empty tracker with `Uninitialized` status.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sizes reported by `step`.
    ///
    /// The cell count comes from the sample field: its offset count on V4,
    /// its element count on earlier versions. Contig and sample sizes are
    /// only kept for V4 datasets.
    pub fn update(&mut self, version: DatasetVersion, extra_attrs: &[String], step: &ReadStep) {
        self.status = step.status;

        let sample = step.size(SAMPLE);
        if version == DatasetVersion::V4 {
            self.cell_count = sample.offsets;
            self.contig_size = step.size(CONTIG);
            self.sample_size = sample;
        } else {
            self.cell_count = sample.elements;
            self.contig_size = AttributeResultSize::default();
            self.sample_size = AttributeResultSize::default();
        }

        self.start_pos_size = step.size(START_POS);
        self.id_size = step.size(ID);
        self.alleles_size = step.size(ALLELES);
        self.filter_ids_size = step.size(FILTER_IDS);
        self.info_size = step.size(INFO);
        self.fmt_size = step.size(FMT);

        self.extra_attrs_size.clear();
        for attr in extra_attrs {
            self.extra_attrs_size.insert(attr.clone(), step.size(attr));
        }

        if debug_enabled() {
            debug!(
                num_cells = self.cell_count,
                total_elements = self.total_elements(),
                "Query results:{}",
                self.describe()
            );
        }
    }

    fn total_elements(&self) -> u64 {
        self.core_sizes().iter().map(|(_, s)| s.elements).sum::<u64>()
            + self.extra_attrs_size.values().map(|s| s.elements).sum::<u64>()
    }

    fn core_sizes(&self) -> [(&'static str, AttributeResultSize); 8] {
        [
            (CONTIG, self.contig_size),
            (SAMPLE, self.sample_size),
            (START_POS, self.start_pos_size),
            (ALLELES, self.alleles_size),
            (ID, self.id_size),
            (FILTER_IDS, self.filter_ids_size),
            (INFO, self.info_size),
            (FMT, self.fmt_size),
        ]
    }

    fn describe(&self) -> String {
        let mut msg = String::new();
        for (name, size) in self.core_sizes() {
            let _ = write!(msg, "\n {name} = {}", size.elements);
        }
        let mut extras: Vec<_> = self.extra_attrs_size.iter().collect();
        extras.sort_by(|a, b| a.0.cmp(b.0));
        for (name, size) in extras {
            let _ = write!(msg, "\n {name} = {}", size.elements);
        }
        let _ = write!(msg, "\n status = {}", self.status);
        msg
    }

    /// Status of the latest step.
    pub fn status(&self) -> QueryStatus {
        self.status
    }

    /// Number of cells the latest step returned.
    pub fn cell_count(&self) -> u64 {
        self.cell_count
    }

    /// Contig sizes (V4 only, zero otherwise).
    pub fn contig_size(&self) -> AttributeResultSize {
        self.contig_size
    }

    /// Sample sizes (V4 only, zero otherwise).
    pub fn sample_size(&self) -> AttributeResultSize {
        self.sample_size
    }

    /// Start position sizes.
    pub fn start_pos_size(&self) -> AttributeResultSize {
        self.start_pos_size
    }

    /// Variant id sizes.
    pub fn id_size(&self) -> AttributeResultSize {
        self.id_size
    }

    /// Alleles sizes.
    pub fn alleles_size(&self) -> AttributeResultSize {
        self.alleles_size
    }

    /// Filter id sizes.
    pub fn filter_ids_size(&self) -> AttributeResultSize {
        self.filter_ids_size
    }

    /// INFO blob sizes.
    pub fn info_size(&self) -> AttributeResultSize {
        self.info_size
    }

    /// FORMAT blob sizes.
    pub fn fmt_size(&self) -> AttributeResultSize {
        self.fmt_size
    }

    /// Sizes of the extra attributes requested by the dataset.
    pub fn extra_attrs_size(&self) -> &HashMap<String, AttributeResultSize> {
        &self.extra_attrs_size
    }

    /// Sizes of any tracked attribute, core or extra.
    pub fn attribute_size(&self, name: &str) -> Option<AttributeResultSize> {
        self.core_sizes()
            .into_iter()
            .find(|(core, _)| *core == name)
            .map(|(_, size)| size)
            .or_else(|| self.extra_attrs_size.get(name).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(status: QueryStatus, sizes: &[(&str, u64, u64)]) -> ReadStep {
        ReadStep {
            status,
            sizes: sizes
                .iter()
                .map(|&(n, o, e)| (n.to_string(), AttributeResultSize::new(o, e)))
                .collect(),
        }
    }

    #[test]
    fn v4_counts_cells_from_sample_offsets() {
        let mut tracker = ResultBufferTracker::new();
        let s = step(
            QueryStatus::Incomplete,
            &[("sample", 3, 21), ("contig", 3, 12), ("alleles", 7, 9)],
        );
        tracker.update(DatasetVersion::V4, &[], &s);
        assert_eq!(tracker.status(), QueryStatus::Incomplete);
        assert_eq!(tracker.cell_count(), 3);
        assert_eq!(tracker.contig_size(), AttributeResultSize::new(3, 12));
        assert_eq!(tracker.alleles_size(), AttributeResultSize::new(7, 9));
    }

    #[test]
    fn older_versions_count_sample_elements_and_drop_contig() {
        let mut tracker = ResultBufferTracker::new();
        let s = step(QueryStatus::Complete, &[("sample", 0, 5), ("contig", 5, 20)]);
        tracker.update(DatasetVersion::V3, &[], &s);
        assert_eq!(tracker.cell_count(), 5);
        assert_eq!(tracker.contig_size(), AttributeResultSize::default());
        assert_eq!(tracker.sample_size(), AttributeResultSize::default());
    }

    #[test]
    fn update_is_a_snapshot() {
        let extras = vec!["info_DP".to_string()];
        let mut tracker = ResultBufferTracker::new();
        let first = step(QueryStatus::Incomplete, &[("sample", 4, 16), ("info_DP", 4, 4)]);
        tracker.update(DatasetVersion::V4, &extras, &first);
        tracker.update(DatasetVersion::V4, &extras, &first);
        assert_eq!(tracker.cell_count(), 4);
        assert_eq!(tracker.attribute_size("info_DP"), Some(AttributeResultSize::new(4, 4)));

        let second = step(QueryStatus::Complete, &[("sample", 1, 4)]);
        tracker.update(DatasetVersion::V4, &extras, &second);
        assert_eq!(tracker.cell_count(), 1);
        assert_eq!(tracker.attribute_size("info_DP"), Some(AttributeResultSize::default()));
        assert_eq!(tracker.attribute_size("unknown"), None);
    }

    #[test]
    fn bytes_scale_with_datatype() {
        assert_eq!(AttributeResultSize::new(2, 3).bytes(Datatype::Int32), 12);
        assert_eq!(AttributeResultSize::new(2, 3).bytes(Datatype::Char), 3);
    }
}
