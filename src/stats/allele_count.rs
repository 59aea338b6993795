use std::sync::Arc;

use tracing::{debug, error};

use super::accumulator::{LocusAccumulator, VarColumn};
use super::{
    finalized_error, release_writer, stats_filters, submit_batch, IngestionTask, SharedArrayWriter,
    StatsError,
};
use crate::genomics::VariantRecord;
use crate::store::{ArraySchema, Attribute, ChecksumKind, ColumnRef, Datatype, Dimension, Layout, WriteBatch};

/// Counts how often each non-reference allele is called at each locus.
///
/// Cells of the `allele_count` array are keyed by `contig:pos:allele` and
/// carry the number of calls. Submits use the unordered layout, so every
/// flush becomes its own fragment and duplicates are summed at read time.
#[derive(Debug)]
pub struct AlleleCounter {
    writer: Arc<SharedArrayWriter>,
    acc: LocusAccumulator<i32>,
    alleles: VarColumn,
    counts: Vec<i32>,
    sample: String,
    finalized: bool,
}

impl AlleleCounter {
    /// Array name.
    pub const ARRAY: &'static str = "allele_count";
    /// Dimension holding `contig:pos:allele`.
    pub const ALLELE: &'static str = "allele";
    /// Count attribute.
    pub const COUNT: &'static str = "count";

    /// Aggregator writing through `writer`.
    pub fn new(writer: Arc<SharedArrayWriter>) -> Self {
        writer.attach();
        Self {
            writer,
            acc: LocusAccumulator::new(),
            alleles: VarColumn::default(),
            counts: Vec::new(),
            sample: String::new(),
            finalized: false,
        }
    }

    fn update_results(&mut self) {
        let Some(locus) = self.acc.locus().cloned() else {
            return;
        };
        for (allele, count) in self.acc.take_values() {
            self.alleles.push_fmt(format_args!("{locus}:{allele}"));
            self.counts.push(count);
        }
    }

    fn current_locus(&self) -> String {
        self.acc.locus().map(ToString::to_string).unwrap_or_default()
    }

    fn submit_pending(&mut self) -> Result<(), StatsError> {
        if self.counts.is_empty() {
            return Ok(());
        }

        debug!(entries = self.counts.len(), "AlleleCounter: flush");
        debug!(allele = %self.alleles.preview(64), "AlleleCounter: first alleles");

        let batch = WriteBatch::new()
            .with(Self::ALLELE, self.alleles.column())
            .with(Self::COUNT, ColumnRef::Int32(&self.counts));
        let result = submit_batch(&self.writer, &batch, &self.current_locus(), &self.sample);

        self.alleles.clear();
        self.counts.clear();
        result
    }
}

impl IngestionTask for AlleleCounter {
    fn array_name() -> &'static str {
        Self::ARRAY
    }

    fn layout() -> Layout {
        Layout::Unordered
    }

    fn schema(checksum: Option<ChecksumKind>) -> ArraySchema {
        let (data_filters, offsets_filters) = stats_filters(checksum);
        ArraySchema::sparse()
            .with_allows_dups(true)
            .with_dimension(Dimension::new(Self::ALLELE, Datatype::StringAscii))
            .with_attribute(Attribute::new(Self::COUNT, Datatype::Int32).with_filters(data_filters.clone()))
            .with_coords_filters(data_filters)
            .with_offsets_filters(offsets_filters)
    }

    fn process(
        &mut self,
        sample_name: &str,
        contig: &str,
        pos: u32,
        record: &VariantRecord,
    ) -> Result<(), StatsError> {
        if self.finalized {
            return Err(finalized_error(&self.writer));
        }
        if !self.writer.is_enabled() {
            return Ok(());
        }
        if !self.acc.is_current(contig, pos) {
            self.update_results();
            self.acc.start(contig, pos);
        }
        if self.sample != sample_name {
            self.sample.clear();
            self.sample.push_str(sample_name);
        }
        self.acc.tally_alt_calls(record, |count, _| *count += 1);
        Ok(())
    }

    fn flush_completed(&mut self) -> Result<(), StatsError> {
        if !self.writer.is_enabled() {
            return Ok(());
        }
        self.submit_pending()
    }

    fn flush(&mut self) -> Result<(), StatsError> {
        if !self.writer.is_enabled() {
            return Ok(());
        }
        self.update_results();
        self.submit_pending()
    }

    fn finalize(&mut self) -> Result<(), StatsError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        let flushed = self.flush();
        let released = release_writer(&self.writer);
        flushed.and(released)
    }

    fn pending_entries(&self) -> usize {
        self.counts.len()
    }
}

impl Drop for AlleleCounter {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("AlleleCounter: {e}");
        }
    }
}
