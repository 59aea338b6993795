use std::sync::Arc;

use tracing::{debug, error};

use super::accumulator::{LocusAccumulator, VarColumn};
use super::{
    finalized_error, release_writer, stats_filters, submit_batch, IngestionTask, SharedArrayWriter,
    StatsError,
};
use crate::genomics::VariantRecord;
use crate::store::{ArraySchema, Attribute, ChecksumKind, ColumnRef, Datatype, Dimension, Layout, WriteBatch};

/// QC counters of one allele at one locus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QcCounts {
    /// Number of calls to the allele.
    pub ac: i32,
    /// Calls to the allele made in homozygous genotypes.
    pub n_hom: i32,
    /// Non-missing calls to the allele.
    pub n_called: i32,
    /// Calls to the allele in records that passed all filters.
    pub n_pass: i32,
}

impl QcCounts {
    fn add_call(&mut self, homozygous: bool, pass: bool) {
        self.ac += 1;
        self.n_called += 1;
        if homozygous {
            self.n_hom += 1;
        }
        if pass {
            self.n_pass += 1;
        }
    }
}

/// Per-locus, per-allele QC counters written to the `variant_qc` array.
///
/// Cells are keyed by `(contig, pos, allele)` and submitted in global
/// order through the shared writer.
#[derive(Debug)]
pub struct VariantQc {
    writer: Arc<SharedArrayWriter>,
    acc: LocusAccumulator<QcCounts>,
    locus_pos: i32,
    contigs: VarColumn,
    positions: Vec<i32>,
    alleles: VarColumn,
    ac: Vec<i32>,
    n_hom: Vec<i32>,
    n_called: Vec<i32>,
    n_pass: Vec<i32>,
    sample: String,
    finalized: bool,
}

impl VariantQc {
    /// Array name.
    pub const ARRAY: &'static str = "variant_qc";
    /// Contig dimension.
    pub const CONTIG: &'static str = "contig";
    /// Position dimension.
    pub const POS: &'static str = "pos";
    /// Allele dimension.
    pub const ALLELE: &'static str = "allele";
    /// Counter attributes, in schema order.
    pub const ATTRIBUTES: [&'static str; 4] = ["ac", "n_hom", "n_called", "n_pass"];

    /// Aggregator writing through `writer`.
    pub fn new(writer: Arc<SharedArrayWriter>) -> Self {
        writer.attach();
        Self {
            writer,
            acc: LocusAccumulator::new(),
            locus_pos: 0,
            contigs: VarColumn::default(),
            positions: Vec::new(),
            alleles: VarColumn::default(),
            ac: Vec::new(),
            n_hom: Vec::new(),
            n_called: Vec::new(),
            n_pass: Vec::new(),
            sample: String::new(),
            finalized: false,
        }
    }

    fn update_results(&mut self) {
        let Some(locus) = self.acc.locus().cloned() else {
            return;
        };
        for (allele, counts) in self.acc.take_values() {
            self.contigs.push(&locus.contig);
            self.positions.push(self.locus_pos);
            self.alleles.push(&allele);
            self.ac.push(counts.ac);
            self.n_hom.push(counts.n_hom);
            self.n_called.push(counts.n_called);
            self.n_pass.push(counts.n_pass);
        }
    }

    fn submit_pending(&mut self) -> Result<(), StatsError> {
        if self.positions.is_empty() {
            return Ok(());
        }

        debug!(entries = self.positions.len(), "VariantQc: flush");

        let [ac, n_hom, n_called, n_pass] = Self::ATTRIBUTES;
        let batch = WriteBatch::new()
            .with(Self::CONTIG, self.contigs.column())
            .with(Self::POS, ColumnRef::Int32(&self.positions))
            .with(Self::ALLELE, self.alleles.column())
            .with(ac, ColumnRef::Int32(&self.ac))
            .with(n_hom, ColumnRef::Int32(&self.n_hom))
            .with(n_called, ColumnRef::Int32(&self.n_called))
            .with(n_pass, ColumnRef::Int32(&self.n_pass));
        let locus = self.acc.locus().map(ToString::to_string).unwrap_or_default();
        let result = submit_batch(&self.writer, &batch, &locus, &self.sample);

        self.clear_pending();
        result
    }

    fn clear_pending(&mut self) {
        self.contigs.clear();
        self.positions.clear();
        self.alleles.clear();
        self.ac.clear();
        self.n_hom.clear();
        self.n_called.clear();
        self.n_pass.clear();
    }
}

impl IngestionTask for VariantQc {
    fn array_name() -> &'static str {
        Self::ARRAY
    }

    fn layout() -> Layout {
        Layout::GlobalOrder
    }

    fn schema(checksum: Option<ChecksumKind>) -> ArraySchema {
        let (data_filters, offsets_filters) = stats_filters(checksum);
        let mut schema = ArraySchema::sparse()
            .with_allows_dups(true)
            .with_dimension(Dimension::new(Self::CONTIG, Datatype::StringAscii))
            .with_dimension(Dimension::new(Self::POS, Datatype::Int32))
            .with_dimension(Dimension::new(Self::ALLELE, Datatype::StringAscii))
            .with_coords_filters(data_filters.clone())
            .with_offsets_filters(offsets_filters);
        for name in Self::ATTRIBUTES {
            schema = schema.with_attribute(Attribute::new(name, Datatype::Int32).with_filters(data_filters.clone()));
        }
        schema
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
            let locus_pos = i32::try_from(pos).map_err(|_| StatsError::Position {
                array: Self::ARRAY.to_string(),
                locus: format!("{contig}:{pos}"),
            })?;
            self.update_results();
            self.acc.start(contig, pos);
            self.locus_pos = locus_pos;
        }
        if self.sample != sample_name {
            self.sample.clear();
            self.sample.push_str(sample_name);
        }
        let pass = record.filter_pass;
        self.acc
            .tally_alt_calls(record, |counts, homozygous| counts.add_call(homozygous, pass));
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
        self.positions.len()
    }
}

impl Drop for VariantQc {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("VariantQc: {e}");
        }
    }
}
