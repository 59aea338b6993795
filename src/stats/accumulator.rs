use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::genomics::{GenotypeCall, Locus, VariantRecord};
use crate::store::ColumnRef;

/// Per-allele values of the locus an aggregator is currently on.
///
/// Alleles are kept sorted so a locus is always emitted in the same order.
#[derive(Debug)]
pub(crate) struct LocusAccumulator<V> {
    locus: Option<Locus>,
    values: BTreeMap<Arc<str>, V>,
    scratch: Vec<i32>,
}

impl<V: Default> LocusAccumulator<V> {
    pub(crate) fn new() -> Self {
        Self {
            locus: None,
            values: BTreeMap::new(),
            scratch: Vec::new(),
        }
    }

    /// Current locus, if any record has been seen.
    pub(crate) fn locus(&self) -> Option<&Locus> {
        self.locus.as_ref()
    }

    pub(crate) fn is_current(&self, contig: &str, pos: u32) -> bool {
        self.locus
            .as_ref()
            .is_some_and(|l| l.pos == pos && &*l.contig == contig)
    }

    /// Move to a new locus. Values of the previous one must be taken first.
    pub(crate) fn start(&mut self, contig: &str, pos: u32) {
        debug_assert!(self.values.is_empty());
        let contig = match &self.locus {
            Some(prev) if &*prev.contig == contig => Arc::clone(&prev.contig),
            _ => Arc::from(contig),
        };
        self.locus = Some(Locus { contig, pos });
    }

    /// Drain the values of the current locus, sorted by allele.
    pub(crate) fn take_values(&mut self) -> BTreeMap<Arc<str>, V> {
        std::mem::take(&mut self.values)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Decode the record's genotype into the scratch buffer and call `f`
    /// once per non-missing, non-reference call with that allele's values
    /// and whether the genotype is homozygous.
    pub(crate) fn tally_alt_calls<F>(&mut self, record: &VariantRecord, mut f: F)
    where
        F: FnMut(&mut V, bool),
    {
        let ncalls = record.genotypes_into(&mut self.scratch);
        let calls = &self.scratch[..ncalls];
        let homozygous = is_homozygous(calls);

        for &raw in calls {
            let Some(idx) = GenotypeCall::from_raw(raw).allele() else {
                continue;
            };
            if idx == 0 {
                continue;
            }
            let Some(allele) = record.alleles.get(idx) else {
                continue;
            };
            let value = self.values.entry(Arc::clone(allele)).or_default();
            f(value, homozygous);
        }
    }

    #[cfg(test)]
    pub(crate) fn scratch_capacity(&self) -> usize {
        self.scratch.capacity()
    }
}

/// At least two calls, none missing, all to the same allele.
fn is_homozygous(calls: &[i32]) -> bool {
    let mut alleles = calls.iter().map(|&raw| GenotypeCall::from_raw(raw).allele());
    match alleles.next() {
        Some(Some(first)) if calls.len() >= 2 => alleles.all(|a| a == Some(first)),
        _ => false,
    }
}

/// Append-only variable-length string column.
#[derive(Debug, Default, Clone)]
pub(crate) struct VarColumn {
    data: Vec<u8>,
    offsets: Vec<u64>,
}

impl VarColumn {
    pub(crate) fn push(&mut self, value: &str) {
        self.offsets.push(self.data.len() as u64);
        self.data.extend_from_slice(value.as_bytes());
    }

    pub(crate) fn push_fmt(&mut self, args: fmt::Arguments<'_>) {
        use std::io::Write;
        self.offsets.push(self.data.len() as u64);
        // Writing into a Vec cannot fail.
        let _ = self.data.write_fmt(args);
    }

    pub(crate) fn len(&self) -> usize {
        self.offsets.len()
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.offsets.clear();
    }

    pub(crate) fn column(&self) -> ColumnRef<'_> {
        ColumnRef::Var {
            data: &self.data,
            offsets: &self.offsets,
        }
    }

    /// First `max` bytes of the data buffer, for log lines.
    pub(crate) fn preview(&self, max: usize) -> String {
        let end = self.data.len().min(max);
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }
}
