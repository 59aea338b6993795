use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use rust_htslib::bcf::{self, record::GenotypeAllele, Read};
use tracing::debug;

use super::{ContigOrder, GenotypeCall, RecordSource, SourceError, VariantRecord};

/// Record source reading a single-sample VCF/BCF file through htslib.
pub struct VcfRecordSource {
    reader: bcf::Reader,
    record: bcf::Record,
    sample_name: String,
    sample_id: u32,
    contig_names: HashMap<u32, Arc<str>>,
    current: Option<Arc<VariantRecord>>,
}

impl std::fmt::Debug for VcfRecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VcfRecordSource")
            .field("sample_name", &self.sample_name)
            .field("sample_id", &self.sample_id)
            .field("current", &self.current)
            .finish()
    }
}

impl VcfRecordSource {
    /// Open a VCF/BCF file and position the source on its first record.
    pub fn from_path<P: AsRef<Path>>(path: P, sample_id: u32) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let reader = bcf::Reader::from_path(path)?;
        let header = reader.header();

        let sample_name = header
            .samples()
            .first()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .ok_or_else(|| {
                SourceError::malformed(path.display().to_string(), "VCF header has no samples")
            })?;

        let mut contig_names = HashMap::new();
        for rid in 0..header.contig_count() {
            let name = header.rid2name(rid)?;
            contig_names.insert(rid, Arc::from(String::from_utf8_lossy(name).as_ref()));
        }

        let record = reader.empty_record();
        let mut source = Self {
            reader,
            record,
            sample_name,
            sample_id,
            contig_names,
            current: None,
        };
        source.advance()?;
        debug!(
            sample = %source.sample_name,
            sample_id,
            contigs = source.contig_names.len(),
            "opened VCF record source"
        );
        Ok(source)
    }

    /// Contigs declared in the file header, in header order.
    pub fn contigs(&self) -> ContigOrder {
        let mut rids: Vec<_> = self.contig_names.keys().copied().collect();
        rids.sort_unstable();
        ContigOrder::new(rids.into_iter().map(|rid| Arc::clone(&self.contig_names[&rid])))
    }

    fn convert_current(&self) -> Result<VariantRecord, SourceError> {
        let rid = self.record.rid().ok_or_else(|| {
            SourceError::malformed(self.sample_name.as_str(), "record has no contig")
        })?;
        let contig = self.contig_names.get(&rid).cloned().ok_or_else(|| {
            SourceError::malformed(
                self.sample_name.as_str(),
                format!("record contig id {rid} is not declared in the header"),
            )
        })?;

        let start = u32::try_from(self.record.pos()).map_err(|_| {
            SourceError::malformed(self.sample_name.as_str(), "negative record position")
        })?;
        // htslib reports a half-open end; records store it inclusive.
        let end = u32::try_from(self.record.end() - 1).unwrap_or(start).max(start);

        let alleles = self
            .record
            .alleles()
            .into_iter()
            .map(|a| Arc::from(String::from_utf8_lossy(a).as_ref()))
            .collect();

        let genotypes = match self.record.genotypes() {
            Ok(genotypes) => genotypes
                .get(0)
                .iter()
                .map(|allele| encode_allele(*allele).raw())
                .collect(),
            Err(_) => Vec::new(),
        };

        Ok(VariantRecord {
            contig,
            start,
            end,
            alleles,
            genotypes,
            filter_pass: self.record.has_filter("PASS".as_bytes()),
        })
    }
}

fn encode_allele(allele: GenotypeAllele) -> GenotypeCall {
    match allele {
        GenotypeAllele::Unphased(idx) => GenotypeCall::called(idx as u32, false),
        GenotypeAllele::Phased(idx) => GenotypeCall::called(idx as u32, true),
        GenotypeAllele::UnphasedMissing => GenotypeCall::missing(),
        GenotypeAllele::PhasedMissing => GenotypeCall::from_raw(1),
    }
}

impl RecordSource for VcfRecordSource {
    fn sample_name(&self) -> &str {
        &self.sample_name
    }

    fn sample_id(&self) -> u32 {
        self.sample_id
    }

    fn current_record(&self) -> Option<&Arc<VariantRecord>> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<bool, SourceError> {
        match self.reader.read(&mut self.record) {
            Some(Ok(())) => {
                let converted = self.convert_current()?;
                self.current = Some(Arc::new(converted));
                Ok(true)
            }
            Some(Err(err)) => Err(err.into()),
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }
}
