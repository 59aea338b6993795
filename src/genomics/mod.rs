//! Genomic record model and the per-sample record sources that feed ingestion.
//!
//! Parsing of the record file format itself is delegated to htslib; this
//! module only exposes what the merge and statistics stages consume.

mod source;
mod types;
mod vcf;

pub use source::{RecordSource, SourceError, VecRecordSource};
pub use types::{ContigOrder, GenotypeCall, Locus, VariantRecord, GT_VECTOR_END};
pub use vcf::VcfRecordSource;
