//! # genostore
//!
//! Ingestion-merge and query-buffer core of a columnar store for genomic
//! variant data.
//!
//! ## Components
//!
//! 1. **Merge** ([`merge`]): k-way merge of per-sample record sources into
//!    one globally ordered stream, with anchor nodes for long records
//! 2. **Statistics** ([`stats`]): per-locus allele counts and QC counters
//!    flushed to auxiliary arrays through shared, lock-protected writers
//! 3. **Query** ([`query`]): result buffer accounting and pagination for
//!    reads against the main array
//!
//! The storage engine sits behind the traits in [`store`]; an in-memory
//! implementation backs the CLI and the tests.
//!
//! ## Usage Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use genostore::{ingest_sources, IngestConfig};
//! use genostore::genomics::ContigOrder;
//! use genostore::stats::StatsWriters;
//! use genostore::store::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let config = IngestConfig::default();
//! StatsWriters::create_arrays(&store, "mem://ds", &config)?;
//! let writers = StatsWriters::open(&store, "mem://ds", &config)?;
//! let mut aggregators = writers.aggregators(config.stats_flush_threshold);
//! let mut merged = Vec::new();
//! ingest_sources(sources, Arc::new(contigs), &config, &mut merged, &mut aggregators)?;
//! writers.close()?;
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod genomics; // Record model and sources
pub mod ingest; // Merge -> sink + aggregators
pub mod logging; // Tracing subscriber setup
pub mod merge; // K-way record merge
pub mod query; // Read-side buffers and pagination
pub mod stats; // Statistics aggregators
pub mod store; // Storage engine seam

pub use genomics::{ContigOrder, RecordSource, VariantRecord};
pub use ingest::{ingest_sources, IngestSummary, RecordSink};
pub use merge::{HeapError, MergeHeap, MergeStream, MergedRecord, NodeType};
pub use query::{ReadError, ResultBufferTracker};
pub use stats::{AlleleCounter, IngestionTask, StatsAggregators, StatsError, VariantQc};
pub use store::{ChecksumKind, StoreError};

use thiserror::Error;

/// Default spacing of anchor nodes, in bases.
pub const DEFAULT_ANCHOR_GAP: u32 = 1000;

/// Default number of pending statistics entries that triggers a flush.
pub const DEFAULT_STATS_FLUSH_THRESHOLD: usize = 8192;

/// Ingestion parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IngestConfig {
    /// Spacing of anchor nodes for long records; zero disables anchors.
    pub anchor_gap: u32,

    /// Pending entries per aggregator that trigger a flush.
    pub stats_flush_threshold: usize,

    /// Collect allele counts.
    pub allele_count: bool,

    /// Collect variant QC counters.
    pub variant_qc: bool,

    /// Checksum filter for the statistics arrays.
    pub checksum: Option<ChecksumKind>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            anchor_gap: DEFAULT_ANCHOR_GAP,
            stats_flush_threshold: DEFAULT_STATS_FLUSH_THRESHOLD,
            allele_count: true,
            variant_qc: true,
            checksum: None,
        }
    }
}

impl IngestConfig {
    /// Set the anchor gap.
    pub fn with_anchor_gap(mut self, gap: u32) -> Self {
        self.anchor_gap = gap;
        self
    }

    /// Set the flush threshold.
    pub fn with_stats_flush_threshold(mut self, threshold: usize) -> Self {
        self.stats_flush_threshold = threshold;
        self
    }

    /// Enable or disable allele counts.
    pub fn with_allele_count(mut self, enabled: bool) -> Self {
        self.allele_count = enabled;
        self
    }

    /// Enable or disable variant QC.
    pub fn with_variant_qc(mut self, enabled: bool) -> Self {
        self.variant_qc = enabled;
        self
    }

    /// Set the checksum filter.
    pub fn with_checksum(mut self, checksum: Option<ChecksumKind>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Check the parameters.
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.stats_flush_threshold == 0 {
            return Err(IngestError::InvalidConfig(
                "stats flush threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors that abort an ingestion run
#[derive(Error, Debug)]
pub enum IngestError {
    /// Invalid ingestion parameters
    #[error("Invalid ingestion configuration: {0}")]
    InvalidConfig(String),

    /// Merge failure (ordering violation, unknown contig, source error)
    #[error(transparent)]
    Merge(#[from] HeapError),

    /// Record source failure outside the merge
    #[error(transparent)]
    Source(#[from] genomics::SourceError),

    /// Storage engine failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Statistics flush failure
    #[error(transparent)]
    Stats(#[from] StatsError),

    /// Read failure
    #[error(transparent)]
    Read(#[from] ReadError),

    /// Main array sink failure
    #[error("Record sink failed: {0}")]
    Sink(String),
}
