//! Incremental per-locus statistics written to auxiliary arrays during ingestion.
//!
//! Each ingestion worker owns its aggregators. All aggregators of one kind
//! share a single [`SharedArrayWriter`], whose lock is the only
//! synchronisation point between workers. Workers must feed their
//! aggregators disjoint, sorted locus ranges: the writer does not reorder
//! cells, and a global-order array rejects submits that go backwards.

mod accumulator;
mod allele_count;
mod run;
mod variant_qc;
mod writer;

pub use allele_count::AlleleCounter;
pub use run::{StatsAggregators, StatsWriters};
pub use variant_qc::{QcCounts, VariantQc};
pub use writer::SharedArrayWriter;

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::genomics::VariantRecord;
use crate::store::{
    uri_join, ArraySchema, ChecksumKind, FilterKind, FilterList, Layout, QueryStatus,
    StorageEngine, StoreError, WriteBatch,
};

/// Gzip level used for every statistics array filter pipeline.
pub const STATS_GZIP_LEVEL: i32 = 9;

/// Errors raised by statistics aggregators.
///
/// Every variant names the array and the locus and sample in flight, which
/// is enough to diagnose a failed run without re-running it.
#[derive(Debug, Error)]
pub enum StatsError {
    /// The engine rejected a submit.
    #[error("{array}: error submitting write query at locus {locus} from sample '{sample}'")]
    Submit {
        /// Array name.
        array: String,
        /// Last locus buffered before the submit.
        locus: String,
        /// Last sample processed before the submit.
        sample: String,
        /// Engine error.
        #[source]
        source: StoreError,
    },

    /// A submit did not report full completion.
    #[error("{array}: write query at locus {locus} from sample '{sample}' finished with status {status}")]
    Incomplete {
        /// Array name.
        array: String,
        /// Last locus buffered before the submit.
        locus: String,
        /// Last sample processed before the submit.
        sample: String,
        /// Status the engine reported.
        status: QueryStatus,
    },

    /// A locus position does not fit the array's Int32 position dimension.
    #[error("{array}: position of locus {locus} exceeds the Int32 position dimension")]
    Position {
        /// Array name.
        array: String,
        /// Offending locus.
        locus: String,
    },

    /// Array lifecycle misuse (closing twice, writing after close).
    #[error("{array}: {source}")]
    ArrayState {
        /// Array name.
        array: String,
        /// Engine error.
        #[source]
        source: StoreError,
    },
}

/// Capability shared by every statistics aggregator.
///
/// `create` and `init` act on the array and run once per dataset and per
/// ingestion run; the remaining methods act on one aggregator instance.
pub trait IngestionTask: Send {
    /// Name of the array within the dataset.
    fn array_name() -> &'static str
    where
        Self: Sized;

    /// Layout of the shared write query.
    fn layout() -> Layout
    where
        Self: Sized;

    /// Schema of the array.
    fn schema(checksum: Option<ChecksumKind>) -> ArraySchema
    where
        Self: Sized;

    /// Create the array under `root`.
    fn create(
        engine: &dyn StorageEngine,
        root: &str,
        checksum: Option<ChecksumKind>,
    ) -> Result<(), StoreError>
    where
        Self: Sized,
    {
        let uri = uri_join(root, Self::array_name());
        debug!(array = Self::array_name(), %uri, "Creating statistics array");
        engine.create_array(&uri, Self::schema(checksum))
    }

    /// Open the array for writing, shared by all aggregators of this run.
    fn init(engine: &dyn StorageEngine, root: &str) -> Result<Arc<SharedArrayWriter>, StoreError>
    where
        Self: Sized,
    {
        SharedArrayWriter::open(engine, root, Self::array_name(), Self::layout())
    }

    /// Add one record at `contig:pos`.
    ///
    /// Calls must arrive in non-decreasing locus order and each record must
    /// be processed once. Never touches the shared write query. Fails with
    /// [`StatsError::ArrayState`] once the aggregator is finalized.
    fn process(
        &mut self,
        sample_name: &str,
        contig: &str,
        pos: u32,
        record: &VariantRecord,
    ) -> Result<(), StatsError>;

    /// Submit the pending buffers of completed loci. The current locus
    /// stays open, since later records may still add to it.
    fn flush_completed(&mut self) -> Result<(), StatsError>;

    /// Move the current locus into the pending buffers and submit them.
    ///
    /// Only safe once no further record can land on the current locus.
    fn flush(&mut self) -> Result<(), StatsError>;

    /// Flush and release the shared writer. Later calls do nothing.
    fn finalize(&mut self) -> Result<(), StatsError>;

    /// Entries waiting in the pending buffers.
    fn pending_entries(&self) -> usize;
}

/// Coordinate and offsets filters used by the statistics arrays.
pub(crate) fn stats_filters(checksum: Option<ChecksumKind>) -> (FilterList, FilterList) {
    let gzip = FilterKind::Gzip {
        level: STATS_GZIP_LEVEL,
    };
    let data = FilterList::new().with(gzip).with_checksum(checksum);
    let offsets = FilterList::new()
        .with(FilterKind::DoubleDelta)
        .with(gzip)
        .with_checksum(checksum);
    (data, offsets)
}

/// Submit a batch through the shared writer, mapping any outcome other
/// than full completion to a fatal error carrying the run context.
pub(crate) fn submit_batch(
    writer: &SharedArrayWriter,
    batch: &WriteBatch<'_>,
    locus: &str,
    sample: &str,
) -> Result<(), StatsError> {
    match writer.submit(batch) {
        Ok(QueryStatus::Complete) => Ok(()),
        Ok(status) => Err(StatsError::Incomplete {
            array: writer.name().to_string(),
            locus: locus.to_string(),
            sample: sample.to_string(),
            status,
        }),
        Err(source @ StoreError::ArrayState { .. }) => Err(StatsError::ArrayState {
            array: writer.name().to_string(),
            source,
        }),
        Err(source) => Err(StatsError::Submit {
            array: writer.name().to_string(),
            locus: locus.to_string(),
            sample: sample.to_string(),
            source,
        }),
    }
}

/// Error for a record handed to an aggregator after `finalize`.
pub(crate) fn finalized_error(writer: &SharedArrayWriter) -> StatsError {
    StatsError::ArrayState {
        array: writer.name().to_string(),
        source: StoreError::state(writer.uri(), "aggregator is finalized"),
    }
}

/// Release an aggregator's hold on its writer.
pub(crate) fn release_writer(writer: &SharedArrayWriter) -> Result<(), StatsError> {
    writer.release().map_err(|source| StatsError::ArrayState {
        array: writer.name().to_string(),
        source,
    })
}
