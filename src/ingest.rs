//! Ingestion glue: merge the sources, write every item to the main array
//! sink and feed records to the statistics aggregators.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::genomics::{ContigOrder, RecordSource};
use crate::merge::{MergeStream, MergedRecord, NodeType};
use crate::stats::StatsAggregators;
use crate::{IngestConfig, IngestError};

/// Destination of the merged stream (the main variant array writer).
pub trait RecordSink {
    /// Accept the next item in global order.
    fn write(&mut self, item: &MergedRecord) -> Result<(), IngestError>;

    /// Called once after the last item.
    fn finish(&mut self) -> Result<(), IngestError> {
        Ok(())
    }
}

impl RecordSink for Vec<MergedRecord> {
    fn write(&mut self, item: &MergedRecord) -> Result<(), IngestError> {
        self.push(item.clone());
        Ok(())
    }
}

/// Counts reported by [`ingest_sources`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IngestSummary {
    /// Samples ingested.
    pub samples: usize,
    /// Record items written.
    pub records: u64,
    /// Anchor items written.
    pub anchors: u64,
}

/// Merge `sources`, forward every item to `sink` and every record (not
/// anchor) to `aggregators`, then finalize the aggregators.
///
/// The first error aborts the run; nothing already written is rolled back.
pub fn ingest_sources<S: RecordSource>(
    sources: Vec<S>,
    contigs: Arc<ContigOrder>,
    config: &IngestConfig,
    sink: &mut dyn RecordSink,
    aggregators: &mut StatsAggregators,
) -> Result<IngestSummary, IngestError> {
    config.validate()?;

    let names: HashMap<u32, String> = sources
        .iter()
        .map(|s| (s.sample_id(), s.sample_name().to_string()))
        .collect();
    let mut summary = IngestSummary {
        samples: names.len(),
        ..IngestSummary::default()
    };
    debug!(samples = summary.samples, anchor_gap = config.anchor_gap, "Starting ingestion");

    let mut stream = MergeStream::new(sources, contigs, config.anchor_gap)?;
    for item in &mut stream {
        let item = item?;
        sink.write(&item)?;
        match item.node_type {
            NodeType::Record => {
                summary.records += 1;
                let sample = names
                    .get(&item.sample_id)
                    .map(String::as_str)
                    .unwrap_or_default();
                aggregators.process(sample, &item.record)?;
            }
            NodeType::Anchor => summary.anchors += 1,
        }
    }

    sink.finish()?;
    aggregators.finalize()?;
    info!(
        samples = summary.samples,
        records = summary.records,
        anchors = summary.anchors,
        "Ingestion complete"
    );
    Ok(summary)
}
