use std::sync::Arc;

use tracing::trace;

use super::{HeapError, MergeHeap, NodeType, SourceId};
use crate::genomics::{ContigOrder, RecordSource, VariantRecord};

/// One item of the globally ordered ingestion stream.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    /// Record or anchor.
    pub node_type: NodeType,
    /// Record payload shared with the source.
    pub record: Arc<VariantRecord>,
    /// Position the item is ordered (and written) at.
    pub sort_key: u32,
    /// Sample the record belongs to.
    pub sample_id: u32,
    /// Last item of the record's anchor chain.
    pub end_node: bool,
}

/// K-way merge of record sources into one ascending stream.
///
/// Records spanning more than `anchor_gap` bases are followed by anchors
/// every `anchor_gap` bases up to their end, so a position-range query can
/// find them without scanning back to the true start. An anchor gap of zero
/// disables anchors.
#[derive(Debug)]
pub struct MergeStream<S: RecordSource> {
    heap: MergeHeap,
    sources: Vec<S>,
    anchor_gap: u32,
}

impl<S: RecordSource> MergeStream<S> {
    /// Build the stream and pull in the first record of every source.
    pub fn new(sources: Vec<S>, contigs: Arc<ContigOrder>, anchor_gap: u32) -> Result<Self, HeapError> {
        let heap = MergeHeap::with_capacity(contigs, sources.len());
        let mut stream = Self {
            heap,
            sources,
            anchor_gap,
        };
        for source in 0..stream.sources.len() {
            stream.insert_current(source)?;
        }
        Ok(stream)
    }

    /// Record sources driving the merge.
    pub fn sources(&self) -> &[S] {
        &self.sources
    }

    /// Number of pending nodes.
    pub fn pending(&self) -> usize {
        self.heap.len()
    }

    /// Give the sources back, dropping anything still pending.
    pub fn into_sources(mut self) -> Vec<S> {
        self.heap.clear();
        self.sources
    }

    fn next_anchor(&self, after: u32, end: u32) -> Option<u32> {
        if self.anchor_gap == 0 {
            return None;
        }
        after.checked_add(self.anchor_gap).filter(|&pos| pos <= end)
    }

    fn insert_current(&mut self, source: SourceId) -> Result<(), HeapError> {
        let src = &self.sources[source];
        let Some(record) = src.current_record().cloned() else {
            return Ok(());
        };
        let sample_id = src.sample_id();
        let end = src.end_position(&record);
        let end_node = self.next_anchor(record.start, end).is_none();
        let start = record.start;
        self.heap
            .insert(source, NodeType::Record, record, start, sample_id, end_node)
    }

    fn schedule_anchor(
        &mut self,
        source: SourceId,
        record: &Arc<VariantRecord>,
        after: u32,
        sample_id: u32,
    ) -> Result<(), HeapError> {
        let end = self.sources[source].end_position(record);
        if let Some(pos) = self.next_anchor(after, end) {
            let end_node = self.next_anchor(pos, end).is_none();
            self.heap.insert(
                source,
                NodeType::Anchor,
                Arc::clone(record),
                pos,
                sample_id,
                end_node,
            )?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<MergedRecord, HeapError> {
        let node = self.heap.pop()?;
        trace!(
            node_type = %node.node_type,
            contig = %node.record.contig,
            sort_key = node.sort_key,
            sample_id = node.sample_id,
            "merge pop"
        );

        if !node.end_node {
            self.schedule_anchor(node.source, &node.record, node.sort_key, node.sample_id)?;
        }

        if node.node_type == NodeType::Record {
            let advanced = self.sources[node.source]
                .advance()
                .map_err(|source| HeapError::Source {
                    sample_id: node.sample_id,
                    source,
                })?;
            if advanced {
                self.insert_current(node.source)?;
            }
        }

        Ok(MergedRecord {
            node_type: node.node_type,
            record: node.record,
            sort_key: node.sort_key,
            sample_id: node.sample_id,
            end_node: node.end_node,
        })
    }
}

impl<S: RecordSource> Iterator for MergeStream<S> {
    type Item = Result<MergedRecord, HeapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.heap.is_empty() {
            return None;
        }
        let item = self.step();
        if item.is_err() {
            // A failed step leaves the merge in an undefined state.
            self.heap.clear();
        }
        Some(item)
    }
}
