use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::genomics::{ContigOrder, SourceError, VariantRecord};

/// Index of a record source within one ingestion batch.
pub type SourceId = usize;

/// Kind of pending unit held by the merge heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// The record itself, keyed by its start position.
    Record,
    /// Synthetic continuation of a long record at a later position.
    Anchor,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Record => f.write_str("record"),
            NodeType::Anchor => f.write_str("anchor"),
        }
    }
}

/// Errors raised by the merge stage.
#[derive(Debug, Error)]
pub enum HeapError {
    /// A node would sort before the start of its own record.
    #[error(
        "error inserting {node_type} '{contig}:{}-{}' into ingestion heap from sample ID {sample_id} \
         (source {source_id}); sort start position {} cannot be less than start",
        .start + 1,
        .end + 1,
        .sort_key + 1
    )]
    OrderingViolation {
        /// Kind of node being inserted.
        node_type: NodeType,
        /// Contig of the record.
        contig: String,
        /// 0-based record start.
        start: u32,
        /// 0-based inclusive record end.
        end: u32,
        /// Sample the record belongs to.
        sample_id: u32,
        /// Source the record came from.
        source_id: SourceId,
        /// Offending sort position.
        sort_key: u32,
    },

    /// The record's contig is not part of the dataset's contig enumeration.
    #[error("contig '{contig}' from sample ID {sample_id} is not in the dataset contig dictionary")]
    UnknownContig {
        /// Contig name.
        contig: String,
        /// Sample the record belongs to.
        sample_id: u32,
    },

    /// `top`/`pop` on an empty heap.
    #[error("merge heap is empty")]
    EmptyHeap,

    /// The record source failed while advancing.
    #[error("record source for sample ID {sample_id} failed: {source}")]
    Source {
        /// Sample of the failing source.
        sample_id: u32,
        /// Underlying source error.
        #[source]
        source: SourceError,
    },
}

/// One pending unit of the merge.
#[derive(Debug, Clone)]
pub struct MergeNode {
    /// Source the record was pulled from.
    pub source: SourceId,
    /// Record or anchor.
    pub node_type: NodeType,
    /// Shared handle to the record payload.
    pub record: Arc<VariantRecord>,
    /// Rank of the record's contig in the dataset enumeration.
    pub contig_rank: u32,
    /// Position used for ordering; never less than `record.start`.
    pub sort_key: u32,
    /// Sample identifier, used as the tie-break.
    pub sample_id: u32,
    /// Marks the last node of a record's anchor chain.
    pub end_node: bool,
}

#[derive(Debug)]
struct HeapEntry {
    key: (u32, u32, u32, u64),
    node: MergeNode,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    // Reversed so the max-heap yields the smallest key first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.key.cmp(&self.key)
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-priority queue merging per-sample record streams.
///
/// Nodes pop in ascending `(contig rank, sort key, sample id)` order. Nodes
/// with equal keys pop in insertion order, so the merge is stable.
#[derive(Debug)]
pub struct MergeHeap {
    heap: BinaryHeap<HeapEntry>,
    contigs: Arc<ContigOrder>,
    next_seq: u64,
}

impl MergeHeap {
    /// Create an empty heap ordering contigs by the given enumeration.
    pub fn new(contigs: Arc<ContigOrder>) -> Self {
        Self::with_capacity(contigs, 0)
    }

    /// Create an empty heap sized for `capacity` pending nodes.
    pub fn with_capacity(contigs: Arc<ContigOrder>, capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            contigs,
            next_seq: 0,
        }
    }

    /// Contig enumeration used for ordering.
    pub fn contigs(&self) -> &ContigOrder {
        &self.contigs
    }

    /// Push a node for `record`.
    ///
    /// Fails without touching the heap when `sort_key` lies before the record
    /// start or the record's contig is unknown.
    pub fn insert(
        &mut self,
        source: SourceId,
        node_type: NodeType,
        record: Arc<VariantRecord>,
        sort_key: u32,
        sample_id: u32,
        end_node: bool,
    ) -> Result<(), HeapError> {
        if sort_key < record.start {
            return Err(HeapError::OrderingViolation {
                node_type,
                contig: record.contig.to_string(),
                start: record.start,
                end: record.end,
                sample_id,
                source_id: source,
                sort_key,
            });
        }

        let contig_rank =
            self.contigs
                .rank(&record.contig)
                .ok_or_else(|| HeapError::UnknownContig {
                    contig: record.contig.to_string(),
                    sample_id,
                })?;

        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry {
            key: (contig_rank, sort_key, sample_id, seq),
            node: MergeNode {
                source,
                node_type,
                record,
                contig_rank,
                sort_key,
                sample_id,
                end_node,
            },
        });
        Ok(())
    }

    /// Smallest pending node.
    pub fn top(&self) -> Result<&MergeNode, HeapError> {
        self.heap
            .peek()
            .map(|entry| &entry.node)
            .ok_or(HeapError::EmptyHeap)
    }

    /// Remove and return the smallest pending node.
    pub fn pop(&mut self) -> Result<MergeNode, HeapError> {
        self.heap
            .pop()
            .map(|entry| entry.node)
            .ok_or(HeapError::EmptyHeap)
    }

    /// Whether no nodes are pending.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Number of pending nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Drop all pending nodes; the record sources are left untouched.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
