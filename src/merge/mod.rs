//! K-way merge of per-sample record streams into one globally ordered stream.
//!
//! The order produced here is the order the main array accepts for a
//! global-order bulk write: `(contig rank, position, sample id)` ascending,
//! with no look-back.

mod heap;
mod stream;

pub use heap::{HeapError, MergeHeap, MergeNode, NodeType, SourceId};
pub use stream::{MergeStream, MergedRecord};
