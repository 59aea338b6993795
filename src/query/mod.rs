//! Read side: result buffers, per-step size accounting and pagination.

mod buffers;
mod paginate;
mod results;

pub use buffers::{AttributeBuffer, BufferShape, ReadBuffers};
pub use paginate::{Paginator, ReadConfig, MAX_GROWTH_FACTOR};
pub use results::{
    AttributeResultSize, DatasetVersion, ReadStep, ResultBufferTracker, ALLELES, CONTIG,
    FILTER_IDS, FMT, ID, INFO, SAMPLE, START_POS,
};

use std::collections::HashMap;

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by paginated reads.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The engine reported a failed step.
    #[error("read query failed after returning {} attribute sizes", attribute_sizes.len())]
    QueryFailed {
        /// Sizes reported with the failed step.
        attribute_sizes: HashMap<String, AttributeResultSize>,
    },

    /// A buffer would have to grow past its configured limit.
    #[error("buffer for attribute '{attribute}' would grow to {requested} bytes (limit {limit})")]
    BufferLimit {
        /// Attribute whose buffer is too small.
        attribute: String,
        /// Requested capacity in bytes.
        requested: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Attribute is not part of the array schema.
    #[error("unknown attribute '{0}'")]
    UnknownAttribute(String),

    /// Invalid read configuration.
    #[error("invalid read configuration: {0}")]
    InvalidConfiguration(String),

    /// Storage engine error.
    #[error(transparent)]
    Store(#[from] StoreError),
}
