//! Storage-engine seam: array schemas, write/read query traits and an
//! in-process engine.
//!
//! The on-disk format, consistency model and query planning belong to the
//! engine behind these traits; the core only relies on the contracts below.

mod engine;
mod memory;
mod schema;

pub use engine::{
    ArrayHandle, CellValue, ColumnRef, Layout, OpenMode, QueryStatus, ReadQuery, StorageEngine,
    WriteBatch, WriteQuery,
};
pub use memory::{Fragment, MemoryStore, Row};
pub use schema::{
    ArraySchema, Attribute, ChecksumKind, Datatype, Dimension, FieldInfo, FilterKind, FilterList,
};

use thiserror::Error;

/// Errors reported by the storage engine.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An array already exists at the URI.
    #[error("array '{uri}' already exists")]
    ArrayExists {
        /// Array URI.
        uri: String,
    },

    /// No array exists at the URI.
    #[error("array '{uri}' does not exist")]
    ArrayNotFound {
        /// Array URI.
        uri: String,
    },

    /// Operation not valid in the array's current state (closed, wrong mode, finalized query).
    #[error("array '{uri}': {message}")]
    ArrayState {
        /// Array URI.
        uri: String,
        /// Description of the state problem.
        message: String,
    },

    /// Buffers do not match the array schema.
    #[error("schema mismatch for array '{uri}': {message}")]
    SchemaMismatch {
        /// Array URI.
        uri: String,
        /// Description of the mismatch.
        message: String,
    },

    /// Cells submitted out of global order.
    #[error("global order violation in array '{uri}': {message}")]
    OrderViolation {
        /// Array URI.
        uri: String,
        /// Description of the offending cells.
        message: String,
    },

    /// A submit did not report full completion.
    #[error("error submitting query to array '{uri}': status {status}")]
    SubmitFailure {
        /// Array URI.
        uri: String,
        /// Status the engine reported.
        status: QueryStatus,
    },
}

impl StoreError {
    /// Helper for constructing state errors.
    pub fn state(uri: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::ArrayState {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Helper for constructing schema mismatch errors.
    pub fn schema(uri: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::SchemaMismatch {
            uri: uri.into(),
            message: message.into(),
        }
    }
}

/// Join an array name onto a dataset root URI.
///
/// Cloud (`tiledb://`) URIs join with `-`, everything else with `/`.
pub fn uri_join(root: &str, name: &str) -> String {
    let delim = if root.starts_with("tiledb://") { '-' } else { '/' };
    let root = root.trim_end_matches(delim);
    if root.is_empty() {
        return name.to_string();
    }
    format!("{root}{delim}{name}")
}
