use std::fmt;

use super::{ArraySchema, StoreError};
use crate::query::{ReadBuffers, ReadStep};

/// Cell order a write query expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Layout {
    /// Cells arrive in non-decreasing coordinate order across all submits.
    GlobalOrder,
    /// Cells arrive in any order; every submit becomes its own fragment.
    Unordered,
}

/// Completion state of a query (step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum QueryStatus {
    /// All results delivered / all cells written.
    Complete,
    /// Buffers filled before the query finished; resubmit to continue.
    Incomplete,
    /// The query failed.
    Failed,
    /// No step has run yet.
    #[default]
    Uninitialized,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueryStatus::Complete => "COMPLETE",
            QueryStatus::Incomplete => "INCOMPLETE",
            QueryStatus::Failed => "FAILED",
            QueryStatus::Uninitialized => "UNINITIALIZED",
        };
        f.write_str(s)
    }
}

/// Mode an array is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Open for read queries.
    Read,
    /// Open for write queries.
    Write,
}

/// Value of one field of one cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CellValue {
    /// Integer of any fixed-width datatype.
    Int(i64),
    /// Variable-length bytes.
    Bytes(Vec<u8>),
    /// Multi-valued cell: list of variable-length values.
    List(Vec<Vec<u8>>),
    /// Null cell of a nullable attribute.
    Null,
}

impl CellValue {
    /// Integer payload, if any.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            CellValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Byte payload interpreted as UTF-8, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Bytes(value.as_bytes().to_vec())
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Int(value)
    }
}

/// Borrowed column buffer attached to a write query.
#[derive(Debug, Clone, Copy)]
pub enum ColumnRef<'a> {
    /// Fixed-width signed integers.
    Int32(&'a [i32]),
    /// Fixed-width unsigned integers.
    UInt32(&'a [u32]),
    /// Fixed-width unsigned 64-bit integers.
    UInt64(&'a [u64]),
    /// Variable-length values: concatenated bytes plus the start offset of each cell.
    Var {
        /// Concatenated cell data.
        data: &'a [u8],
        /// Start offset of each cell in `data`.
        offsets: &'a [u64],
    },
}

impl ColumnRef<'_> {
    /// Number of cells in the column.
    pub fn len(&self) -> usize {
        match self {
            ColumnRef::Int32(v) => v.len(),
            ColumnRef::UInt32(v) => v.len(),
            ColumnRef::UInt64(v) => v.len(),
            ColumnRef::Var { offsets, .. } => offsets.len(),
        }
    }

    /// Whether the column holds no cells.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the column carries variable-length values.
    pub fn is_var(&self) -> bool {
        matches!(self, ColumnRef::Var { .. })
    }

    /// Value of one cell.
    pub fn cell(&self, idx: usize) -> Option<CellValue> {
        match self {
            ColumnRef::Int32(v) => v.get(idx).map(|&x| CellValue::Int(x as i64)),
            ColumnRef::UInt32(v) => v.get(idx).map(|&x| CellValue::Int(x as i64)),
            ColumnRef::UInt64(v) => v.get(idx).map(|&x| CellValue::Int(x as i64)),
            ColumnRef::Var { data, offsets } => {
                let start = *offsets.get(idx)? as usize;
                let end = offsets
                    .get(idx + 1)
                    .map(|&o| o as usize)
                    .unwrap_or(data.len());
                data.get(start..end).map(|bytes| CellValue::Bytes(bytes.to_vec()))
            }
        }
    }
}

/// Named set of column buffers submitted together.
#[derive(Debug, Default)]
pub struct WriteBatch<'a> {
    columns: Vec<(&'a str, ColumnRef<'a>)>,
}

impl<'a> WriteBatch<'a> {
    /// Empty batch.
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with(mut self, name: &'a str, column: ColumnRef<'a>) -> Self {
        self.columns.push((name, column));
        self
    }

    /// Named columns in attach order.
    pub fn columns(&self) -> &[(&'a str, ColumnRef<'a>)] {
        &self.columns
    }

    /// Number of cells (length of the first column).
    pub fn cells(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }

    /// Whether the batch carries no cells.
    pub fn is_empty(&self) -> bool {
        self.cells() == 0
    }
}

/// Write handle for one array.
pub trait WriteQuery: Send {
    /// Layout the query was created with.
    fn layout(&self) -> Layout;

    /// Attach the buffer for one field.
    fn set_buffer(&mut self, name: &str, column: ColumnRef<'_>) -> Result<(), StoreError>;

    /// Write the attached buffers.
    fn submit(&mut self) -> Result<QueryStatus, StoreError>;

    /// Detach all buffers.
    fn reset_buffers(&mut self);

    /// Seal the query; no submits are accepted afterwards.
    fn finalize(&mut self) -> Result<(), StoreError>;
}

/// Paginated read over an array.
pub trait ReadQuery: Send {
    /// Run one step, filling `buffers` from where the previous step stopped.
    fn submit(&mut self, buffers: &mut ReadBuffers) -> Result<ReadStep, StoreError>;
}

/// Open array.
pub trait ArrayHandle: Send {
    /// Array URI.
    fn uri(&self) -> &str;

    /// Array schema.
    fn schema(&self) -> &ArraySchema;

    /// Mode the array was opened in.
    fn mode(&self) -> OpenMode;

    /// Whether the handle is still open.
    fn is_open(&self) -> bool;

    /// Create a write query; requires [`OpenMode::Write`].
    fn write_query(&mut self, layout: Layout) -> Result<Box<dyn WriteQuery>, StoreError>;

    /// Create a read query over `fields`; requires [`OpenMode::Read`].
    fn read_query(&self, fields: &[&str]) -> Result<Box<dyn ReadQuery>, StoreError>;

    /// Close the handle. Closing twice is an error.
    fn close(&mut self) -> Result<(), StoreError>;
}

/// Storage engine the core writes to and reads from.
pub trait StorageEngine: Send + Sync {
    /// Create an array with the given schema.
    fn create_array(&self, uri: &str, schema: ArraySchema) -> Result<(), StoreError>;

    /// Whether an array exists at `uri`.
    fn array_exists(&self, uri: &str) -> bool;

    /// Open an existing array.
    fn open_array(&self, uri: &str, mode: OpenMode) -> Result<Box<dyn ArrayHandle>, StoreError>;
}
