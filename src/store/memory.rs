//! In-process storage engine.
//!
//! Keeps every array as a list of fragments in memory. Used by the CLI and
//! the test suites; it enforces the same write contracts a disk-backed
//! engine would (schema-complete buffers, global order across submits).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use tracing::{debug, trace};

use super::{
    ArrayHandle, ArraySchema, CellValue, ColumnRef, Layout, OpenMode, QueryStatus, ReadQuery,
    StorageEngine, StoreError, WriteQuery,
};
use crate::query::{ReadBuffers, ReadStep};

/// One committed cell: field values in schema order (dimensions first).
pub type Row = Vec<CellValue>;

/// Cells committed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Layout of the query that wrote the fragment.
    pub layout: Layout,
    /// Committed cells in submit order.
    pub rows: Vec<Row>,
}

#[derive(Debug)]
struct MemoryArray {
    schema: ArraySchema,
    fragments: Vec<Fragment>,
    forced_status: Option<QueryStatus>,
    submits: usize,
}

#[derive(Debug, Default)]
struct MemoryInner {
    arrays: HashMap<String, MemoryArray>,
}

/// Thread-safe in-memory [`StorageEngine`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
    attach_delay: Option<Duration>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every `set_buffer` call.
    pub fn with_attach_delay(mut self, delay: Duration) -> Self {
        self.attach_delay = Some(delay);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        lock_inner(&self.inner)
    }

    /// Committed fragments of an array.
    pub fn fragments(&self, uri: &str) -> Result<Vec<Fragment>, StoreError> {
        let inner = self.lock();
        let array = inner.arrays.get(uri).ok_or_else(|| not_found(uri))?;
        Ok(array.fragments.clone())
    }

    /// All committed cells sorted by their dimension coordinates.
    pub fn cells(&self, uri: &str) -> Result<Vec<Row>, StoreError> {
        let inner = self.lock();
        let array = inner.arrays.get(uri).ok_or_else(|| not_found(uri))?;
        Ok(sorted_rows(array))
    }

    /// Number of non-empty submits the array has accepted.
    pub fn submit_count(&self, uri: &str) -> Result<usize, StoreError> {
        let inner = self.lock();
        let array = inner.arrays.get(uri).ok_or_else(|| not_found(uri))?;
        Ok(array.submits)
    }

    /// Make every subsequent submit to the array report `status` without writing.
    ///
    /// `Failed` and `Uninitialized` surface as [`StoreError::SubmitFailure`].
    pub fn force_submit_status(
        &self,
        uri: &str,
        status: Option<QueryStatus>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let array = inner.arrays.get_mut(uri).ok_or_else(|| not_found(uri))?;
        array.forced_status = status;
        Ok(())
    }
}

fn lock_inner(inner: &Mutex<MemoryInner>) -> MutexGuard<'_, MemoryInner> {
    // A panic while holding the lock leaves the maps structurally intact.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn not_found(uri: &str) -> StoreError {
    StoreError::ArrayNotFound {
        uri: uri.to_string(),
    }
}

fn sorted_rows(array: &MemoryArray) -> Vec<Row> {
    let dims = array.schema.dimensions.len();
    let mut rows: Vec<Row> = array
        .fragments
        .iter()
        .flat_map(|f| f.rows.iter().cloned())
        .collect();
    rows.sort_by(|a, b| a[..dims].cmp(&b[..dims]));
    rows
}

impl StorageEngine for MemoryStore {
    fn create_array(&self, uri: &str, schema: ArraySchema) -> Result<(), StoreError> {
        if schema.dimensions.is_empty() {
            return Err(StoreError::schema(uri, "sparse array needs at least one dimension"));
        }
        let mut inner = self.lock();
        if inner.arrays.contains_key(uri) {
            return Err(StoreError::ArrayExists {
                uri: uri.to_string(),
            });
        }
        debug!(uri, "Creating array");
        inner.arrays.insert(
            uri.to_string(),
            MemoryArray {
                schema,
                fragments: Vec::new(),
                forced_status: None,
                submits: 0,
            },
        );
        Ok(())
    }

    fn array_exists(&self, uri: &str) -> bool {
        self.lock().arrays.contains_key(uri)
    }

    fn open_array(&self, uri: &str, mode: OpenMode) -> Result<Box<dyn ArrayHandle>, StoreError> {
        let schema = {
            let inner = self.lock();
            inner
                .arrays
                .get(uri)
                .ok_or_else(|| not_found(uri))?
                .schema
                .clone()
        };
        debug!(uri, ?mode, "Opening array");
        Ok(Box::new(MemoryArrayHandle {
            store: self.clone(),
            uri: uri.to_string(),
            schema,
            mode,
            open: true,
        }))
    }
}

struct MemoryArrayHandle {
    store: MemoryStore,
    uri: String,
    schema: ArraySchema,
    mode: OpenMode,
    open: bool,
}

impl MemoryArrayHandle {
    fn check_open(&self, mode: OpenMode) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::state(&self.uri, "array is closed"));
        }
        if self.mode != mode {
            return Err(StoreError::state(
                &self.uri,
                format!("array is open for {:?}, not {:?}", self.mode, mode),
            ));
        }
        Ok(())
    }
}

impl ArrayHandle for MemoryArrayHandle {
    fn uri(&self) -> &str {
        &self.uri
    }

    fn schema(&self) -> &ArraySchema {
        &self.schema
    }

    fn mode(&self) -> OpenMode {
        self.mode
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_query(&mut self, layout: Layout) -> Result<Box<dyn WriteQuery>, StoreError> {
        self.check_open(OpenMode::Write)?;
        Ok(Box::new(MemoryWriteQuery {
            store: self.store.clone(),
            uri: self.uri.clone(),
            schema: self.schema.clone(),
            layout,
            staged: HashMap::new(),
            fragment: None,
            last_key: None,
            finalized: false,
        }))
    }

    fn read_query(&self, fields: &[&str]) -> Result<Box<dyn ReadQuery>, StoreError> {
        self.check_open(OpenMode::Read)?;
        let names: Vec<&str> = self.schema.field_names().collect();
        let mut columns = Vec::with_capacity(fields.len());
        for &field in fields {
            let idx = names
                .iter()
                .position(|n| *n == field)
                .ok_or_else(|| StoreError::schema(&self.uri, format!("unknown field '{field}'")))?;
            columns.push((field.to_string(), idx));
        }
        let rows = {
            let inner = self.store.lock();
            let array = inner
                .arrays
                .get(&self.uri)
                .ok_or_else(|| not_found(&self.uri))?;
            sorted_rows(array)
        };
        Ok(Box::new(MemoryReadQuery {
            uri: self.uri.clone(),
            columns,
            rows,
            cursor: 0,
        }))
    }

    fn close(&mut self) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::state(&self.uri, "array is already closed"));
        }
        debug!(uri = %self.uri, "Closing array");
        self.open = false;
        Ok(())
    }
}

struct MemoryWriteQuery {
    store: MemoryStore,
    uri: String,
    schema: ArraySchema,
    layout: Layout,
    staged: HashMap<String, Vec<CellValue>>,
    fragment: Option<usize>,
    last_key: Option<Row>,
    finalized: bool,
}

impl MemoryWriteQuery {
    fn take_rows(&mut self) -> Result<Vec<Row>, StoreError> {
        let names: Vec<String> = self.schema.field_names().map(str::to_string).collect();
        if let Some(extra) = self.staged.keys().find(|k| !names.contains(k)) {
            return Err(StoreError::schema(
                &self.uri,
                format!("buffer set for unknown field '{extra}'"),
            ));
        }
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let column = self.staged.remove(name).ok_or_else(|| {
                StoreError::schema(&self.uri, format!("no buffer set for field '{name}'"))
            })?;
            columns.push(column);
        }
        let cells = columns.first().map(Vec::len).unwrap_or(0);
        if let Some((name, column)) = names
            .iter()
            .zip(&columns)
            .find(|(_, column)| column.len() != cells)
        {
            return Err(StoreError::schema(
                &self.uri,
                format!("field '{name}' has {} cells, expected {cells}", column.len()),
            ));
        }

        let mut iters: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
        let rows = (0..cells)
            .map(|_| iters.iter_mut().filter_map(|column| column.next()).collect())
            .collect();
        Ok(rows)
    }

    fn check_global_order(&mut self, rows: &[Row]) -> Result<(), StoreError> {
        let dims = self.schema.dimensions.len();
        let mut last = self.last_key.as_deref();
        for row in rows {
            let key = &row[..dims];
            if let Some(last) = last {
                if key < last {
                    return Err(StoreError::OrderViolation {
                        uri: self.uri.clone(),
                        message: format!("cell {key:?} submitted after {last:?}"),
                    });
                }
            }
            last = Some(key);
        }
        // Only an accepted batch moves the watermark.
        self.last_key = last.map(<[CellValue]>::to_vec);
        Ok(())
    }
}

impl WriteQuery for MemoryWriteQuery {
    fn layout(&self) -> Layout {
        self.layout
    }

    fn set_buffer(&mut self, name: &str, column: ColumnRef<'_>) -> Result<(), StoreError> {
        if self.finalized {
            return Err(StoreError::state(&self.uri, "query is finalized"));
        }
        let info = self
            .schema
            .field_info(name)
            .ok_or_else(|| StoreError::schema(&self.uri, format!("unknown field '{name}'")))?;
        if info.var_len != column.is_var() {
            return Err(StoreError::schema(
                &self.uri,
                format!("field '{name}' var-length mismatch"),
            ));
        }
        if let Some(delay) = self.store.attach_delay {
            thread::sleep(delay);
        }
        let values = (0..column.len()).filter_map(|idx| column.cell(idx)).collect();
        self.staged.insert(name.to_string(), values);
        Ok(())
    }

    fn submit(&mut self) -> Result<QueryStatus, StoreError> {
        if self.finalized {
            return Err(StoreError::state(&self.uri, "query is finalized"));
        }
        {
            let inner = self.store.lock();
            let array = inner
                .arrays
                .get(&self.uri)
                .ok_or_else(|| not_found(&self.uri))?;
            match array.forced_status {
                Some(status @ (QueryStatus::Failed | QueryStatus::Uninitialized)) => {
                    return Err(StoreError::SubmitFailure {
                        uri: self.uri.clone(),
                        status,
                    });
                }
                Some(status) => return Ok(status),
                None => {}
            }
        }

        let rows = self.take_rows()?;
        if rows.is_empty() {
            return Ok(QueryStatus::Complete);
        }
        if self.layout == Layout::GlobalOrder {
            self.check_global_order(&rows)?;
        }

        let mut inner = self.store.lock();
        let array = inner
            .arrays
            .get_mut(&self.uri)
            .ok_or_else(|| not_found(&self.uri))?;
        trace!(uri = %self.uri, cells = rows.len(), "Submitting cells");
        array.submits += 1;
        match (self.layout, self.fragment) {
            (Layout::GlobalOrder, Some(idx)) => array.fragments[idx].rows.extend(rows),
            (layout, _) => {
                array.fragments.push(Fragment { layout, rows });
                if layout == Layout::GlobalOrder {
                    self.fragment = Some(array.fragments.len() - 1);
                }
            }
        }
        Ok(QueryStatus::Complete)
    }

    fn reset_buffers(&mut self) {
        self.staged.clear();
    }

    fn finalize(&mut self) -> Result<(), StoreError> {
        if self.finalized {
            return Err(StoreError::state(&self.uri, "query is already finalized"));
        }
        self.finalized = true;
        self.staged.clear();
        Ok(())
    }
}

struct MemoryReadQuery {
    uri: String,
    columns: Vec<(String, usize)>,
    rows: Vec<Row>,
    cursor: usize,
}

impl ReadQuery for MemoryReadQuery {
    fn submit(&mut self, buffers: &mut ReadBuffers) -> Result<ReadStep, StoreError> {
        if let Some((missing, _)) = self.columns.iter().find(|(n, _)| buffers.get(n).is_none()) {
            return Err(StoreError::schema(
                &self.uri,
                format!("no result buffer for field '{missing}'"),
            ));
        }
        buffers.clear_results();

        while let Some(row) = self.rows.get(self.cursor) {
            let fits = self.columns.iter().all(|(name, idx)| {
                buffers
                    .get(name)
                    .map(|buffer| buffer.fits(&row[*idx]))
                    .unwrap_or(false)
            });
            if !fits {
                break;
            }
            for (name, idx) in &self.columns {
                if let Some(buffer) = buffers.get_mut(name) {
                    buffer.push(&row[*idx]);
                }
            }
            self.cursor += 1;
        }

        let status = if self.cursor == self.rows.len() {
            QueryStatus::Complete
        } else {
            QueryStatus::Incomplete
        };
        Ok(ReadStep {
            status,
            sizes: buffers.result_sizes(),
        })
    }
}
