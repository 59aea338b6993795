use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::store::{
    uri_join, ArrayHandle, Layout, OpenMode, QueryStatus, StorageEngine, StoreError, WriteBatch,
    WriteQuery,
};

struct WriterState {
    array: Option<Box<dyn ArrayHandle>>,
    query: Option<Box<dyn WriteQuery>>,
}

/// Write handle for one statistics array, shared by every aggregator of an
/// ingestion run.
///
/// The lock covers attaching buffers, submitting and detaching them, so two
/// aggregators never interleave partial buffer sets.
pub struct SharedArrayWriter {
    name: String,
    uri: String,
    layout: Layout,
    enabled: bool,
    users: AtomicUsize,
    state: Mutex<WriterState>,
}

impl fmt::Debug for SharedArrayWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedArrayWriter")
            .field("name", &self.name)
            .field("uri", &self.uri)
            .field("layout", &self.layout)
            .field("enabled", &self.enabled)
            .field("users", &self.users.load(Ordering::Relaxed))
            .field("open", &self.is_open())
            .finish()
    }
}

impl SharedArrayWriter {
    /// Open `name` under `root` for writing and create its write query.
    ///
    /// Returns a disabled writer when the dataset has no such array.
    pub fn open(
        engine: &dyn StorageEngine,
        root: &str,
        name: &str,
        layout: Layout,
    ) -> Result<Arc<Self>, StoreError> {
        let uri = uri_join(root, name);
        if !engine.array_exists(&uri) {
            info!(array = name, %uri, "Array not found in dataset, statistics disabled");
            return Ok(Arc::new(Self::disabled(name, uri)));
        }
        let mut array = engine.open_array(&uri, OpenMode::Write)?;
        let query = array.write_query(layout)?;
        debug!(array = name, %uri, ?layout, "Opened statistics array");
        Ok(Arc::new(Self {
            name: name.to_string(),
            uri,
            layout,
            enabled: true,
            users: AtomicUsize::new(0),
            state: Mutex::new(WriterState {
                array: Some(array),
                query: Some(query),
            }),
        }))
    }

    /// Writer that accepts no data.
    pub fn disabled(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            layout: Layout::Unordered,
            enabled: false,
            users: AtomicUsize::new(0),
            state: Mutex::new(WriterState {
                array: None,
                query: None,
            }),
        }
    }

    /// Array name within the dataset.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full array URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Layout of the shared write query.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Whether the array exists and statistics are collected for it.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the array handle is still open.
    pub fn is_open(&self) -> bool {
        self.lock().array.as_ref().is_some_and(|a| a.is_open())
    }

    /// Number of aggregators currently attached.
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an aggregator.
    pub fn attach(&self) {
        self.users.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregister an aggregator; the last one out closes the writer.
    pub fn release(&self) -> Result<(), StoreError> {
        let previous = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.close(),
            Ok(_) => Ok(()),
            Err(_) => Err(StoreError::state(&self.uri, "writer released more often than attached")),
        }
    }

    /// Attach every column of `batch`, submit and detach, holding the lock throughout.
    pub fn submit(&self, batch: &WriteBatch<'_>) -> Result<QueryStatus, StoreError> {
        let mut state = self.lock();
        let query = state
            .query
            .as_mut()
            .ok_or_else(|| StoreError::state(&self.uri, "write query is closed"))?;

        let result = batch
            .columns()
            .iter()
            .try_for_each(|(name, column)| query.set_buffer(name, *column))
            .and_then(|()| query.submit());
        query.reset_buffers();
        result
    }

    /// Finalize the query and close the array. Later calls do nothing.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut state = self.lock();
        if let Some(mut query) = state.query.take() {
            query.finalize()?;
        }
        if let Some(mut array) = state.array.take() {
            debug!(array = %self.name, uri = %self.uri, "Closing statistics array");
            array.close()?;
        }
        Ok(())
    }
}
