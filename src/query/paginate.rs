use tracing::{debug, warn};

use super::{DatasetVersion, ReadBuffers, ReadError, ResultBufferTracker};
use crate::store::{QueryStatus, ReadQuery};

/// Largest factor buffers may grow by in one step.
pub const MAX_GROWTH_FACTOR: usize = 16;

/// Buffer sizing for paginated reads.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReadConfig {
    /// Initial memory budget split across all attribute buffers, in bytes.
    pub memory_budget: usize,
    /// Factor buffers grow by when a step returns no cells.
    pub growth_factor: usize,
    /// Hard per-attribute data buffer limit, in bytes.
    pub buffer_limit: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            memory_budget: 64 * 1024 * 1024,
            growth_factor: 2,
            buffer_limit: 1024 * 1024 * 1024,
        }
    }
}

impl ReadConfig {
    /// Set the initial memory budget.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Set the growth factor.
    pub fn with_growth_factor(mut self, factor: usize) -> Self {
        self.growth_factor = factor;
        self
    }

    /// Set the per-attribute limit.
    pub fn with_buffer_limit(mut self, bytes: usize) -> Self {
        self.buffer_limit = bytes;
        self
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<(), ReadError> {
        if !(2..=MAX_GROWTH_FACTOR).contains(&self.growth_factor) {
            return Err(ReadError::InvalidConfiguration(format!(
                "growth factor must be between 2 and {MAX_GROWTH_FACTOR}, got {}",
                self.growth_factor
            )));
        }
        if self.memory_budget == 0 || self.memory_budget > self.buffer_limit {
            return Err(ReadError::InvalidConfiguration(format!(
                "memory budget {} must be non-zero and within the buffer limit {}",
                self.memory_budget, self.buffer_limit
            )));
        }
        Ok(())
    }
}

/// Drives a read query step by step.
///
/// Each successful [`next_page`](Paginator::next_page) leaves one page of
/// results in [`buffers`](Paginator::buffers) with its sizes recorded in the
/// [`tracker`](Paginator::tracker).
pub struct Paginator {
    query: Box<dyn ReadQuery>,
    buffers: ReadBuffers,
    tracker: ResultBufferTracker,
    version: DatasetVersion,
    extra_attrs: Vec<String>,
    config: ReadConfig,
    done: bool,
}

impl std::fmt::Debug for Paginator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Paginator")
            .field("buffers", &self.buffers.len())
            .field("version", &self.version)
            .field("done", &self.done)
            .finish()
    }
}

impl Paginator {
    /// Wrap a query and its buffers.
    pub fn new(
        query: Box<dyn ReadQuery>,
        buffers: ReadBuffers,
        version: DatasetVersion,
        extra_attrs: Vec<String>,
        config: ReadConfig,
    ) -> Self {
        Self {
            query,
            buffers,
            tracker: ResultBufferTracker::new(),
            version,
            extra_attrs,
            config,
            done: false,
        }
    }

    /// Results of the latest page.
    pub fn buffers(&self) -> &ReadBuffers {
        &self.buffers
    }

    /// Sizes of the latest page.
    pub fn tracker(&self) -> &ResultBufferTracker {
        &self.tracker
    }

    /// Whether the query has completed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Fetch the next non-empty page; `false` once the query is complete.
    pub fn next_page(&mut self) -> Result<bool, ReadError> {
        while !self.done {
            self.buffers.clear_results();
            let step = self.query.submit(&mut self.buffers)?;
            self.tracker.update(self.version, &self.extra_attrs, &step);
            let cells = self.buffers.cells();

            match step.status {
                QueryStatus::Complete => {
                    self.done = true;
                    return Ok(cells > 0);
                }
                QueryStatus::Incomplete if cells == 0 => {
                    debug!(
                        reserved = self.buffers.reserved_bytes(),
                        "Incomplete step returned no cells, growing buffers"
                    );
                    self.buffers
                        .grow_all(self.config.growth_factor, self.config.buffer_limit)?;
                }
                QueryStatus::Incomplete => return Ok(true),
                QueryStatus::Failed | QueryStatus::Uninitialized => {
                    warn!(status = %step.status, "Read query did not complete");
                    self.done = true;
                    return Err(ReadError::QueryFailed {
                        attribute_sizes: step.sizes,
                    });
                }
            }
        }
        Ok(false)
    }

    /// Hand every page to `consume`, returning the number of pages read.
    pub fn for_each_page<F>(&mut self, mut consume: F) -> Result<usize, ReadError>
    where
        F: FnMut(&ReadBuffers, &ResultBufferTracker) -> Result<(), ReadError>,
    {
        let mut pages = 0;
        while self.next_page()? {
            consume(&self.buffers, &self.tracker)?;
            pages += 1;
        }
        Ok(pages)
    }
}
