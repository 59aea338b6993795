use std::sync::Arc;

use tracing::{debug, info};

use super::{AlleleCounter, IngestionTask, SharedArrayWriter, StatsError, VariantQc};
use crate::genomics::VariantRecord;
use crate::store::{uri_join, StorageEngine, StoreError};
use crate::IngestConfig;

/// Shared writers of the statistics arrays for one ingestion run.
#[derive(Debug, Clone, Default)]
pub struct StatsWriters {
    allele_count: Option<Arc<SharedArrayWriter>>,
    variant_qc: Option<Arc<SharedArrayWriter>>,
}

impl StatsWriters {
    /// Create the statistics arrays enabled in `config` under `root`.
    ///
    /// Arrays that already exist are left untouched.
    pub fn create_arrays(
        engine: &dyn StorageEngine,
        root: &str,
        config: &IngestConfig,
    ) -> Result<(), StoreError> {
        if config.allele_count && !engine.array_exists(&uri_join(root, AlleleCounter::ARRAY)) {
            AlleleCounter::create(engine, root, config.checksum)?;
        }
        if config.variant_qc && !engine.array_exists(&uri_join(root, VariantQc::ARRAY)) {
            VariantQc::create(engine, root, config.checksum)?;
        }
        Ok(())
    }

    /// Open the statistics arrays enabled in `config` for writing.
    pub fn open(
        engine: &dyn StorageEngine,
        root: &str,
        config: &IngestConfig,
    ) -> Result<Self, StoreError> {
        let allele_count = if config.allele_count {
            Some(AlleleCounter::init(engine, root)?)
        } else {
            None
        };
        let variant_qc = if config.variant_qc {
            Some(VariantQc::init(engine, root)?)
        } else {
            None
        };
        info!(
            allele_count = allele_count.as_ref().is_some_and(|w| w.is_enabled()),
            variant_qc = variant_qc.as_ref().is_some_and(|w| w.is_enabled()),
            "Statistics arrays opened"
        );
        Ok(Self {
            allele_count,
            variant_qc,
        })
    }

    /// Writer of the allele-count array, if enabled.
    pub fn allele_count(&self) -> Option<&Arc<SharedArrayWriter>> {
        self.allele_count.as_ref()
    }

    /// Writer of the variant-QC array, if enabled.
    pub fn variant_qc(&self) -> Option<&Arc<SharedArrayWriter>> {
        self.variant_qc.as_ref()
    }

    /// New aggregator set for one ingestion worker.
    pub fn aggregators(&self, flush_threshold: usize) -> StatsAggregators {
        let mut aggregators = StatsAggregators::new(flush_threshold);
        if let Some(writer) = &self.allele_count {
            aggregators.push(Box::new(AlleleCounter::new(Arc::clone(writer))));
        }
        if let Some(writer) = &self.variant_qc {
            aggregators.push(Box::new(VariantQc::new(Arc::clone(writer))));
        }
        aggregators
    }

    /// Close every writer. Safe to call more than once.
    pub fn close(&self) -> Result<(), StoreError> {
        for writer in self.allele_count.iter().chain(self.variant_qc.iter()) {
            writer.close()?;
        }
        Ok(())
    }
}

/// Aggregators owned by one ingestion worker.
///
/// Fans every record out to each aggregator and submits an aggregator's
/// completed loci once its pending buffers reach the threshold. A locus is
/// only complete once a record at a later locus arrives, so a threshold
/// flush never splits the cells of one locus.
pub struct StatsAggregators {
    tasks: Vec<Box<dyn IngestionTask>>,
    flush_threshold: usize,
}

impl std::fmt::Debug for StatsAggregators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsAggregators")
            .field("tasks", &self.tasks.len())
            .field("flush_threshold", &self.flush_threshold)
            .finish()
    }
}

impl StatsAggregators {
    /// Empty set.
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            tasks: Vec::new(),
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Add an aggregator.
    pub fn push(&mut self, task: Box<dyn IngestionTask>) {
        self.tasks.push(task);
    }

    /// Number of aggregators.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the set holds no aggregators.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Entries pending across all aggregators.
    pub fn pending_entries(&self) -> usize {
        self.tasks.iter().map(|t| t.pending_entries()).sum()
    }

    /// Hand a record to every aggregator at its start locus.
    pub fn process(&mut self, sample_name: &str, record: &VariantRecord) -> Result<(), StatsError> {
        for task in &mut self.tasks {
            task.process(sample_name, &record.contig, record.start, record)?;
            if task.pending_entries() >= self.flush_threshold {
                debug!(pending = task.pending_entries(), "Flush threshold reached");
                task.flush_completed()?;
            }
        }
        Ok(())
    }

    /// Flush every aggregator, including the locus each one is on.
    ///
    /// Records arriving afterwards must start at a later locus.
    pub fn flush(&mut self) -> Result<(), StatsError> {
        self.tasks.iter_mut().try_for_each(|task| task.flush())
    }

    /// Finalize every aggregator, reporting the first failure.
    pub fn finalize(&mut self) -> Result<(), StatsError> {
        let mut first_error = None;
        for task in &mut self.tasks {
            if let Err(e) = task.finalize() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
