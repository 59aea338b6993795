#[path = "common/mod.rs"]
mod common;
use common::gt;

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use genostore::genomics::{ContigOrder, VariantRecord, VecRecordSource};
use genostore::merge::MergedRecord;
use genostore::stats::StatsWriters;
use genostore::store::{CellValue, MemoryStore, QueryStatus, StorageEngine, StoreError};
use genostore::{ingest_sources, AlleleCounter, IngestConfig, IngestionTask, StatsError, VariantQc};

const ROOT: &str = "mem://cohort";
const ALLELE_COUNT_URI: &str = "mem://cohort/allele_count";
const VARIANT_QC_URI: &str = "mem://cohort/variant_qc";

fn site(contig: &str, pos: u32, alt: &str, a: u32, b: u32) -> VariantRecord {
    VariantRecord::new(contig, pos, pos, ["N", alt], gt(a, b))
}

fn setup(store: &MemoryStore, config: &IngestConfig) -> StatsWriters {
    StatsWriters::create_arrays(store, ROOT, config).expect("create arrays");
    StatsWriters::open(store, ROOT, config).expect("open arrays")
}

fn allele_counts(store: &MemoryStore) -> Vec<(String, i64)> {
    store
        .cells(ALLELE_COUNT_URI)
        .expect("allele_count exists")
        .into_iter()
        .map(|row| {
            let allele = row[0].as_str().expect("string dimension").to_string();
            (allele, row[1].as_int().expect("int count"))
        })
        .collect()
}

#[test]
fn ingestion_counts_alleles_per_locus() {
    let store = MemoryStore::new();
    let config = IngestConfig::default().with_stats_flush_threshold(100);
    let writers = setup(&store, &config);
    let mut aggregators = writers.aggregators(config.stats_flush_threshold);

    let sources = vec![
        VecRecordSource::new("s1", 0, [site("c1", 100, "A", 0, 1)]),
        VecRecordSource::new(
            "s2",
            1,
            [
                site("c1", 100, "A", 0, 1),
                site("c1", 150, "T", 1, 1),
                site("c2", 10, "G", 0, 1),
            ],
        ),
    ];
    let contigs = Arc::new(ContigOrder::lexicographic(["c2", "c1"]));
    let mut sink: Vec<MergedRecord> = Vec::new();
    let summary = ingest_sources(sources, contigs, &config, &mut sink, &mut aggregators)
        .expect("ingestion succeeds");
    assert_eq!(summary.records, 4);
    writers.close().expect("close");

    assert_eq!(
        allele_counts(&store),
        vec![
            ("c1:100:A".to_string(), 2),
            ("c1:150:T".to_string(), 2),
            ("c2:10:G".to_string(), 1),
        ]
    );
    // Everything fit below the threshold, so finalize made the only submit.
    assert_eq!(store.submit_count(ALLELE_COUNT_URI).unwrap(), 1);

    let qc: Vec<Vec<CellValue>> = store.cells(VARIANT_QC_URI).unwrap();
    let row = |contig: &str, pos: i64, allele: &str, counts: [i64; 4]| {
        let mut row = vec![CellValue::from(contig), CellValue::Int(pos), CellValue::from(allele)];
        row.extend(counts.map(CellValue::Int));
        row
    };
    assert_eq!(
        qc,
        vec![
            row("c1", 100, "A", [2, 0, 2, 2]),
            row("c1", 150, "T", [2, 2, 2, 2]),
            row("c2", 10, "G", [1, 0, 1, 1]),
        ]
    );
}

#[test]
fn threshold_flush_keeps_each_locus_in_one_cell() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default());
    let mut aggregators = writers.aggregators(1);

    // Sorted by locus; the second sample at c1:10 brings a smaller allele.
    let records = [
        ("s1", site("c1", 5, "G", 0, 1)),
        ("s1", site("c1", 10, "T", 0, 1)),
        ("s2", site("c1", 10, "A", 1, 1)),
        ("s3", site("c1", 10, "T", 0, 1)),
        ("s1", site("c1", 20, "G", 0, 1)),
    ];
    for (sample, record) in &records {
        aggregators.process(sample, record).unwrap();
    }
    aggregators.finalize().unwrap();
    writers.close().unwrap();

    let qc = store.cells(VARIANT_QC_URI).unwrap();
    let summary: Vec<(i64, &str, Vec<i64>)> = qc
        .iter()
        .map(|row| {
            let counts = row[3..].iter().filter_map(CellValue::as_int).collect();
            (row[1].as_int().unwrap(), row[2].as_str().unwrap(), counts)
        })
        .collect();
    assert_eq!(
        summary,
        vec![
            (5, "G", vec![1, 0, 1, 1]),
            (10, "A", vec![2, 2, 2, 2]),
            (10, "T", vec![2, 0, 2, 2]),
            (20, "G", vec![1, 0, 1, 1]),
        ]
    );
    assert_eq!(store.submit_count(VARIANT_QC_URI).unwrap(), 3);
    assert_eq!(
        allele_counts(&store),
        vec![
            ("c1:10:A".to_string(), 2),
            ("c1:10:T".to_string(), 2),
            ("c1:20:G".to_string(), 1),
            ("c1:5:G".to_string(), 1),
        ]
    );
}

#[test]
fn empty_flushes_never_submit() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default());
    let mut aggregators = writers.aggregators(16);

    aggregators.flush().unwrap();
    aggregators.flush().unwrap();
    assert_eq!(store.submit_count(ALLELE_COUNT_URI).unwrap(), 0);
    assert_eq!(store.submit_count(VARIANT_QC_URI).unwrap(), 0);

    aggregators.process("s1", &site("c1", 5, "T", 0, 1)).unwrap();
    aggregators.flush().unwrap();
    aggregators.flush().unwrap();
    assert_eq!(store.submit_count(ALLELE_COUNT_URI).unwrap(), 1);
    assert_eq!(store.submit_count(VARIANT_QC_URI).unwrap(), 1);
}

#[test]
fn reference_only_records_produce_no_entries() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default());
    let mut aggregators = writers.aggregators(1);

    for pos in 0..5 {
        let block = VariantRecord::new("c1", pos * 10, pos * 10 + 9, ["N", "<NON_REF>"], gt(0, 0));
        aggregators.process("s1", &block).unwrap();
    }
    aggregators.finalize().unwrap();
    assert_eq!(store.submit_count(ALLELE_COUNT_URI).unwrap(), 0);
    assert!(store.cells(VARIANT_QC_URI).unwrap().is_empty());
}

#[test]
fn concurrent_flushes_do_not_interleave() {
    let store = MemoryStore::new().with_attach_delay(Duration::from_millis(1));
    let config = IngestConfig::default().with_variant_qc(false);
    let writers = setup(&store, &config);

    // Both workers attach before either can release the writer.
    let workers: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|contig| (contig, writers.aggregators(4)))
        .collect();

    thread::scope(|scope| {
        for (contig, mut aggregators) in workers {
            scope.spawn(move || {
                for pos in 0..40 {
                    aggregators
                        .process(&format!("sample_{contig}"), &site(contig, pos, "T", 0, 1))
                        .expect("process");
                }
                aggregators.finalize().expect("finalize");
            });
        }
    });
    assert_eq!(writers.allele_count().map(|w| w.users()), Some(0));
    assert_eq!(writers.allele_count().map(|w| w.is_open()), Some(false));

    let fragments = store.fragments(ALLELE_COUNT_URI).unwrap();
    assert!(fragments.len() >= 2);
    for fragment in &fragments {
        let owners: Vec<&str> = fragment
            .rows
            .iter()
            .map(|row| {
                assert_eq!(row.len(), 2);
                let allele = row[0].as_str().expect("allele string");
                &allele[..1]
            })
            .collect();
        assert!(
            owners.iter().all(|o| *o == owners[0]),
            "fragment mixes workers: {owners:?}"
        );
    }
    let total: usize = fragments.iter().map(|f| f.rows.len()).sum();
    assert_eq!(total, 80);
    assert!(allele_counts(&store).iter().all(|(_, count)| *count == 1));
}

#[test]
fn concurrent_global_order_submits_stay_sorted() {
    const BLOCKS: u32 = 8;
    const BLOCK_LEN: u32 = 10;

    let store = MemoryStore::new().with_attach_delay(Duration::from_millis(1));
    let config = IngestConfig::default().with_allele_count(false);
    let writers = setup(&store, &config);
    let turn = (Mutex::new(0u32), Condvar::new());

    let workers: Vec<_> = (0..2u32).map(|w| (w, writers.aggregators(1024))).collect();
    thread::scope(|scope| {
        for (worker, mut aggregators) in workers {
            let turn = &turn;
            scope.spawn(move || {
                // Worker `w` owns every other block of c1; blocks submit in locus order.
                for block in (worker..BLOCKS).step_by(2) {
                    for pos in block * BLOCK_LEN..(block + 1) * BLOCK_LEN {
                        let alt = if pos % 2 == 0 { "T" } else { "A" };
                        aggregators
                            .process(&format!("sample_{worker}"), &site("c1", pos, alt, 0, 1))
                            .expect("process");
                    }
                    let (next, ready) = turn;
                    let mut next = ready
                        .wait_while(next.lock().unwrap(), |n| *n != block)
                        .unwrap();
                    aggregators.flush().expect("submit in order");
                    *next += 1;
                    ready.notify_all();
                }
                aggregators.finalize().expect("finalize");
            });
        }
    });
    assert_eq!(writers.variant_qc().map(|w| w.is_open()), Some(false));

    let fragments = store.fragments(VARIANT_QC_URI).unwrap();
    assert_eq!(fragments.len(), 1);
    let positions: Vec<i64> = fragments[0]
        .rows
        .iter()
        .filter_map(|row| row[1].as_int())
        .collect();
    assert_eq!(positions, (0..i64::from(BLOCKS * BLOCK_LEN)).collect::<Vec<_>>());
    assert_eq!(store.submit_count(VARIANT_QC_URI).unwrap(), BLOCKS as usize);
}

#[test]
fn failed_submit_status_is_fatal() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default().with_allele_count(false));
    store
        .force_submit_status(VARIANT_QC_URI, Some(QueryStatus::Failed))
        .unwrap();
    let mut aggregators = writers.aggregators(64);
    aggregators.process("s4", &site("c2", 40, "C", 0, 1)).unwrap();

    match aggregators.finalize().unwrap_err() {
        StatsError::Submit { array, locus, sample, source } => {
            assert_eq!(array, VariantQc::ARRAY);
            assert_eq!((locus.as_str(), sample.as_str()), ("c2:40", "s4"));
            assert!(matches!(
                source,
                StoreError::SubmitFailure { status: QueryStatus::Failed, .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(store.submit_count(VARIANT_QC_URI).unwrap(), 0);
}

#[test]
fn finalize_twice_is_a_noop() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default());
    let mut aggregators = writers.aggregators(64);

    aggregators.process("s1", &site("c1", 7, "C", 1, 1)).unwrap();
    aggregators.finalize().unwrap();
    aggregators.finalize().unwrap();
    assert_eq!(store.submit_count(ALLELE_COUNT_URI).unwrap(), 1);
    assert_eq!(allele_counts(&store), vec![("c1:7:C".to_string(), 2)]);

    // Records after finalize are rejected and never reach the array.
    let err = aggregators.process("s1", &site("c1", 8, "C", 0, 1)).unwrap_err();
    assert!(matches!(
        err,
        StatsError::ArrayState { ref array, .. } if array == AlleleCounter::ARRAY
    ));
    aggregators.flush().unwrap();
    assert_eq!(store.submit_count(ALLELE_COUNT_URI).unwrap(), 1);

    assert!(writers.variant_qc().is_some_and(|w| !w.is_open()));
    writers.close().unwrap();
}

#[test]
fn dropping_aggregators_flushes_pending_entries() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default().with_variant_qc(false));
    let mut aggregators = writers.aggregators(64);
    aggregators.process("s1", &site("c3", 1, "G", 0, 1)).unwrap();
    drop(aggregators);

    assert_eq!(allele_counts(&store), vec![("c3:1:G".to_string(), 1)]);
    assert_eq!(writers.allele_count().map(|w| w.is_open()), Some(false));
}

#[test]
fn incomplete_submit_is_fatal() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default().with_variant_qc(false));
    store
        .force_submit_status(ALLELE_COUNT_URI, Some(QueryStatus::Incomplete))
        .unwrap();
    let mut aggregators = writers.aggregators(64);
    aggregators.process("s9", &site("c1", 100, "A", 0, 1)).unwrap();

    let err = aggregators.flush().unwrap_err();
    match &err {
        StatsError::Incomplete {
            array,
            locus,
            sample,
            status,
        } => {
            assert_eq!(array, AlleleCounter::ARRAY);
            assert_eq!(locus, "c1:100");
            assert_eq!(sample, "s9");
            assert_eq!(*status, QueryStatus::Incomplete);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("INCOMPLETE"));
    // Pending buffers are dropped, not retried.
    assert_eq!(aggregators.pending_entries(), 0);
    assert_eq!(store.submit_count(ALLELE_COUNT_URI).unwrap(), 0);
}

#[test]
fn out_of_order_loci_fail_global_order_submit() {
    let store = MemoryStore::new();
    let writers = setup(&store, &IngestConfig::default().with_allele_count(false));
    let mut aggregators = writers.aggregators(1);

    aggregators.process("s1", &site("c2", 10, "T", 0, 1)).unwrap();
    // Closing c2:10 submits it; c1:5 stays open until finalize drains it.
    aggregators.process("s1", &site("c1", 5, "T", 0, 1)).unwrap();
    assert_eq!(store.submit_count(VARIANT_QC_URI).unwrap(), 1);
    let err = aggregators.finalize().unwrap_err();
    match err {
        StatsError::Submit {
            array,
            locus,
            source,
            ..
        } => {
            assert_eq!(array, VariantQc::ARRAY);
            assert_eq!(locus, "c1:5");
            assert!(matches!(source, StoreError::OrderViolation { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn missing_array_disables_its_aggregator() {
    let store = MemoryStore::new();
    AlleleCounter::create(&store, ROOT, None).unwrap();
    let writers = StatsWriters::open(&store, ROOT, &IngestConfig::default()).unwrap();
    assert!(writers.variant_qc().is_some_and(|w| !w.is_enabled()));

    let mut aggregators = writers.aggregators(64);
    aggregators.process("s1", &site("c1", 3, "G", 0, 1)).unwrap();
    aggregators.finalize().unwrap();

    assert_eq!(allele_counts(&store), vec![("c1:3:G".to_string(), 1)]);
    assert!(!store.array_exists(VARIANT_QC_URI));
}
