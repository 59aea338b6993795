#![allow(dead_code)]

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use genostore::genomics::{GenotypeCall, VariantRecord};
use genostore::merge::MergedRecord;

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_snapshot(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("GENOSTORE_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected =
        fs::read_to_string(&path).unwrap_or_else(|_| panic!("snapshot {:?} not found", path));
    if normalize(&expected) != normalize(actual) {
        panic!(
            "Snapshot mismatch for {:?}. Set GENOSTORE_UPDATE_SNAPSHOTS=1 to regenerate.\nExpected:\n{}\nActual:\n{}",
            path,
            expected,
            actual
        );
    }
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Diploid genotype of two allele indices.
pub fn gt(a: u32, b: u32) -> Vec<GenotypeCall> {
    vec![GenotypeCall::called(a, false), GenotypeCall::called(b, false)]
}

/// Single-base record with REF `A` and the given ALT.
pub fn snv(contig: &str, pos: u32, alt: &str, genotype: Vec<GenotypeCall>) -> VariantRecord {
    VariantRecord::new(contig, pos, pos, ["A", alt], genotype)
}

/// Reference block spanning `start..=end`.
pub fn ref_block(contig: &str, start: u32, end: u32) -> VariantRecord {
    VariantRecord::new(contig, start, end, ["N", "<NON_REF>"], gt(0, 0))
}

/// One line per merged item: type, contig, sort key, start, end, sample, end flag.
pub fn render_merged(items: &[MergedRecord]) -> String {
    let mut out = String::from("type\tcontig\tpos\tstart\tend\tsample\tend_node\n");
    for item in items {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            item.node_type,
            item.record.contig,
            item.sort_key,
            item.record.start,
            item.record.end,
            item.sample_id,
            item.end_node
        )
        .expect("write to string");
    }
    out
}
