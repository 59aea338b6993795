use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use genostore::genomics::{ContigOrder, RecordSource, VcfRecordSource};
use genostore::logging::{init_logging, LogConfig};
use genostore::merge::{MergeStream, MergedRecord};
use genostore::query::{AttributeBuffer, DatasetVersion, Paginator, ReadBuffers, ReadConfig};
use genostore::stats::StatsWriters;
use genostore::store::{uri_join, MemoryStore, OpenMode, StorageEngine};
use genostore::{
    ingest_sources, AlleleCounter, ChecksumKind, IngestConfig, IngestError, RecordSink, VariantQc,
    DEFAULT_ANCHOR_GAP, DEFAULT_STATS_FLUSH_THRESHOLD,
};

const DATASET_ROOT: &str = "mem://genostore";

#[derive(Parser, Debug)]
#[command(name = "genostore", about = "Merge per-sample VCF files and compute variant statistics")]
struct Cli {
    /// Log level (fatal, error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "fatal")]
    log_level: String,
    /// Also append log output to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Spacing of anchor records for long variants (0 disables anchors).
    #[arg(long, global = true, default_value_t = DEFAULT_ANCHOR_GAP)]
    anchor_gap: u32,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the merged record order (anchors included) as TSV.
    Merge {
        /// Single-sample VCF/BCF files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Ingest into an in-memory dataset and print the statistics arrays.
    Stats {
        /// Single-sample VCF/BCF files.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Pending entries per aggregator that trigger a flush.
        #[arg(long, default_value_t = DEFAULT_STATS_FLUSH_THRESHOLD)]
        flush_threshold: usize,
        /// Skip the allele-count array.
        #[arg(long)]
        no_allele_count: bool,
        /// Skip the variant-QC array.
        #[arg(long)]
        no_variant_qc: bool,
        /// Checksum filter for the statistics arrays.
        #[arg(long, value_enum)]
        checksum: Option<ChecksumArg>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ChecksumArg {
    Md5,
    Sha256,
}

impl From<ChecksumArg> for ChecksumKind {
    fn from(arg: ChecksumArg) -> Self {
        match arg {
            ChecksumArg::Md5 => ChecksumKind::Md5,
            ChecksumArg::Sha256 => ChecksumKind::Sha256,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::new(&cli.log_level);
    if let Some(path) = &cli.log_file {
        log_config = log_config.with_log_file(path);
    }
    init_logging(&log_config).context("failed to initialize logging")?;

    match cli.command {
        Commands::Merge { inputs } => run_merge(&inputs, cli.anchor_gap)?,
        Commands::Stats {
            inputs,
            flush_threshold,
            no_allele_count,
            no_variant_qc,
            checksum,
        } => {
            let config = IngestConfig::default()
                .with_anchor_gap(cli.anchor_gap)
                .with_stats_flush_threshold(flush_threshold)
                .with_allele_count(!no_allele_count)
                .with_variant_qc(!no_variant_qc)
                .with_checksum(checksum.map(Into::into));
            run_stats(&inputs, &config)?
        }
    }

    Ok(())
}

fn open_sources(inputs: &[PathBuf]) -> Result<Vec<VcfRecordSource>> {
    inputs
        .iter()
        .enumerate()
        .map(|(idx, path)| {
            VcfRecordSource::from_path(path, idx as u32)
                .with_context(|| format!("failed to open {}", path.display()))
        })
        .collect()
}

fn contig_names(sources: &[VcfRecordSource]) -> Vec<String> {
    let mut order = ContigOrder::default();
    for source in sources {
        for name in source.contigs().iter() {
            order.push(name);
        }
    }
    order.iter().map(str::to_string).collect()
}

fn run_merge(inputs: &[PathBuf], anchor_gap: u32) -> Result<()> {
    let sources = open_sources(inputs)?;
    let contigs = Arc::new(ContigOrder::new(contig_names(&sources)));
    let names: HashMap<u32, String> = sources
        .iter()
        .map(|s| (s.sample_id(), s.sample_name().to_string()))
        .collect();

    let stream = MergeStream::new(sources, contigs, anchor_gap).context("failed to start merge")?;
    println!("type\tcontig\tpos\tstart\tend\tsample\tend_node");
    for item in stream {
        let item = item.context("merge failed")?;
        let sample = names.get(&item.sample_id).map(String::as_str).unwrap_or("?");
        println!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            item.node_type,
            item.record.contig,
            item.sort_key + 1,
            item.record.start + 1,
            item.record.end + 1,
            sample,
            item.end_node
        );
    }
    Ok(())
}

/// Main-array writes are out of scope for the CLI; the sink only drops items.
struct DiscardSink;

impl RecordSink for DiscardSink {
    fn write(&mut self, _item: &MergedRecord) -> Result<(), IngestError> {
        Ok(())
    }
}

fn run_stats(inputs: &[PathBuf], config: &IngestConfig) -> Result<()> {
    config.validate()?;
    let sources = open_sources(inputs)?;
    // String dimensions order contigs lexically.
    let contigs = Arc::new(ContigOrder::lexicographic(contig_names(&sources)));

    let store = MemoryStore::new();
    StatsWriters::create_arrays(&store, DATASET_ROOT, config)
        .context("failed to create statistics arrays")?;
    let writers = StatsWriters::open(&store, DATASET_ROOT, config)
        .context("failed to open statistics arrays")?;
    let mut aggregators = writers.aggregators(config.stats_flush_threshold);

    let summary = ingest_sources(sources, contigs, config, &mut DiscardSink, &mut aggregators)
        .context("ingestion failed")?;
    writers.close().context("failed to close statistics arrays")?;
    eprintln!(
        "ingested {} records ({} anchors) from {} samples",
        summary.records, summary.anchors, summary.samples
    );

    if config.allele_count {
        print_array(&store, AlleleCounter::ARRAY)?;
    }
    if config.variant_qc {
        print_array(&store, VariantQc::ARRAY)?;
    }
    Ok(())
}

fn format_cell(buffer: &AttributeBuffer, cell: usize) -> String {
    if buffer.shape().var_len {
        buffer
            .var_value(cell)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default()
    } else {
        buffer
            .int_value(cell)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }
}

fn print_array(store: &MemoryStore, name: &str) -> Result<()> {
    let uri = uri_join(DATASET_ROOT, name);
    let mut array = store
        .open_array(&uri, OpenMode::Read)
        .with_context(|| format!("failed to open {uri}"))?;
    let fields: Vec<String> = array.schema().field_names().map(str::to_string).collect();
    let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();

    let read_config = ReadConfig::default().with_memory_budget(1 << 20);
    read_config.validate()?;
    let buffers = ReadBuffers::with_budget(array.schema(), &field_refs, read_config.memory_budget)?;
    let query = array.read_query(&field_refs)?;
    let mut paginator = Paginator::new(query, buffers, DatasetVersion::V4, Vec::new(), read_config);

    println!("# {name}");
    println!("{}", fields.join("\t"));
    paginator.for_each_page(|buffers, _tracker| {
        for cell in 0..buffers.cells() {
            let row: Vec<String> = buffers.iter().map(|b| format_cell(b, cell)).collect();
            println!("{}", row.join("\t"));
        }
        Ok(())
    })?;
    array.close()?;
    Ok(())
}
