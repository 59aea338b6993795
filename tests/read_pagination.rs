use genostore::query::{
    AttributeBuffer, BufferShape, DatasetVersion, Paginator, ReadBuffers, ReadConfig, ReadError,
    ALLELES, CONTIG, ID, SAMPLE, START_POS,
};
use genostore::store::{
    ArraySchema, Attribute, ColumnRef, Datatype, Dimension, Layout, MemoryStore, OpenMode,
    QueryStatus, StorageEngine, WriteBatch,
};

const MAIN_URI: &str = "mem://cohort/data";

fn var_column<S: AsRef<str>>(values: &[S]) -> (Vec<u8>, Vec<u64>) {
    let mut data = Vec::new();
    let mut offsets = Vec::with_capacity(values.len());
    for value in values {
        offsets.push(data.len() as u64);
        data.extend_from_slice(value.as_ref().as_bytes());
    }
    (data, offsets)
}

fn v4_schema() -> ArraySchema {
    ArraySchema::sparse()
        .with_dimension(Dimension::new(CONTIG, Datatype::StringAscii))
        .with_dimension(Dimension::new(START_POS, Datatype::UInt32))
        .with_dimension(Dimension::new(SAMPLE, Datatype::StringAscii))
        .with_attribute(Attribute::new(ALLELES, Datatype::StringAscii))
        .with_attribute(Attribute::new(ID, Datatype::StringAscii))
        .with_attribute(Attribute::new("dp", Datatype::Int32))
}

/// Main array with one cell per position `0..cells` on contig `c1`.
fn write_main_array(store: &MemoryStore, cells: u32) {
    store.create_array(MAIN_URI, v4_schema()).unwrap();
    let positions: Vec<u32> = (0..cells).collect();
    let samples: Vec<String> = positions.iter().map(|p| format!("s{}", p % 3)).collect();
    let ids: Vec<String> = positions.iter().map(|p| format!("rs{p}")).collect();
    let depths: Vec<i32> = positions.iter().map(|&p| p as i32 * 2).collect();
    let (contig_data, contig_offsets) = var_column(&vec!["c1"; cells as usize]);
    let (sample_data, sample_offsets) = var_column(&samples);
    let (allele_data, allele_offsets) = var_column(&vec!["A,T"; cells as usize]);
    let (id_data, id_offsets) = var_column(&ids);

    let batch = WriteBatch::new()
        .with(CONTIG, ColumnRef::Var { data: &contig_data, offsets: &contig_offsets })
        .with(START_POS, ColumnRef::UInt32(&positions))
        .with(SAMPLE, ColumnRef::Var { data: &sample_data, offsets: &sample_offsets })
        .with(ALLELES, ColumnRef::Var { data: &allele_data, offsets: &allele_offsets })
        .with(ID, ColumnRef::Var { data: &id_data, offsets: &id_offsets })
        .with("dp", ColumnRef::Int32(&depths));

    let mut array = store.open_array(MAIN_URI, OpenMode::Write).unwrap();
    let mut query = array.write_query(Layout::GlobalOrder).unwrap();
    for (name, column) in batch.columns() {
        query.set_buffer(name, *column).unwrap();
    }
    assert_eq!(query.submit().unwrap(), QueryStatus::Complete);
    query.finalize().unwrap();
    array.close().unwrap();
}

const FIELDS: [&str; 6] = [CONTIG, START_POS, SAMPLE, ALLELES, ID, "dp"];

#[test]
fn small_budget_reads_every_cell_across_pages() {
    let store = MemoryStore::new();
    write_main_array(&store, 30);

    let reader = store.open_array(MAIN_URI, OpenMode::Read).unwrap();
    // 32 bytes per field: two cells per page for the string fields.
    let config = ReadConfig::default().with_memory_budget(6 * 32);
    config.validate().unwrap();
    let buffers = ReadBuffers::with_budget(reader.schema(), &FIELDS, config.memory_budget).unwrap();
    let query = reader.read_query(&FIELDS).unwrap();
    let mut paginator = Paginator::new(
        query,
        buffers,
        DatasetVersion::V4,
        vec!["dp".to_string()],
        config,
    );

    let mut positions = Vec::new();
    let mut ids = Vec::new();
    let mut tracked_cells = 0;
    let pages = paginator
        .for_each_page(|buffers, tracker| {
            let cells = buffers.cells();
            assert_eq!(tracker.cell_count(), cells as u64);
            assert_eq!(tracker.start_pos_size().elements, cells as u64);
            assert_eq!(tracker.id_size().offsets, cells as u64);
            assert_eq!(tracker.contig_size().offsets, cells as u64);
            assert_eq!(
                tracker.extra_attrs_size().get("dp").map(|s| s.elements),
                Some(cells as u64)
            );
            tracked_cells += tracker.cell_count();

            let start = buffers.get(START_POS).expect("start_pos buffer");
            let id = buffers.get(ID).expect("id buffer");
            for cell in 0..cells {
                positions.extend(start.int_value(cell));
                ids.extend(id.var_value(cell).map(|v| String::from_utf8_lossy(v).into_owned()));
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(pages, 15);
    assert_eq!(tracked_cells, 30);
    assert_eq!(positions, (0..30).collect::<Vec<i64>>());
    assert_eq!(ids.first().map(String::as_str), Some("rs0"));
    assert_eq!(ids.last().map(String::as_str), Some("rs29"));
    assert!(paginator.is_done());
    assert!(!paginator.next_page().unwrap());
}

#[test]
fn pre_v4_tracker_counts_sample_elements() {
    let store = MemoryStore::new();
    let schema = ArraySchema::sparse()
        .with_dimension(Dimension::new(START_POS, Datatype::UInt32))
        .with_attribute(Attribute::new(SAMPLE, Datatype::UInt32));
    store.create_array("mem://v3/data", schema).unwrap();
    {
        let mut array = store.open_array("mem://v3/data", OpenMode::Write).unwrap();
        let mut query = array.write_query(Layout::Unordered).unwrap();
        query.set_buffer(START_POS, ColumnRef::UInt32(&[10, 20, 30])).unwrap();
        query.set_buffer(SAMPLE, ColumnRef::UInt32(&[0, 1, 2])).unwrap();
        query.submit().unwrap();
        query.finalize().unwrap();
    }

    let reader = store.open_array("mem://v3/data", OpenMode::Read).unwrap();
    let buffers = ReadBuffers::with_budget(reader.schema(), &[START_POS, SAMPLE], 1024).unwrap();
    let query = reader.read_query(&[START_POS, SAMPLE]).unwrap();
    let mut paginator = Paginator::new(query, buffers, DatasetVersion::V3, Vec::new(), ReadConfig::default());

    assert!(paginator.next_page().unwrap());
    let tracker = paginator.tracker();
    assert_eq!(tracker.status(), QueryStatus::Complete);
    assert_eq!(tracker.cell_count(), 3);
    assert_eq!(tracker.sample_size().elements, 0);
    assert_eq!(tracker.attribute_size(START_POS).map(|s| s.elements), Some(3));
    assert_eq!(paginator.buffers().get(SAMPLE).and_then(|b| b.int_value(2)), Some(2));
    assert!(!paginator.next_page().unwrap());
}

fn single_long_sample_paginator(limit: usize) -> Paginator {
    let store = MemoryStore::new();
    let schema = ArraySchema::sparse()
        .with_dimension(Dimension::new(SAMPLE, Datatype::StringAscii))
        .with_attribute(Attribute::new("dp", Datatype::Int32));
    store.create_array("mem://long/data", schema).unwrap();
    {
        let mut array = store.open_array("mem://long/data", OpenMode::Write).unwrap();
        let mut query = array.write_query(Layout::Unordered).unwrap();
        let (data, offsets) = var_column(&["a_sample_name_of_23_chr"]);
        query.set_buffer(SAMPLE, ColumnRef::Var { data: &data, offsets: &offsets }).unwrap();
        query.set_buffer("dp", ColumnRef::Int32(&[7])).unwrap();
        query.submit().unwrap();
    }

    let reader = store.open_array("mem://long/data", OpenMode::Read).unwrap();
    let mut buffers = ReadBuffers::new();
    buffers.add(AttributeBuffer::new(SAMPLE, Datatype::StringAscii, BufferShape::var(), 4, 1));
    buffers.add(AttributeBuffer::new("dp", Datatype::Int32, BufferShape::fixed(), 4, 1));
    let query = reader.read_query(&[SAMPLE, "dp"]).unwrap();
    let config = ReadConfig::default()
        .with_memory_budget(8)
        .with_buffer_limit(limit);
    Paginator::new(query, buffers, DatasetVersion::V4, Vec::new(), config)
}

#[test]
fn undersized_buffers_grow_until_a_cell_fits() {
    let mut paginator = single_long_sample_paginator(64);
    assert!(paginator.next_page().unwrap());
    let sample = paginator.buffers().get(SAMPLE).unwrap();
    assert_eq!(sample.var_value(0), Some(&b"a_sample_name_of_23_chr"[..]));
    assert_eq!(sample.data_capacity(), 32);
    assert_eq!(paginator.tracker().cell_count(), 1);
    assert_eq!(paginator.tracker().sample_size().elements, 23);
    assert!(paginator.is_done());
}

#[test]
fn growth_past_the_limit_fails() {
    let mut paginator = single_long_sample_paginator(16);
    match paginator.next_page().unwrap_err() {
        ReadError::BufferLimit {
            attribute,
            requested,
            limit,
        } => {
            assert_eq!(attribute, SAMPLE);
            assert_eq!((requested, limit), (32, 16));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn unknown_attribute_is_rejected() {
    let err = ReadBuffers::with_budget(&v4_schema(), &[CONTIG, "gq"], 1024).unwrap_err();
    assert!(matches!(err, ReadError::UnknownAttribute(name) if name == "gq"));
    let err = ReadBuffers::with_budget(&v4_schema(), &FIELDS, 12).unwrap_err();
    assert!(matches!(err, ReadError::InvalidConfiguration(_)));
}
