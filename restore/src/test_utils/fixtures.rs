use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::catalog::{CatalogEntry, DumpId, Section};

/// Compresses `data` the way dump payloads are stored.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .expect("writing to a vector cannot fail");
    encoder.finish().expect("writing to a vector cannot fail")
}

/// A `TABLE DATA` entry backed by the object `<dump_id>.dat.gz`.
pub fn table_data_entry(
    dump_id: i32,
    namespace: &str,
    tag: &str,
    dependencies: &[i32],
) -> CatalogEntry {
    CatalogEntry {
        dump_id: DumpId(dump_id),
        section: Section::Data,
        desc: "TABLE DATA".to_string(),
        namespace: Some(namespace.to_string()),
        tag: Some(tag.to_string()),
        file_name: Some(format!("{dump_id}.dat.gz")),
        columns: None,
        definition: None,
        dependencies: dependencies.iter().copied().map(DumpId).collect(),
    }
}

/// An entry of `section` restored by executing `definition`.
pub fn definition_entry(
    dump_id: i32,
    section: Section,
    desc: &str,
    tag: &str,
    definition: &str,
    dependencies: &[i32],
) -> CatalogEntry {
    CatalogEntry {
        dump_id: DumpId(dump_id),
        section,
        desc: desc.to_string(),
        namespace: Some("public".to_string()),
        tag: Some(tag.to_string()),
        file_name: None,
        columns: None,
        definition: Some(definition.to_string()),
        dependencies: dependencies.iter().copied().map(DumpId).collect(),
    }
}
