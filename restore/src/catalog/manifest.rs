use std::collections::HashSet;
use std::io::Read;
use std::sync::Arc;

use serde::Deserialize;

use crate::bail;
use crate::catalog::{CatalogEntry, DumpId, Section};
use crate::error::{ErrorKind, RestoreResult};

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    entries: Vec<CatalogEntry>,
}

/// Entries of a dump in catalog order.
///
/// The catalog is read from a JSON manifest of the form `{ "entries": [...] }`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<Arc<CatalogEntry>>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate dump ids.
    pub fn new(entries: Vec<CatalogEntry>) -> RestoreResult<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.dump_id) {
                bail!(
                    ErrorKind::InvalidData,
                    "Duplicate dump id in catalog",
                    format!("dump id {} appears more than once", entry.dump_id)
                );
            }
        }

        Ok(Self {
            entries: entries.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn from_json(json: &[u8]) -> RestoreResult<Self> {
        let document: CatalogDocument = serde_json::from_slice(json)?;
        Self::new(document.entries)
    }

    pub fn from_reader(reader: impl Read) -> RestoreResult<Self> {
        let document: CatalogDocument = serde_json::from_reader(reader)?;
        Self::new(document.entries)
    }

    pub fn entries(&self) -> &[Arc<CatalogEntry>] {
        &self.entries
    }

    pub fn get(&self, dump_id: DumpId) -> Option<&Arc<CatalogEntry>> {
        self.entries.iter().find(|entry| entry.dump_id == dump_id)
    }

    /// Entries of one section, in catalog order.
    pub fn phase(&self, section: Section) -> Vec<Arc<CatalogEntry>> {
        self.entries
            .iter()
            .filter(|entry| entry.section == section)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "entries": [
            {
                "dump_id": 1,
                "section": "pre_data",
                "desc": "TABLE",
                "namespace": "public",
                "tag": "orders",
                "definition": "create table public.orders (id int4)"
            },
            {
                "dump_id": 2,
                "section": "data",
                "desc": "TABLE DATA",
                "namespace": "public",
                "tag": "orders",
                "file_name": "2.dat.gz",
                "columns": ["id"],
                "dependencies": [1]
            }
        ]
    }"#;

    #[test]
    fn parses_the_json_manifest() {
        let catalog = Catalog::from_json(MANIFEST.as_bytes()).unwrap();

        assert_eq!(catalog.len(), 2);
        let data = catalog.get(DumpId(2)).unwrap();
        assert_eq!(data.section, Section::Data);
        assert_eq!(data.dependencies, vec![DumpId(1)]);
        assert_eq!(data.columns.as_deref(), Some(&["id".to_string()][..]));

        assert_eq!(catalog.phase(Section::PreData).len(), 1);
        assert!(catalog.phase(Section::PostData).is_empty());
    }

    #[test]
    fn duplicate_dump_ids_are_rejected() {
        let json = r#"{"entries": [
            {"dump_id": 7, "section": "data"},
            {"dump_id": 7, "section": "post_data"}
        ]}"#;

        let err = Catalog::from_json(json.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn malformed_manifest_is_a_deserialization_error() {
        let err = Catalog::from_json(b"{\"entries\": [{\"section\": \"data\"}]}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);
    }
}
