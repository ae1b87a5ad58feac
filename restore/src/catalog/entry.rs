use std::fmt;

use postgres::schema::TableName;
use serde::{Deserialize, Serialize};

/// Identifier of an entry within one dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DumpId(pub i32);

impl fmt::Display for DumpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Part of the dump an entry belongs to. Sections are restored in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    PreData,
    Data,
    PostData,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::PreData, Section::Data, Section::PostData];

    /// Kind used in diagnostics for entries of this section.
    pub fn label(self) -> &'static str {
        match self {
            Section::PreData => "pre-data",
            Section::Data => "table",
            Section::PostData => "post-data",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::PreData => "pre-data",
            Section::Data => "data",
            Section::PostData => "post-data",
        };
        f.write_str(name)
    }
}

/// One restorable unit of the dump.
///
/// Entries are read once from the catalog and shared immutably for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub dump_id: DumpId,
    pub section: Section,
    /// Object description as written by the dump tool, e.g. `TABLE DATA` or `SEQUENCE SET`.
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    /// Object holding the entry's payload, relative to the store root.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Column order of the payload, taken from the dump's `COPY` statement.
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    /// SQL executed for entries that carry no payload.
    #[serde(default)]
    pub definition: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DumpId>,
}

impl CatalogEntry {
    /// Returns `<kind> <namespace>.<tag>`, e.g. `table public.orders`. Missing parts render as `-`.
    pub fn debug_label(&self) -> String {
        format!(
            "{} {}.{}",
            self.section.label(),
            self.namespace.as_deref().unwrap_or("-"),
            self.tag.as_deref().unwrap_or("-")
        )
    }

    /// Relation targeted by the entry, if it names one.
    pub fn table_name(&self) -> Option<TableName> {
        match (self.namespace.as_deref(), self.tag.as_deref()) {
            (Some(namespace), Some(tag)) => Some(TableName::new(namespace, tag)),
            _ => None,
        }
    }

    pub fn depends_on(&self, dump_id: DumpId) -> bool {
        self.dependencies.contains(&dump_id)
    }
}

#[cfg(test)]
pub(crate) fn data_entry(dump_id: i32, namespace: &str, tag: &str) -> CatalogEntry {
    CatalogEntry {
        dump_id: DumpId(dump_id),
        section: Section::Data,
        desc: "TABLE DATA".to_string(),
        namespace: Some(namespace.to_string()),
        tag: Some(tag.to_string()),
        file_name: Some(format!("{dump_id}.dat.gz")),
        columns: None,
        definition: None,
        dependencies: Vec::new(),
    }
}
