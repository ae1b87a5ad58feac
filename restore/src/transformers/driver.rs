use postgres::schema::{TableName, TableSchema};
use tokio_postgres::types::Type;

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};

/// A column as seen by transformers: its name, its position in the record and its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverColumn {
    pub name: String,
    pub index: usize,
    pub typ: Type,
}

impl DriverColumn {
    pub fn type_name(&self) -> &str {
        self.typ.name()
    }
}

/// Resolves column names of a destination table to record positions.
///
/// Records carry their columns in payload order, which is the column list of the dump's
/// `COPY` statement when the catalog provides one and the table's column order otherwise.
#[derive(Debug, Clone)]
pub struct TableDriver {
    table_name: TableName,
    columns: Vec<DriverColumn>,
}

impl TableDriver {
    /// Builds a driver from the destination table's schema.
    ///
    /// Every column of `payload_columns` must exist in `schema`.
    pub fn new(schema: &TableSchema, payload_columns: Option<&[String]>) -> RestoreResult<Self> {
        let columns = match payload_columns {
            None => schema
                .column_schemas
                .iter()
                .enumerate()
                .map(|(index, column_schema)| DriverColumn {
                    name: column_schema.name.clone(),
                    index,
                    typ: column_schema.typ.clone(),
                })
                .collect(),
            Some(names) => {
                let mut columns = Vec::with_capacity(names.len());
                for (index, name) in names.iter().enumerate() {
                    let Some(column_schema) = schema.column(name) else {
                        bail!(
                            ErrorKind::ColumnNotFound,
                            "Payload column not found in destination table",
                            format!("column `{name}` does not exist in table {}", schema.name)
                        );
                    };
                    columns.push(DriverColumn {
                        name: column_schema.name.clone(),
                        index,
                        typ: column_schema.typ.clone(),
                    });
                }
                columns
            }
        };

        Ok(Self {
            table_name: schema.name.clone(),
            columns,
        })
    }

    pub fn table_name(&self) -> &TableName {
        &self.table_name
    }

    /// Looks up a column by name.
    pub fn column_by_name(&self, name: &str) -> Option<&DriverColumn> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn columns(&self) -> &[DriverColumn] {
        &self.columns
    }

    /// Number of columns every record of the table carries.
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }
}

#[cfg(test)]
pub(crate) fn orders_schema() -> TableSchema {
    use postgres::schema::ColumnSchema;

    TableSchema::new(
        TableName::new("public", "orders"),
        vec![
            ColumnSchema::new("id", Type::INT4, -1, 1, false),
            ColumnSchema::new("user_id", Type::INT4, -1, 2, true),
            ColumnSchema::new("amount", Type::NUMERIC, -1, 3, true),
            ColumnSchema::new("priority", Type::INT2, -1, 4, true),
            ColumnSchema::new("note", Type::TEXT, -1, 5, true),
        ],
    )
}
