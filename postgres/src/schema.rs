use std::fmt;
use std::str::FromStr;

use pg_escape::quote_identifier;
use thiserror::Error;
use tokio_postgres::types::Type;

/// Errors produced while parsing schema identifiers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table name `{0}` is not of the form `schema.name`")]
    InvalidTableName(String),
}

/// Converts a type OID into a [`Type`], falling back to `TEXT` for types unknown to the driver
/// such as enums and domains. Values of those types travel as text in COPY anyway.
pub fn convert_type_oid_to_type(type_oid: u32) -> Type {
    Type::from_oid(type_oid).unwrap_or(Type::TEXT)
}

/// A fully qualified Postgres table name.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns `"schema"."name"` quoted for use in SQL statements.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl FromStr for TableName {
    type Err = SchemaError;

    /// Parses an unquoted `schema.name`. The first dot separates schema and table.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Ok(TableName::new(schema, name))
            }
            _ => Err(SchemaError::InvalidTableName(s.to_owned())),
        }
    }
}

/// Type-specific modifier, e.g. the length of a `varchar(n)`; `-1` when absent.
type TypeModifier = i32;

/// A column of a destination table.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnSchema {
    pub name: String,
    pub typ: Type,
    pub modifier: TypeModifier,
    /// 1-based `attnum` of the column.
    pub ordinal_position: i32,
    pub nullable: bool,
}

impl ColumnSchema {
    pub fn new(
        name: impl Into<String>,
        typ: Type,
        modifier: TypeModifier,
        ordinal_position: i32,
        nullable: bool,
    ) -> ColumnSchema {
        Self {
            name: name.into(),
            typ,
            modifier,
            ordinal_position,
            nullable,
        }
    }

    /// Short type name as Postgres reports it, e.g. `int4`.
    pub fn type_name(&self) -> &str {
        self.typ.name()
    }
}

/// Columns of a destination table in `attnum` order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TableSchema {
    pub name: TableName,
    pub column_schemas: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: TableName, column_schemas: Vec<ColumnSchema>) -> Self {
        Self {
            name,
            column_schemas,
        }
    }

    /// Looks up a column by exact name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.column_schemas
            .iter()
            .find(|column_schema| column_schema.name == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.column_schemas
            .iter()
            .map(|column_schema| column_schema.name.clone())
            .collect()
    }
}
