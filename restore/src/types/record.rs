use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};

/// One column value of a row in its textual wire form.
///
/// A NULL carries no bytes; an empty string is a non-NULL value with no bytes.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct RawValue {
    data: Vec<u8>,
    is_null: bool,
}

impl RawValue {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            is_null: false,
        }
    }

    pub fn null() -> Self {
        Self {
            data: Vec::new(),
            is_null: true,
        }
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the value as UTF-8 text, `None` for NULL.
    pub fn as_str(&self) -> RestoreResult<Option<&str>> {
        if self.is_null {
            return Ok(None);
        }

        Ok(Some(std::str::from_utf8(&self.data)?))
    }
}

impl fmt::Debug for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null {
            f.write_str("NULL")
        } else {
            write!(f, "{:?}", String::from_utf8_lossy(&self.data))
        }
    }
}

/// A decoded row, addressable by column index in the order the payload carries the columns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    values: Vec<RawValue>,
}

impl Record {
    pub fn new(values: Vec<RawValue>) -> Self {
        Self { values }
    }

    /// Convenience constructor from optional strings, `None` being NULL.
    pub fn from_text<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|value| value.map_or_else(RawValue::null, RawValue::new))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[RawValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> RestoreResult<&RawValue> {
        match self.values.get(index) {
            Some(value) => Ok(value),
            None => bail!(
                ErrorKind::InvalidData,
                "Column index out of range",
                format!("index {index} but the record has {} columns", self.values.len())
            ),
        }
    }

    pub fn set(&mut self, index: usize, value: RawValue) -> RestoreResult<()> {
        let len = self.values.len();
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => bail!(
                ErrorKind::InvalidData,
                "Column index out of range",
                format!("index {index} but the record has {len} columns")
            ),
        }
    }

    /// Reads a column as text, `None` for NULL.
    pub fn text(&self, index: usize) -> RestoreResult<Option<&str>> {
        self.get(index)?.as_str()
    }
}
