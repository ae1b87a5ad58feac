//! Postgres `COPY ... FORMAT text` rows.
//!
//! Columns are separated by a tab and rows end with a newline. `\N` is NULL. A backslash
//! introduces an escape: `\b \f \n \r \t \v \\`, up to three octal digits or `\x` followed by one
//! or two hex digits. Any other escaped character stands for itself.

use bytes::BytesMut;

use crate::bail;
use crate::error::{ErrorKind, RestoreResult};
use crate::types::{RawValue, Record};

/// Line terminating the data of an entry in a dump payload.
pub const END_OF_DATA_MARKER: &[u8] = b"\\.";

const DELIMITER: u8 = b'\t';

/// Decodes one row, without its trailing newline.
pub fn decode_row(line: &[u8]) -> RestoreResult<Record> {
    let mut values = Vec::new();
    for field in line.split(|byte| *byte == DELIMITER) {
        values.push(decode_field(field)?);
    }

    Ok(Record::new(values))
}

fn decode_field(field: &[u8]) -> RestoreResult<RawValue> {
    if field == b"\\N" {
        return Ok(RawValue::null());
    }

    if !field.contains(&b'\\') {
        return Ok(RawValue::new(field));
    }

    let mut decoded = Vec::with_capacity(field.len());
    let mut i = 0;
    while i < field.len() {
        let byte = field[i];
        i += 1;

        if byte != b'\\' {
            decoded.push(byte);
            continue;
        }

        let Some(&escaped) = field.get(i) else {
            bail!(
                ErrorKind::InvalidData,
                "Malformed COPY field",
                "the field ends with a lone backslash"
            );
        };
        i += 1;

        match escaped {
            b'b' => decoded.push(0x08),
            b'f' => decoded.push(0x0c),
            b'n' => decoded.push(b'\n'),
            b'r' => decoded.push(b'\r'),
            b't' => decoded.push(b'\t'),
            b'v' => decoded.push(0x0b),
            b'0'..=b'7' => {
                let mut value = u32::from(escaped - b'0');
                let mut digits = 1;
                while digits < 3 {
                    match field.get(i) {
                        Some(&digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            i += 1;
                            digits += 1;
                        }
                        _ => break,
                    }
                }
                // Postgres keeps only the low byte of octal escapes above \377.
                decoded.push((value & 0xff) as u8);
            }
            b'x' if field.get(i).is_some_and(u8::is_ascii_hexdigit) => {
                let mut value = 0u8;
                let mut digits = 0;
                while digits < 2 {
                    match field.get(i).and_then(|digit| (*digit as char).to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit as u8;
                            i += 1;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                decoded.push(value);
            }
            other => decoded.push(other),
        }
    }

    Ok(RawValue::new(decoded))
}

/// Appends `record` as one row, newline included, to `buf`.
pub fn encode_row(record: &Record, buf: &mut BytesMut) {
    for (index, value) in record.values().iter().enumerate() {
        if index > 0 {
            buf.extend_from_slice(&[DELIMITER]);
        }

        if value.is_null() {
            buf.extend_from_slice(b"\\N");
            continue;
        }

        for &byte in value.data() {
            match byte {
                b'\\' => buf.extend_from_slice(b"\\\\"),
                b'\t' => buf.extend_from_slice(b"\\t"),
                b'\n' => buf.extend_from_slice(b"\\n"),
                b'\r' => buf.extend_from_slice(b"\\r"),
                0x08 => buf.extend_from_slice(b"\\b"),
                0x0b => buf.extend_from_slice(b"\\v"),
                0x0c => buf.extend_from_slice(b"\\f"),
                other => buf.extend_from_slice(&[other]),
            }
        }
    }

    buf.extend_from_slice(b"\n");
}
