use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::conversions::copy::{END_OF_DATA_MARKER, decode_row};
use crate::error::{ErrorKind, RestoreResult};
use crate::restore_error;
use crate::storage::Payload;
use crate::types::Record;

/// Rows buffered between the payload reader and the loading task.
pub const DEFAULT_ROW_CHANNEL_CAPACITY: usize = 1024;

/// Decodes the COPY text rows of a payload on a blocking thread.
///
/// Rows are handed over in payload order through a bounded channel. Dropping the reader stops
/// the decoding thread at its next row.
#[derive(Debug)]
pub struct RowReader {
    rows: mpsc::Receiver<RestoreResult<Record>>,
    task: Option<JoinHandle<()>>,
}

impl RowReader {
    /// Starts decoding `payload`, expecting `column_count` columns in every row.
    pub fn spawn(payload: Payload, column_count: usize, capacity: usize) -> Self {
        let (tx, rows) = mpsc::channel(capacity.max(1));
        let task = tokio::task::spawn_blocking(move || read_rows(payload, column_count, tx));

        Self {
            rows,
            task: Some(task),
        }
    }

    /// Returns the next row, or `None` once the payload is exhausted.
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<RestoreResult<Record>> {
        if let Some(row) = self.rows.recv().await {
            return Some(row);
        }

        // The channel closed: surface a panic of the decoding thread instead of a silent end.
        let task = self.task.take()?;
        match task.await {
            Ok(()) => None,
            Err(err) => Some(Err(err.into())),
        }
    }
}

fn read_rows(
    mut payload: Payload,
    column_count: usize,
    tx: mpsc::Sender<RestoreResult<Record>>,
) {
    let mut line = Vec::with_capacity(256);
    let mut line_number = 0u64;

    loop {
        line.clear();
        let read = match payload.read_line(&mut line) {
            Ok(read) => read,
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                break;
            }
        };
        if read == 0 {
            let _ = tx.blocking_send(Err(restore_error!(
                ErrorKind::InvalidData,
                "Payload ended before end-of-data marker",
                format!("`{}` has no `\\.` line after {line_number} lines", payload.key())
            )));
            break;
        }
        line_number += 1;

        let content = strip_line_terminator(&line);
        if content == END_OF_DATA_MARKER {
            break;
        }

        let row = decode_row(content).and_then(|record| {
            if record.len() == column_count {
                Ok(record)
            } else {
                Err(restore_error!(
                    ErrorKind::InvalidData,
                    "Unexpected number of columns in payload row",
                    format!(
                        "line {line_number} of `{}` has {} columns, expected {column_count}",
                        payload.key(),
                        record.len()
                    )
                ))
            }
        });

        let failed = row.is_err();
        if tx.blocking_send(row).is_err() {
            debug!(key = payload.key(), "row receiver dropped, stopping payload decoding");
            break;
        }
        if failed {
            break;
        }
    }

    payload.close();
}

fn strip_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
