use std::fmt;
use std::io::{self, BufRead, BufReader, Read};

use flate2::read::MultiGzDecoder;

use crate::error::{ErrorKind, RestoreError, RestoreResult};
use crate::restore_error;
use crate::storage::ObjectReader;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Decoded byte stream of an entry's payload.
///
/// Gzip-compressed objects, recognized by their magic bytes, are decompressed transparently;
/// anything else is passed through unchanged. Reading blocks, so a payload is consumed on a
/// blocking thread.
pub struct Payload {
    key: String,
    compressed: bool,
    reader: Box<dyn BufRead + Send>,
}

impl Payload {
    /// Wraps a raw object stream. Blocks to sniff the first bytes of the object.
    pub fn open(key: impl Into<String>, object: ObjectReader) -> RestoreResult<Self> {
        let key = key.into();
        let mut buffered = BufReader::new(object);

        let head = match buffered.fill_buf() {
            Ok(head) => head,
            Err(err) => {
                return Err(restore_error!(
                    ErrorKind::StorageIoError,
                    "Failed to read object",
                    format!("object `{key}`"),
                    source: err
                ));
            }
        };
        let compressed = head.starts_with(&GZIP_MAGIC);

        let reader: Box<dyn BufRead + Send> = if compressed {
            Box::new(BufReader::new(MultiGzDecoder::new(buffered)))
        } else {
            Box::new(buffered)
        };

        Ok(Self {
            key,
            compressed,
            reader,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Reads up to and including the next newline into `buf`. Returns `0` at the end.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> RestoreResult<usize> {
        self.reader
            .read_until(b'\n', buf)
            .map_err(|err| self.classify_read_error(err))
    }

    /// Reads the remaining payload.
    pub fn read_all(&mut self) -> RestoreResult<Vec<u8>> {
        let mut data = Vec::new();
        self.reader
            .read_to_end(&mut data)
            .map_err(|err| self.classify_read_error(err))?;

        Ok(data)
    }

    /// Releases the underlying object.
    pub fn close(self) {}

    fn classify_read_error(&self, err: io::Error) -> RestoreError {
        let corrupt = matches!(
            err.kind(),
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof
        );

        if self.compressed && corrupt {
            restore_error!(
                ErrorKind::DecompressionFailed,
                "Failed to decompress payload",
                format!("object `{}`", self.key),
                source: err
            )
        } else {
            restore_error!(
                ErrorKind::StorageIoError,
                "Failed to read payload",
                format!("object `{}`", self.key),
                source: err
            )
        }
    }
}

impl Read for Payload {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("key", &self.key)
            .field("compressed", &self.compressed)
            .finish_non_exhaustive()
    }
}
