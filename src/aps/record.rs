// APS diff record framing.
//
// Every record starts with a 4-byte little-endian target offset and a length
// byte. A non-zero length is followed by that many literal bytes. A zero
// length marks a run-length record and is followed by a fill byte and a
// repeat count. The body has no record count; it ends with the stream.

use std::io::{self, Read, Write};

use super::decoder::DecodeError;
use super::header::read_fully;

/// Upper bound on bytes covered by a single record.
pub const MAX_RECORD_LEN: usize = u8::MAX as usize;

/// Length byte value that marks a run-length record.
pub const RLE_MARKER: u8 = 0;

/// Shortest run the encoder frames as a run-length record.
pub const MIN_RLE_RUN: usize = 3;

/// Offset + length/marker.
const PREFIX_LEN: usize = 5;

/// One parsed diff record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// Write `data` at `offset`.
    Literal { offset: u32, data: Vec<u8> },
    /// Write `count` copies of `fill` at `offset`.
    RunLength { offset: u32, fill: u8, count: u8 },
}

impl Record {
    pub fn offset(&self) -> u32 {
        match *self {
            Self::Literal { offset, .. } | Self::RunLength { offset, .. } => offset,
        }
    }

    /// Number of target bytes the record writes.
    pub fn len(&self) -> usize {
        match self {
            Self::Literal { data, .. } => data.len(),
            Self::RunLength { count, .. } => *count as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exclusive end offset in the target.
    pub fn end(&self) -> u64 {
        self.offset() as u64 + self.len() as u64
    }

    /// Size of the record on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Literal { data, .. } => PREFIX_LEN + data.len(),
            Self::RunLength { .. } => PREFIX_LEN + 2,
        }
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            Self::Literal { offset, data } => write_literal(w, *offset, data),
            Self::RunLength {
                offset,
                fill,
                count,
            } => write_run(w, *offset, *fill, *count),
        }
    }
}

/// Emit a literal record. `data` must hold 1..=255 bytes.
pub fn write_literal<W: Write>(w: &mut W, offset: u32, data: &[u8]) -> io::Result<()> {
    if data.is_empty() || data.len() > MAX_RECORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("literal record length {} outside 1..=255", data.len()),
        ));
    }
    let mut prefix = [0u8; PREFIX_LEN];
    prefix[..4].copy_from_slice(&offset.to_le_bytes());
    prefix[4] = data.len() as u8;
    w.write_all(&prefix)?;
    w.write_all(data)
}

/// Emit a run-length record.
pub fn write_run<W: Write>(w: &mut W, offset: u32, fill: u8, count: u8) -> io::Result<()> {
    let mut buf = [0u8; PREFIX_LEN + 2];
    buf[..4].copy_from_slice(&offset.to_le_bytes());
    buf[4] = RLE_MARKER;
    buf[5] = fill;
    buf[6] = count;
    w.write_all(&buf)
}

// ---------------------------------------------------------------------------
// Totals
// ---------------------------------------------------------------------------

/// Record counts shared by the encoder and decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordStats {
    pub literal_records: u64,
    pub run_records: u64,
    /// Target bytes covered by all records.
    pub bytes_covered: u64,
}

impl RecordStats {
    pub fn records(&self) -> u64 {
        self.literal_records + self.run_records
    }

    pub(crate) fn count(&mut self, record_len: usize, is_run: bool) {
        if is_run {
            self.run_records += 1;
        } else {
            self.literal_records += 1;
        }
        self.bytes_covered += record_len as u64;
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Pulls records from a patch body one at a time.
///
/// The reader must be positioned at the first record. `position` tracks the
/// absolute patch offset so truncation errors point at the broken record.
pub struct RecordReader<R> {
    inner: R,
    position: u64,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    /// `position` is the patch offset of the reader's current byte.
    pub fn new(inner: R, position: u64) -> Self {
        Self {
            inner,
            position,
            failed: false,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next record. Returns `Ok(None)` when the stream ends exactly
    /// on a record boundary.
    pub fn next_record(&mut self) -> Result<Option<Record>, DecodeError> {
        let start = self.position;
        let mut prefix = [0u8; PREFIX_LEN];
        let n = read_fully(&mut self.inner, &mut prefix)?;
        self.position += n as u64;
        if n == 0 {
            return Ok(None);
        }
        if n < PREFIX_LEN {
            return Err(DecodeError::Truncated {
                what: "record header",
                offset: start,
            });
        }

        let offset = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]);
        let len = prefix[4];

        if len == RLE_MARKER {
            let mut run = [0u8; 2];
            let n = read_fully(&mut self.inner, &mut run)?;
            self.position += n as u64;
            if n < run.len() {
                return Err(DecodeError::Truncated {
                    what: "run-length record",
                    offset: start,
                });
            }
            return Ok(Some(Record::RunLength {
                offset,
                fill: run[0],
                count: run[1],
            }));
        }

        let mut data = vec![0u8; len as usize];
        let n = read_fully(&mut self.inner, &mut data)?;
        self.position += n as u64;
        if n < data.len() {
            return Err(DecodeError::Truncated {
                what: "literal record",
                offset: start,
            });
        }
        Ok(Some(Record::Literal { offset, data }))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
