// Streaming APS encoder.
//
// PatchEncoder holds the original image in memory and consumes the modified
// image in chunks via write_modified(). The two are scanned in lockstep; the
// original reads as zero past its end. Each maximal run of differing bytes
// (capped at 255) becomes one record:
//   - run-length record if every byte equals the first and the run is > 2
//   - literal record otherwise
// A run may straddle chunk boundaries; finish() flushes the last one.

use std::io::Write;

use thiserror::Error;

use super::header::PatchHeader;
use super::record::{self, MAX_RECORD_LEN, MIN_RLE_RUN, RecordStats};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("modified image is {len} bytes, APS offsets address at most {max} bytes")]
    ImageTooLarge { len: u64, max: u64 },

    #[error("modified image length mismatch: declared {declared} bytes, got {actual}")]
    LengthMismatch { declared: u64, actual: u64 },
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Summary of one encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub records: RecordStats,
    /// Patch bytes written, header included.
    pub patch_len: u64,
}

// ---------------------------------------------------------------------------
// Difference run
// ---------------------------------------------------------------------------

/// Bounded accumulator for one run of differing bytes.
struct DiffRun {
    offset: u32,
    buf: [u8; MAX_RECORD_LEN],
    len: usize,
    /// Every byte so far equals `buf[0]`. Only ever goes true -> false.
    uniform: bool,
}

impl DiffRun {
    fn new() -> Self {
        Self {
            offset: 0,
            buf: [0u8; MAX_RECORD_LEN],
            len: 0,
            uniform: true,
        }
    }

    fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn is_full(&self) -> bool {
        self.len == MAX_RECORD_LEN
    }

    fn start(&mut self, offset: u32) {
        self.offset = offset;
        self.len = 0;
        self.uniform = true;
    }

    fn push(&mut self, b: u8) {
        if self.len > 0 && b != self.buf[0] {
            self.uniform = false;
        }
        self.buf[self.len] = b;
        self.len += 1;
    }

    fn is_run_length(&self) -> bool {
        self.uniform && self.len >= MIN_RLE_RUN
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Streaming APS patch encoder.
///
/// The header is written by [`PatchEncoder::new`]; records follow as the
/// modified image is fed in.
pub struct PatchEncoder<'a, W: Write> {
    writer: W,
    original: &'a [u8],
    modified_len: u64,
    /// Bytes of the modified image consumed so far.
    position: u64,
    run: DiffRun,
    stats: EncodeStats,
}

impl<'a, W: Write> PatchEncoder<'a, W> {
    /// Start a patch against `original` for a modified image of
    /// `modified_len` bytes. Writes the header immediately.
    pub fn new(mut writer: W, original: &'a [u8], modified_len: u64) -> Result<Self, EncodeError> {
        let len32 = u32::try_from(modified_len).map_err(|_| EncodeError::ImageTooLarge {
            len: modified_len,
            max: u32::MAX as u64,
        })?;

        let header = PatchHeader::for_image(original, len32);
        header.encode(&mut writer)?;
        log::debug!(
            "aps encode: original {} bytes, modified {modified_len} bytes, crc {}",
            original.len(),
            header.crc
        );

        Ok(Self {
            writer,
            original,
            modified_len,
            position: 0,
            run: DiffRun::new(),
            stats: EncodeStats {
                records: RecordStats::default(),
                patch_len: super::header::HEADER_LEN as u64,
            },
        })
    }

    /// Feed the next chunk of the modified image.
    pub fn write_modified(&mut self, chunk: &[u8]) -> Result<(), EncodeError> {
        let remaining = self.modified_len - self.position;
        if chunk.len() as u64 > remaining {
            return Err(EncodeError::LengthMismatch {
                declared: self.modified_len,
                actual: self.position + chunk.len() as u64,
            });
        }

        let mut i = 0;
        while i < chunk.len() {
            if self.run.is_empty() {
                // Skip the matching stretch in one go.
                let skip = self.matching_prefix(&chunk[i..]);
                i += skip;
                self.position += skip as u64;
                if i == chunk.len() {
                    break;
                }
            }

            let m = chunk[i];
            if m == self.original_at(self.position) {
                self.flush_run()?;
            } else {
                if self.run.is_empty() {
                    // position < modified_len <= u32::MAX
                    self.run.start(self.position as u32);
                }
                self.run.push(m);
                if self.run.is_full() {
                    self.flush_run()?;
                }
            }
            i += 1;
            self.position += 1;
        }

        Ok(())
    }

    /// Flush the last run and return the writer.
    ///
    /// Fails if fewer bytes than the declared modified length were fed.
    pub fn finish(mut self) -> Result<(W, EncodeStats), EncodeError> {
        if self.position != self.modified_len {
            return Err(EncodeError::LengthMismatch {
                declared: self.modified_len,
                actual: self.position,
            });
        }
        self.flush_run()?;
        self.writer.flush()?;

        let r = &self.stats.records;
        log::debug!(
            "aps encode: {} records ({} literal, {} run-length), {} bytes covered, patch {} bytes",
            r.records(),
            r.literal_records,
            r.run_records,
            r.bytes_covered,
            self.stats.patch_len
        );
        Ok((self.writer, self.stats))
    }

    /// Bytes of the modified image consumed so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn stats(&self) -> &EncodeStats {
        &self.stats
    }

    #[inline]
    fn original_at(&self, pos: u64) -> u8 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| self.original.get(p))
            .copied()
            .unwrap_or(0)
    }

    /// Length of the prefix of `chunk` that equals the (zero-extended)
    /// original at the current position.
    fn matching_prefix(&self, chunk: &[u8]) -> usize {
        let start = usize::try_from(self.position).unwrap_or(usize::MAX);
        let orig = self.original.get(start..).unwrap_or(&[]);
        let overlap = chunk.len().min(orig.len());
        let mut n = chunk[..overlap]
            .iter()
            .zip(&orig[..overlap])
            .position(|(a, b)| a != b)
            .unwrap_or(overlap);
        if n == overlap {
            n += chunk[overlap..]
                .iter()
                .position(|&b| b != 0)
                .unwrap_or(chunk.len() - overlap);
        }
        n
    }

    fn flush_run(&mut self) -> Result<(), EncodeError> {
        if self.run.is_empty() {
            return Ok(());
        }
        let run = &self.run;
        let written = if run.is_run_length() {
            log::trace!(
                "aps record: run-length offset={:#X} fill={:#04X} count={}",
                run.offset,
                run.buf[0],
                run.len
            );
            record::write_run(&mut self.writer, run.offset, run.buf[0], run.len as u8)?;
            7
        } else {
            log::trace!("aps record: literal offset={:#X} len={}", run.offset, run.len);
            record::write_literal(&mut self.writer, run.offset, &run.buf[..run.len])?;
            5 + run.len as u64
        };
        self.stats.records.count(run.len, run.is_run_length());
        self.stats.patch_len += written;
        self.run.len = 0;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Convenience
// ---------------------------------------------------------------------------

/// Encode a complete patch turning `original` into `modified`.
pub fn encode_all<W: Write>(
    output: W,
    original: &[u8],
    modified: &[u8],
) -> Result<EncodeStats, EncodeError> {
    let mut encoder = PatchEncoder::new(output, original, modified.len() as u64)?;
    encoder.write_modified(modified)?;
    let (_, stats) = encoder.finish()?;
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aps::header::HEADER_LEN;
    use crate::aps::record::{Record, RecordReader};

    fn encode(original: &[u8], modified: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_all(&mut out, original, modified).unwrap();
        out
    }

    fn records(patch: &[u8]) -> Vec<Record> {
        RecordReader::new(&patch[HEADER_LEN..], HEADER_LEN as u64)
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn identical_images_have_empty_body() {
        let image = vec![0x42u8; 512];
        let patch = encode(&image, &image);
        assert_eq!(patch.len(), HEADER_LEN);
    }

    #[test]
    fn position_and_stats_track_progress() {
        let original = vec![0u8; 32];
        let mut modified = original.clone();
        modified[4..8].fill(0xAA);
        modified[20] = 1;

        let mut enc = PatchEncoder::new(Vec::new(), &original, 32).unwrap();
        assert_eq!(enc.position(), 0);
        assert_eq!(enc.stats().patch_len, HEADER_LEN as u64);

        enc.write_modified(&modified[..10]).unwrap();
        assert_eq!(enc.position(), 10);
        // The run at 4..8 is closed by the matching byte at 8.
        assert_eq!(enc.stats().records.run_records, 1);
        assert_eq!(enc.stats().patch_len, HEADER_LEN as u64 + 7);

        enc.write_modified(&modified[10..]).unwrap();
        assert_eq!(enc.position(), 32);
        assert_eq!(enc.stats().records.literal_records, 1);

        let (patch, stats) = enc.finish().unwrap();
        assert_eq!(stats.patch_len, patch.len() as u64);
        assert_eq!(stats.records.bytes_covered, 5);
    }

    #[test]
    fn uniform_run_of_three_is_run_length() {
        let original = vec![0u8; 16];
        let mut modified = original.clone();
        modified[4..7].fill(0xEE);
        assert_eq!(
            records(&encode(&original, &modified)),
            vec![Record::RunLength {
                offset: 4,
                fill: 0xEE,
                count: 3
            }]
        );
    }

    #[test]
    fn uniform_runs_of_one_and_two_are_literal() {
        let original = vec![0u8; 16];
        let mut modified = original.clone();
        modified[1] = 0x11;
        modified[8..10].fill(0x22);
        assert_eq!(
            records(&encode(&original, &modified)),
            vec![
                Record::Literal {
                    offset: 1,
                    data: vec![0x11]
                },
                Record::Literal {
                    offset: 8,
                    data: vec![0x22, 0x22]
                },
            ]
        );
    }

    #[test]
    fn mixed_run_is_literal_even_if_tail_repeats() {
        let original = vec![0u8; 16];
        let mut modified = original.clone();
        modified[2..8].copy_from_slice(&[1, 2, 2, 2, 2, 2]);
        assert_eq!(
            records(&encode(&original, &modified)),
            vec![Record::Literal {
                offset: 2,
                data: vec![1, 2, 2, 2, 2, 2]
            }]
        );
    }

    #[test]
    fn run_split_at_255() {
        let original = vec![0u8; 600];
        let mut modified = original.clone();
        modified[10..10 + 256].fill(0x33);
        assert_eq!(
            records(&encode(&original, &modified)),
            vec![
                Record::RunLength {
                    offset: 10,
                    fill: 0x33,
                    count: 255
                },
                Record::Literal {
                    offset: 265,
                    data: vec![0x33]
                },
            ]
        );
    }

    #[test]
    fn runs_span_chunk_boundaries() {
        let original = vec![0u8; 64];
        let mut modified = original.clone();
        modified[20..30].fill(0x44);
        modified[40] = 9;

        let whole = encode(&original, &modified);

        let mut out = Vec::new();
        let mut enc = PatchEncoder::new(&mut out, &original, modified.len() as u64).unwrap();
        for chunk in modified.chunks(7) {
            enc.write_modified(chunk).unwrap();
        }
        enc.finish().unwrap();
        assert_eq!(out, whole);
    }

    #[test]
    fn original_is_zero_extended() {
        let original = [5u8, 5];
        let modified = [5u8, 5, 0, 0, 7, 0];
        assert_eq!(
            records(&encode(&original, &modified)),
            vec![Record::Literal {
                offset: 4,
                data: vec![7]
            }]
        );
    }

    #[test]
    fn run_ends_at_modified_end() {
        let original = vec![0u8; 8];
        let modified = [0u8, 0, 0, 0, 0, 9, 9, 9];
        assert_eq!(
            records(&encode(&original, &modified)),
            vec![Record::RunLength {
                offset: 5,
                fill: 9,
                count: 3
            }]
        );
    }

    #[test]
    fn stats_track_records_and_patch_len() {
        let original = vec![0u8; 32];
        let mut modified = original.clone();
        modified[0..4].fill(1);
        modified[10] = 2;
        let mut out = Vec::new();
        let stats = encode_all(&mut out, &original, &modified).unwrap();
        assert_eq!(stats.records.run_records, 1);
        assert_eq!(stats.records.literal_records, 1);
        assert_eq!(stats.records.bytes_covered, 5);
        assert_eq!(stats.patch_len, out.len() as u64);
    }

    #[test]
    fn overfeeding_is_rejected() {
        let mut out = Vec::new();
        let mut enc = PatchEncoder::new(&mut out, &[], 2).unwrap();
        let err = enc.write_modified(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            EncodeError::LengthMismatch {
                declared: 2,
                actual: 3
            }
        ));
    }

    #[test]
    fn underfeeding_is_rejected() {
        let mut out = Vec::new();
        let mut enc = PatchEncoder::new(&mut out, &[], 4).unwrap();
        enc.write_modified(&[1]).unwrap();
        assert!(matches!(
            enc.finish(),
            Err(EncodeError::LengthMismatch {
                declared: 4,
                actual: 1
            })
        ));
    }

    #[test]
    fn oversized_modified_length_rejected_before_writing() {
        let mut out = Vec::new();
        let err = PatchEncoder::new(&mut out, &[], u32::MAX as u64 + 1)
            .err()
            .unwrap();
        assert!(matches!(err, EncodeError::ImageTooLarge { .. }));
        assert!(out.is_empty());
    }
}
