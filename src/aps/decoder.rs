// APS decoder: header validation and record application.
//
// Application order:
//   1. parse the 78-byte header
//   2. compare the header CRC with the target image CRC (0x10); a mismatch
//      aborts before anything is written
//   3. replay records in stream order against a copy of the image, seeking
//      to each record's absolute offset
//
// Records are not checked for ordering or overlap. A later record simply
// overwrites an earlier one.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use thiserror::Error;

use super::header::{Crc, HEADER_LEN, PatchHeader};
use super::record::{MAX_RECORD_LEN, Record, RecordReader, RecordStats};

// ---------------------------------------------------------------------------
// Decoder error
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid APS magic: {}", hex::encode_upper(.0))]
    InvalidMagic([u8; 7]),

    #[error("truncated patch: {what} at offset {offset:#X}")]
    Truncated { what: &'static str, offset: u64 },

    #[error("patch validation failed: CRC mismatch [{image} != {patch}]")]
    CrcMismatch { image: Crc, patch: Crc },
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for applying a patch.
#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Resize the output to the modified length stored in the header once
    /// all records are applied. Off by default: the output keeps the
    /// original image's length unless records write past its end.
    pub resize: bool,
    /// Replace an existing output file (file layer only).
    pub overwrite: bool,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check that `header` was built against an image with CRC `image`.
pub fn validate(header: &PatchHeader, image: &Crc) -> Result<(), DecodeError> {
    if header.crc != *image {
        return Err(DecodeError::CrcMismatch {
            image: *image,
            patch: header.crc,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Record application
// ---------------------------------------------------------------------------

/// Write one record into `dest` at its absolute offset.
pub fn apply_record<W: Write + Seek>(dest: &mut W, record: &Record) -> io::Result<()> {
    dest.seek(SeekFrom::Start(record.offset() as u64))?;
    match record {
        Record::Literal { data, .. } => dest.write_all(data),
        Record::RunLength { fill, count, .. } => {
            let fill_buf = [*fill; MAX_RECORD_LEN];
            dest.write_all(&fill_buf[..*count as usize])
        }
    }
}

// ---------------------------------------------------------------------------
// Patch decoder
// ---------------------------------------------------------------------------

/// Reads an APS patch stream: header first, then records on demand.
pub struct PatchDecoder<R: Read> {
    header: PatchHeader,
    records: RecordReader<R>,
    stats: RecordStats,
}

impl<R: Read> PatchDecoder<R> {
    /// Parse the header from the start of `reader`.
    pub fn new(mut reader: R) -> Result<Self, DecodeError> {
        let header = PatchHeader::decode(&mut reader)?;
        Ok(Self {
            header,
            records: RecordReader::new(reader, HEADER_LEN as u64),
            stats: RecordStats::default(),
        })
    }

    pub fn header(&self) -> &PatchHeader {
        &self.header
    }

    /// Check the patch against the CRC of the image it is about to modify.
    pub fn validate_image(&self, image: &Crc) -> Result<(), DecodeError> {
        validate(&self.header, image)
    }

    /// Apply every remaining record to `dest`.
    ///
    /// Callers must validate first. On error `dest` may hold a partially
    /// patched image.
    pub fn apply_to<W: Write + Seek>(&mut self, dest: &mut W) -> Result<RecordStats, DecodeError> {
        while let Some(record) = self.records.next_record()? {
            log::trace!(
                "aps apply: {} record offset={:#X} len={}",
                if matches!(record, Record::RunLength { .. }) {
                    "run-length"
                } else {
                    "literal"
                },
                record.offset(),
                record.len()
            );
            apply_record(dest, &record)?;
            self.stats
                .count(record.len(), matches!(record, Record::RunLength { .. }));
        }
        dest.flush()?;
        Ok(self.stats)
    }

    /// Records applied so far.
    pub fn stats(&self) -> &RecordStats {
        &self.stats
    }

    /// Remaining records, for inspection instead of application.
    pub fn into_records(self) -> RecordReader<R> {
        self.records
    }
}

// ---------------------------------------------------------------------------
// Convenience
// ---------------------------------------------------------------------------

/// Apply `patch` to an in-memory copy of `original`.
pub fn apply_all(original: &[u8], patch: &[u8], opts: &ApplyOptions) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = PatchDecoder::new(patch)?;
    decoder.validate_image(&Crc::from_image(original))?;

    let mut out = Cursor::new(original.to_vec());
    decoder.apply_to(&mut out)?;
    let mut out = out.into_inner();

    if opts.resize {
        out.resize(decoder.header().modified_len as usize, 0);
    }
    Ok(out)
}

/// Parse a whole patch into its header and record list.
pub fn read_patch<R: Read>(reader: R) -> Result<(PatchHeader, Vec<Record>), DecodeError> {
    let decoder = PatchDecoder::new(reader)?;
    let header = decoder.header().clone();
    let records = decoder.into_records().collect::<Result<Vec<_>, _>>()?;
    Ok((header, records))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aps::encoder::encode_all;
    use crate::aps::header::{IMAGE_CRC_OFFSET, PATCH_CRC_OFFSET};
    use crate::aps::record::{write_literal, write_run};

    fn image_with_crc(len: usize, crc: [u8; 8]) -> Vec<u8> {
        let mut image: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        image[IMAGE_CRC_OFFSET..IMAGE_CRC_OFFSET + 8].copy_from_slice(&crc);
        image
    }

    fn patch_for(original: &[u8], modified: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_all(&mut out, original, modified).unwrap();
        out
    }

    #[test]
    fn roundtrip_same_length() {
        let original = image_with_crc(1024, [1, 2, 3, 4, 5, 6, 7, 8]);
        let mut modified = original.clone();
        modified[100..110].fill(0xAB);
        modified[900] ^= 0xFF;

        let patch = patch_for(&original, &modified);
        let out = apply_all(&original, &patch, &ApplyOptions::default()).unwrap();
        assert_eq!(out, modified);
    }

    #[test]
    fn roundtrip_grown_image() {
        let original = image_with_crc(256, [9; 8]);
        let mut modified = original.clone();
        modified.extend_from_slice(&[0, 0, 0xCC, 0xCC, 0xCC, 0, 1]);

        let patch = patch_for(&original, &modified);
        let out = apply_all(&original, &patch, &ApplyOptions::default()).unwrap();
        assert_eq!(out, modified);
    }

    #[test]
    fn grown_image_with_trailing_zeros_needs_resize() {
        let original = image_with_crc(64, [3; 8]);
        let mut modified = original.clone();
        modified.extend_from_slice(&[0u8; 16]);

        let patch = patch_for(&original, &modified);
        let plain = apply_all(&original, &patch, &ApplyOptions::default()).unwrap();
        assert_eq!(plain, original);

        let resized = apply_all(
            &original,
            &patch,
            &ApplyOptions {
                resize: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(resized, modified);
    }

    #[test]
    fn shrunk_image_prefix_matches_and_resize_truncates() {
        let original = image_with_crc(512, [4; 8]);
        let mut modified = original[..300].to_vec();
        modified[200] ^= 0x55;

        let patch = patch_for(&original, &modified);
        let plain = apply_all(&original, &patch, &ApplyOptions::default()).unwrap();
        assert_eq!(plain.len(), original.len());
        assert_eq!(&plain[..300], &modified[..]);

        let resized = apply_all(
            &original,
            &patch,
            &ApplyOptions {
                resize: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(resized, modified);
    }

    #[test]
    fn crc_mismatch_reports_both_values() {
        let original = image_with_crc(128, [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11]);
        let mut modified = original.clone();
        modified[90] = 1;
        let mut patch = patch_for(&original, &modified);
        patch[PATCH_CRC_OFFSET + 7] = 0x12;

        let err = apply_all(&original, &patch, &ApplyOptions::default()).unwrap_err();
        match &err {
            DecodeError::CrcMismatch { image, patch } => {
                assert_eq!(image.to_string(), "AABBCCDDEEFF0011");
                assert_eq!(patch.to_string(), "AABBCCDDEEFF0012");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            err.to_string(),
            "patch validation failed: CRC mismatch [AABBCCDDEEFF0011 != AABBCCDDEEFF0012]"
        );
    }

    #[test]
    fn overlapping_records_apply_in_stream_order() {
        let original = image_with_crc(64, [0; 8]);
        let mut patch = crate::aps::header::PatchHeader::for_image(&original, 64)
            .to_bytes()
            .to_vec();
        write_run(&mut patch, 40, 0x11, 8).unwrap();
        write_literal(&mut patch, 44, &[0x22, 0x23]).unwrap();
        write_literal(&mut patch, 20, &[0x99]).unwrap();

        let out = apply_all(&original, &patch, &ApplyOptions::default()).unwrap();
        assert_eq!(&out[40..48], &[0x11, 0x11, 0x11, 0x11, 0x22, 0x23, 0x11, 0x11]);
        assert_eq!(out[20], 0x99);
    }

    #[test]
    fn truncated_body_is_an_error() {
        let original = image_with_crc(64, [0; 8]);
        let mut modified = original.clone();
        modified[30..33].copy_from_slice(&[7, 8, 9]);
        let mut patch = patch_for(&original, &modified);
        patch.pop();

        let err = apply_all(&original, &patch, &ApplyOptions::default()).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn read_patch_lists_records() {
        let original = vec![0u8; 1024];
        let mut modified = original.clone();
        modified[100..104].fill(0xFF);
        modified[500] = 0x7A;

        let (header, records) = read_patch(&patch_for(&original, &modified)[..]).unwrap();
        assert_eq!(header.modified_len, 1024);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn decoder_stats_count_records() {
        let original = vec![0u8; 64];
        let mut modified = original.clone();
        modified[0..5].fill(3);
        modified[10] = 1;
        let patch = patch_for(&original, &modified);

        let mut dec = PatchDecoder::new(&patch[..]).unwrap();
        let mut out = Cursor::new(original.clone());
        let stats = dec.apply_to(&mut out).unwrap();
        assert_eq!(stats.run_records, 1);
        assert_eq!(stats.literal_records, 1);
        assert_eq!(stats.bytes_covered, 6);
        assert_eq!(out.into_inner(), modified);
    }
}
