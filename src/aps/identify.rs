// Patch naming from the embedded CRC.
//
// The canonical name of a patch is the high four bytes of its original-image
// CRC in uppercase hex, e.g. `AABBCCDD.aps`. Nothing else in the patch is
// read or validated.

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use super::decoder::DecodeError;
use super::header::{Crc, PATCH_CRC_OFFSET, read_fully};

/// File extension used for APS patches.
pub const PATCH_EXTENSION: &str = "aps";

/// High half of a patch's CRC field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PatchId(pub [u8; 4]);

impl PatchId {
    pub fn from_crc(crc: &Crc) -> Self {
        Self(crc.hi())
    }

    /// `<HEX>.aps`
    pub fn file_name(&self) -> String {
        format!("{self}.{PATCH_EXTENSION}")
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// Read the patch ID from a seekable patch stream.
pub fn identify<R: Read + Seek>(patch: &mut R) -> Result<PatchId, DecodeError> {
    patch.seek(SeekFrom::Start(PATCH_CRC_OFFSET as u64))?;
    let mut id = [0u8; 4];
    let n = read_fully(patch, &mut id)?;
    if n < id.len() {
        return Err(DecodeError::Truncated {
            what: "CRC field",
            offset: PATCH_CRC_OFFSET as u64,
        });
    }
    Ok(PatchId(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn name_from_high_crc_bytes() {
        let mut patch = vec![0u8; 0x4E];
        patch[PATCH_CRC_OFFSET..PATCH_CRC_OFFSET + 8]
            .copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11]);

        let id = identify(&mut Cursor::new(&patch)).unwrap();
        assert_eq!(id.to_string(), "AABBCCDD");
        assert_eq!(id.file_name(), "AABBCCDD.aps");
    }

    #[test]
    fn only_four_crc_bytes_required() {
        let mut patch = vec![0u8; PATCH_CRC_OFFSET + 4];
        patch[PATCH_CRC_OFFSET..].copy_from_slice(&[0x01, 0x02, 0x0a, 0xff]);
        let id = identify(&mut Cursor::new(&patch)).unwrap();
        assert_eq!(id.file_name(), "01020AFF.aps");
    }

    #[test]
    fn short_patch_is_truncated() {
        let patch = vec![0u8; PATCH_CRC_OFFSET + 3];
        assert!(matches!(
            identify(&mut Cursor::new(&patch)),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn from_crc_matches_stream() {
        let crc = Crc([1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(PatchId::from_crc(&crc), PatchId([1, 2, 3, 4]));
    }
}
