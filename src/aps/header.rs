// APS patch header layout and the image fields it is derived from.
//
// The header is a fixed 78-byte block. Every offset below is part of the
// on-disk format shared with other APS tools and must not drift between the
// encoder and the decoder.
//
//   0x00  7   magic "APS10\x01\x00"
//   0x07  50  description (space padded)
//   0x39  1   format type (0x01 written; any value accepted)
//   0x3A  3   cartridge ID
//   0x3D  8   original image CRC
//   0x45  5   reserved (zero)
//   0x4A  4   modified image length (u32 LE)
//   0x4E      diff records

use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use super::decoder::DecodeError;

// ---------------------------------------------------------------------------
// Magic, sizes
// ---------------------------------------------------------------------------

pub const APS_MAGIC: [u8; 7] = *b"APS10\x01\x00";

/// Format type byte written by this encoder (big-endian image).
pub const FORMAT_IMAGE: u8 = 0x01;

/// Format type byte other N64 tools write for a byte-swapped (V64) source.
pub const FORMAT_BYTE_SWAPPED: u8 = 0x00;

pub const DESCRIPTION_LEN: usize = 50;
pub const CART_ID_LEN: usize = 3;
pub const CRC_LEN: usize = 8;
pub const RESERVED_LEN: usize = 5;

/// Total header length; also the offset of the first diff record.
pub const HEADER_LEN: usize = 0x4E;

pub const BLANK_DESCRIPTION: [u8; DESCRIPTION_LEN] = [b' '; DESCRIPTION_LEN];

// ---------------------------------------------------------------------------
// Patch offsets
// ---------------------------------------------------------------------------

pub const PATCH_DESCRIPTION_OFFSET: usize = 0x07;
pub const PATCH_FORMAT_OFFSET: usize = 0x39;
pub const PATCH_CART_ID_OFFSET: usize = 0x3A;
pub const PATCH_CRC_OFFSET: usize = 0x3D;
pub const PATCH_RESERVED_OFFSET: usize = 0x45;
pub const PATCH_MODIFIED_LEN_OFFSET: usize = 0x4A;
pub const PATCH_BODY_OFFSET: usize = HEADER_LEN;

// ---------------------------------------------------------------------------
// Image offsets
// ---------------------------------------------------------------------------

pub const IMAGE_CRC_OFFSET: usize = 0x10;
pub const IMAGE_CART_ID_OFFSET: usize = 0x3C;

// ---------------------------------------------------------------------------
// Image fields
// ---------------------------------------------------------------------------

/// The 8-byte CRC carried at offset 0x10 of a cartridge image.
///
/// It is compared for equality only; nothing here recomputes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Crc(pub [u8; CRC_LEN]);

impl Crc {
    /// Read the CRC from an in-memory image. Bytes past the end of a short
    /// image read as zero.
    pub fn from_image(image: &[u8]) -> Self {
        let mut crc = [0u8; CRC_LEN];
        copy_padded(image, IMAGE_CRC_OFFSET, &mut crc);
        Self(crc)
    }

    /// Read the CRC from a seekable image stream, zero-padding a short image.
    pub fn read_from_image<R: Read + Seek>(r: &mut R) -> io::Result<Self> {
        let mut crc = [0u8; CRC_LEN];
        r.seek(SeekFrom::Start(IMAGE_CRC_OFFSET as u64))?;
        read_fully(r, &mut crc)?;
        Ok(Self(crc))
    }

    /// High half of the CRC, used to name patches.
    pub fn hi(&self) -> [u8; 4] {
        [self.0[0], self.0[1], self.0[2], self.0[3]]
    }

    pub fn as_bytes(&self) -> &[u8; CRC_LEN] {
        &self.0
    }
}

impl fmt::Display for Crc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// Three-byte cartridge identifier at offset 0x3C of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CartId(pub [u8; CART_ID_LEN]);

impl CartId {
    pub fn from_image(image: &[u8]) -> Self {
        let mut id = [0u8; CART_ID_LEN];
        copy_padded(image, IMAGE_CART_ID_OFFSET, &mut id);
        Self(id)
    }
}

impl fmt::Display for CartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

fn copy_padded(image: &[u8], offset: usize, out: &mut [u8]) {
    if offset >= image.len() {
        return;
    }
    let avail = &image[offset..];
    let n = out.len().min(avail.len());
    out[..n].copy_from_slice(&avail[..n]);
}

/// Read into `buf` until it is full or the stream ends. Returns the number
/// of bytes read; the unread tail of `buf` is left untouched.
pub(crate) fn read_fully<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Patch header
// ---------------------------------------------------------------------------

/// Parsed APS patch header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHeader {
    pub description: [u8; DESCRIPTION_LEN],
    /// Format type byte. Carried through untouched; apply never looks at it.
    pub format: u8,
    pub cart_id: CartId,
    /// CRC of the original image the patch was built against.
    pub crc: Crc,
    /// Length of the modified image the patch was built from.
    pub modified_len: u32,
}

impl PatchHeader {
    /// Build the header for a patch against `image`.
    pub fn for_image(image: &[u8], modified_len: u32) -> Self {
        Self {
            description: BLANK_DESCRIPTION,
            format: FORMAT_IMAGE,
            cart_id: CartId::from_image(image),
            crc: Crc::from_image(image),
            modified_len,
        }
    }

    /// Serialize to the fixed 78-byte layout.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[..APS_MAGIC.len()].copy_from_slice(&APS_MAGIC);
        buf[PATCH_DESCRIPTION_OFFSET..PATCH_FORMAT_OFFSET].copy_from_slice(&self.description);
        buf[PATCH_FORMAT_OFFSET] = self.format;
        buf[PATCH_CART_ID_OFFSET..PATCH_CRC_OFFSET].copy_from_slice(&self.cart_id.0);
        buf[PATCH_CRC_OFFSET..PATCH_RESERVED_OFFSET].copy_from_slice(&self.crc.0);
        // Reserved bytes stay zero.
        buf[PATCH_MODIFIED_LEN_OFFSET..HEADER_LEN].copy_from_slice(&self.modified_len.to_le_bytes());
        buf
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    /// Parse a header, rejecting a wrong magic.
    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Result<Self, DecodeError> {
        let mut magic = [0u8; APS_MAGIC.len()];
        magic.copy_from_slice(&buf[..APS_MAGIC.len()]);
        if magic != APS_MAGIC {
            return Err(DecodeError::InvalidMagic(magic));
        }

        let format = buf[PATCH_FORMAT_OFFSET];
        if format != FORMAT_IMAGE {
            log::warn!("non-standard APS format type {format:#04X} (expected {FORMAT_IMAGE:#04X})");
        }

        let mut description = [0u8; DESCRIPTION_LEN];
        description.copy_from_slice(&buf[PATCH_DESCRIPTION_OFFSET..PATCH_FORMAT_OFFSET]);
        let mut cart_id = [0u8; CART_ID_LEN];
        cart_id.copy_from_slice(&buf[PATCH_CART_ID_OFFSET..PATCH_CRC_OFFSET]);
        let mut crc = [0u8; CRC_LEN];
        crc.copy_from_slice(&buf[PATCH_CRC_OFFSET..PATCH_RESERVED_OFFSET]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&buf[PATCH_MODIFIED_LEN_OFFSET..HEADER_LEN]);

        Ok(Self {
            description,
            format,
            cart_id: CartId(cart_id),
            crc: Crc(crc),
            modified_len: u32::from_le_bytes(len),
        })
    }

    /// Read and parse a header from the start of a patch stream.
    pub fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut buf = [0u8; HEADER_LEN];
        let n = read_fully(r, &mut buf)?;
        if n < HEADER_LEN {
            return Err(DecodeError::Truncated {
                what: "header",
                offset: n as u64,
            });
        }
        Self::from_bytes(&buf)
    }

    /// Description with trailing padding removed.
    pub fn description_text(&self) -> Cow<'_, str> {
        let end = self
            .description
            .iter()
            .rposition(|&b| b != b' ' && b != 0)
            .map_or(0, |i| i + 1);
        String::from_utf8_lossy(&self.description[..end])
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_image() -> Vec<u8> {
        let mut image = vec![0u8; 0x40];
        image[IMAGE_CRC_OFFSET..IMAGE_CRC_OFFSET + CRC_LEN]
            .copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11]);
        image[IMAGE_CART_ID_OFFSET..IMAGE_CART_ID_OFFSET + CART_ID_LEN].copy_from_slice(b"NSM");
        image
    }

    #[test]
    fn offsets_are_contiguous() {
        assert_eq!(PATCH_DESCRIPTION_OFFSET, APS_MAGIC.len());
        assert_eq!(PATCH_FORMAT_OFFSET, PATCH_DESCRIPTION_OFFSET + DESCRIPTION_LEN);
        assert_eq!(PATCH_CART_ID_OFFSET, PATCH_FORMAT_OFFSET + 1);
        assert_eq!(PATCH_CRC_OFFSET, PATCH_CART_ID_OFFSET + CART_ID_LEN);
        assert_eq!(PATCH_RESERVED_OFFSET, PATCH_CRC_OFFSET + CRC_LEN);
        assert_eq!(PATCH_MODIFIED_LEN_OFFSET, PATCH_RESERVED_OFFSET + RESERVED_LEN);
        assert_eq!(HEADER_LEN, PATCH_MODIFIED_LEN_OFFSET + 4);
        assert_eq!(HEADER_LEN, 78);
    }

    #[test]
    fn header_layout_is_byte_exact() {
        let hdr = PatchHeader::for_image(&sample_image(), 0x0102_0304);
        let buf = hdr.to_bytes();

        assert_eq!(&buf[..7], b"APS10\x01\x00");
        assert!(buf[0x07..0x39].iter().all(|&b| b == b' '));
        assert_eq!(buf[0x39], 0x01);
        assert_eq!(&buf[0x3A..0x3D], b"NSM");
        assert_eq!(
            &buf[0x3D..0x45],
            &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11]
        );
        assert_eq!(&buf[0x45..0x4A], &[0, 0, 0, 0, 0]);
        assert_eq!(&buf[0x4A..0x4E], &[0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn header_roundtrip() {
        let hdr = PatchHeader::for_image(&sample_image(), 4096);
        let mut buf = Vec::new();
        hdr.encode(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_LEN);

        let decoded = PatchHeader::decode(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, hdr);
        assert_eq!(decoded.description_text(), "");
    }

    #[test]
    fn short_image_fields_read_as_zero() {
        let image = [0x55u8; 0x12];
        let crc = Crc::from_image(&image);
        assert_eq!(crc.0, [0x55, 0x55, 0, 0, 0, 0, 0, 0]);
        assert_eq!(CartId::from_image(&image).0, [0, 0, 0]);
        assert_eq!(Crc::from_image(&[]).0, [0u8; 8]);
    }

    #[test]
    fn crc_from_stream_matches_slice() {
        let image = sample_image();
        let from_stream = Crc::read_from_image(&mut Cursor::new(&image)).unwrap();
        assert_eq!(from_stream, Crc::from_image(&image));

        let short = Crc::read_from_image(&mut Cursor::new(&image[..0x13])).unwrap();
        assert_eq!(short.0, [0xAA, 0xBB, 0xCC, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn crc_display_is_uppercase_hex() {
        let crc = Crc([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11]);
        assert_eq!(crc.to_string(), "AABBCCDDEEFF0011");
        assert_eq!(crc.hi(), [0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn reject_bad_magic() {
        let mut buf = PatchHeader::for_image(&sample_image(), 0).to_bytes();
        buf[0] = b'X';
        assert!(matches!(
            PatchHeader::from_bytes(&buf),
            Err(DecodeError::InvalidMagic(_))
        ));
    }

    #[test]
    fn byte_swapped_format_type_is_kept() {
        let mut buf = PatchHeader::for_image(&sample_image(), 0).to_bytes();
        buf[PATCH_FORMAT_OFFSET] = FORMAT_BYTE_SWAPPED;

        let hdr = PatchHeader::from_bytes(&buf).unwrap();
        assert_eq!(hdr.format, FORMAT_BYTE_SWAPPED);
        assert_eq!(hdr.to_bytes(), buf);
    }

    #[test]
    fn truncated_header() {
        let buf = PatchHeader::for_image(&sample_image(), 0).to_bytes();
        let err = PatchHeader::decode(&mut Cursor::new(&buf[..40])).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                what: "header",
                offset: 40
            }
        ));
    }

    #[test]
    fn cart_id_display_masks_non_printable() {
        assert_eq!(CartId(*b"NSM").to_string(), "NSM");
        assert_eq!(CartId([b'Z', 0x00, b'E']).to_string(), "Z.E");
    }
}
