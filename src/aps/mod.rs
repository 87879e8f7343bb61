// APS patch format implementation.
//
// # Modules
//
// - `header`   Fixed 78-byte patch header and the image fields it copies
// - `record`   Literal / run-length record framing and the record reader
// - `encoder`  Streaming diff encoder (CREATE)
// - `decoder`  CRC validation and record application (APPLY)
// - `identify` Patch naming from the embedded CRC (RENAME)

pub mod decoder;
pub mod encoder;
pub mod header;
pub mod identify;
pub mod record;

// Re-export key types for convenience.
pub use decoder::{ApplyOptions, DecodeError, PatchDecoder, apply_all, read_patch};
pub use encoder::{EncodeError, EncodeStats, PatchEncoder, encode_all};
pub use header::{APS_MAGIC, CartId, Crc, HEADER_LEN, PatchHeader};
pub use identify::{PATCH_EXTENSION, PatchId, identify};
pub use record::{Record, RecordReader, RecordStats};
