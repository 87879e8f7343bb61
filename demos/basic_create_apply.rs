use apspatch::aps::decoder::{self, ApplyOptions};
use apspatch::aps::encoder;
use apspatch::aps::identify::PatchId;
use apspatch::aps::read_patch;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut original = vec![0u8; 4096];
    original[0x10..0x18].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04]);
    original[0x3C..0x3F].copy_from_slice(b"NSM");

    let mut modified = original.clone();
    modified[0x200..0x210].fill(0xFF);
    modified[0x400] = 0x7A;

    let mut patch = Vec::new();
    let stats = encoder::encode_all(&mut patch, &original, &modified)?;

    let restored = decoder::apply_all(&original, &patch, &ApplyOptions::default())?;
    assert_eq!(restored, modified);

    let (header, records) = read_patch(patch.as_slice())?;
    println!(
        "image {} bytes -> patch {} bytes ({} records) -> restored {} bytes",
        modified.len(),
        stats.patch_len,
        records.len(),
        restored.len()
    );
    println!(
        "cart {} crc {} canonical name {}",
        header.cart_id,
        header.crc,
        PatchId::from_crc(&header.crc).file_name()
    );

    Ok(())
}
