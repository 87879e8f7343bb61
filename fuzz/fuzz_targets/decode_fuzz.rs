#![no_main]
use libfuzzer_sys::fuzz_target;
use apspatch::aps::decoder::{self, ApplyOptions};

// Records may address up to 4 GiB; keep in-memory application bounded.
const MAX_OUTPUT: u64 = 1 << 20;

fuzz_target!(|data: &[u8]| {
    // Arbitrary patch bytes must only ever produce errors, never panics.
    let Ok((header, records)) = decoder::read_patch(data) else {
        return;
    };
    if u64::from(header.modified_len) > MAX_OUTPUT || records.iter().any(|r| r.end() > MAX_OUTPUT) {
        return;
    }

    let _ = decoder::apply_all(&[], data, &ApplyOptions::default());

    // Image carrying the patch's own CRC so validation passes and every
    // record is applied.
    let mut image = vec![0u8; 0x40];
    image[0x10..0x18].copy_from_slice(&header.crc.0);
    let out = decoder::apply_all(&image, data, &ApplyOptions { resize: true, overwrite: false })
        .expect("validated patch must apply");
    assert_eq!(out.len(), header.modified_len as usize);
});
