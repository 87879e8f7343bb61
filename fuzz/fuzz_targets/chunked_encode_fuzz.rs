#![no_main]
use libfuzzer_sys::fuzz_target;
use apspatch::aps::encoder::{self, PatchEncoder};

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    // First byte picks the chunk size, second the original/modified split.
    let chunk = 1 + data[0] as usize;
    let payload = &data[2..];
    let split = data[1] as usize % payload.len();
    let (original, modified) = payload.split_at(split);

    let mut whole = Vec::new();
    encoder::encode_all(&mut whole, original, modified).unwrap();

    // Feeding the modified image in pieces must not change the output.
    let mut enc = PatchEncoder::new(Vec::new(), original, modified.len() as u64).unwrap();
    for piece in modified.chunks(chunk) {
        enc.write_modified(piece).unwrap();
    }
    let (chunked, _) = enc.finish().unwrap();
    assert_eq!(chunked, whole);
});
