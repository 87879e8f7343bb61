#![no_main]
use libfuzzer_sys::fuzz_target;
use apspatch::aps::decoder::{self, ApplyOptions};
use apspatch::aps::encoder;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let split = 1 + (data[0] as usize % (data.len() - 1));
    let original = &data[1..split];
    let modified = &data[split..];

    let mut patch = Vec::new();
    encoder::encode_all(&mut patch, original, modified).unwrap();

    let opts = ApplyOptions {
        resize: true,
        overwrite: false,
    };
    let restored = decoder::apply_all(original, &patch, &opts).unwrap();
    assert_eq!(restored, modified);
});
