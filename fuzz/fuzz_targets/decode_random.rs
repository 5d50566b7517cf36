#![no_main]

use libfuzzer_sys::fuzz_target;

// Feed the decoder arbitrary bytes; it must never panic, only produce
// output or report a full buffer.
fuzz_target!(|data: &[u8]| {
    let mut decompressed = vec![0; 4096];
    let _ = bitpress::decoder::decode(data, &mut decompressed, 64, 8, 4);
    let _ = bitpress::decoder::decode(data, &mut decompressed, 1, 11, 9);
});
