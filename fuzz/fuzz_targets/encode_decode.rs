#![no_main]

use libfuzzer_sys::fuzz_target;

// Round-trip arbitrary input through the codec and require the exact
// original bytes back. The first two input bytes pick the configuration
// so the fuzzer also explores window/lookahead combinations.
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    let window_sz2 = 4 + (data[0] % 12);
    let lookahead_sz2 = 3 + (data[1] % (window_sz2 - 2));
    let data = &data[2..];

    // Worst case is one tag bit per literal plus final padding.
    let mut compressed = vec![0; data.len() + data.len() / 8 + 16];
    let mut decompressed = vec![0; data.len() + 1];

    let compressed = bitpress::encoder::encode(data, &mut compressed, window_sz2, lookahead_sz2)
        .expect("encoding failed");
    let decompressed = bitpress::decoder::decode(
        compressed,
        &mut decompressed,
        256,
        window_sz2,
        lookahead_sz2,
    )
    .expect("decoding failed");

    assert_eq!(data, decompressed);
});
