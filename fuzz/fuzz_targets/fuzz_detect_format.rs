#![no_main]
use cardstore_rs::detect_format;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 6 {
        return;
    }
    let capacity = u16::from_be_bytes([data[0], data[1]]) as usize;
    if let Some(detection) = detect_format(&data[2..], capacity) {
        assert!(detection.primary.length == 0 || detection.primary.total_size() <= capacity);
    }
});
