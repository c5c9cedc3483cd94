#![no_main]
use cardstore_rs::{decode, get_metadata, Block, MediaProfile, Result};
use libfuzzer_sys::fuzz_target;

// Arbitrary medium contents must decode or fail cleanly, never panic
fuzz_target!(|data: &[u8]| {
    let profile = if data.len() > 1024 {
        MediaProfile::CLASSIC_4K
    } else {
        MediaProfile::CLASSIC_1K
    };

    let mut reader = |index: u32| -> Result<Block> {
        let mut block = [0u8; 16];
        let offset = index as usize * 16;
        if let Some(chunk) = data.get(offset..) {
            let len = chunk.len().min(16);
            block[..len].copy_from_slice(&chunk[..len]);
        }
        Ok(block)
    };

    let start = data.first().map_or(1, |&b| b as u32 % profile.total_blocks);
    let _ = decode(&mut reader, start, &profile);
    let _ = get_metadata(&mut reader, start, &profile, 64);
});
