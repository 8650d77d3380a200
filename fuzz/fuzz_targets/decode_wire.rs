#![no_main]

use libfuzzer_sys::fuzz_target;
use mcuload_core::wire::{Reply, Request};

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 64 * 1024 {
        &data[..64 * 1024]
    } else {
        data
    };

    // Whatever decodes must survive a re-encode.
    if let Ok(req) = Request::decode(data) {
        if let Ok(bytes) = req.encode() {
            assert!(Request::decode(&bytes).is_ok());
        }
    }
    if let Ok(reply) = Reply::decode(data) {
        assert!(Reply::decode(&reply.encode()).is_ok());
    }
});
