#![no_main]

use libfuzzer_sys::fuzz_target;
use mcuload_core::wire::Reply;
use mcuload_core::SimulatedDevice;

// Feeds a stream of length-prefixed requests to the simulated device; every
// reply must decode.
fuzz_target!(|data: &[u8]| {
    let mut device = SimulatedDevice::new().with_capacity(4096);
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let n = usize::from(len).min(tail.len());
        let (msg, next) = tail.split_at(n);
        let reply = device.handle(msg);
        assert!(Reply::decode(&reply).is_ok());
        rest = next;
    }
});
