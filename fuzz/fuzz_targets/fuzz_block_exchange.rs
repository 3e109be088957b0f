//! Fuzz target for block sync payloads.
//!
//! Tests that block requests and responses decode without panicking and that
//! a decoded block can be stripped to its header.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pbft_consensus::{BlockRequest, BlockResponse};

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<BlockRequest>(data);

    if let Ok(response) = serde_json::from_slice::<BlockResponse>(data) {
        let header = response.block.header_only();
        assert_eq!(header.id(), response.block.id());
        assert_eq!(header.tx_count(), 0);
        let _ = response.block.verify_roots();
    }
});
