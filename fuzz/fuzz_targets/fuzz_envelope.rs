//! Fuzz target for wire envelope parsing.
//!
//! Tests that the envelope decoder handles arbitrary input without panicking,
//! and that anything it accepts survives a re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pbft_network::Envelope;

fuzz_target!(|data: &[u8]| {
    if let Ok(envelope) = Envelope::decode(data) {
        let bytes = envelope.encode().expect("decoded envelope must encode");
        let again = Envelope::decode(&bytes).expect("encoded envelope must decode");
        assert_eq!(envelope, again);
    }
});
