//! Fuzz target for consensus message parsing.
//!
//! Feeds arbitrary payloads through the consensus channel decoder and runs the
//! signature and block checks a validator applies before logging a message.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pbft_consensus::ConsensusMessage;
use pbft_network::{Envelope, EnvelopeType, CONSENSUS_CHANNEL};

fuzz_target!(|data: &[u8]| {
    let envelope = Envelope::new(CONSENSUS_CHANNEL, EnvelopeType::Consensus, data.to_vec());
    let Ok(msg) = ConsensusMessage::from_envelope(&envelope) else {
        return;
    };

    let _ = msg.info().verify_signature();
    if let ConsensusMessage::Generic(generic) = &msg {
        for info in &generic.other_infos {
            let _ = info.verify_signature();
        }
        if let Some(block) = &generic.block {
            let _ = block.id();
            let _ = block.verify_roots();
        }
    }

    let _ = msg.to_envelope();
});
