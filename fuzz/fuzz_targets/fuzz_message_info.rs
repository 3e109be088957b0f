//! Fuzz target for vote signature checks.
//!
//! Builds structurally valid votes with arbitrary keys and signatures and
//! checks that verification rejects them without panicking.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use pbft_consensus::{MessageInfo, MessageType, PublicKey, Signature};

#[derive(Debug, Arbitrary)]
struct Vote {
    kind: u8,
    view: u64,
    height: u64,
    signer: String,
    signature: String,
}

fuzz_target!(|vote: Vote| {
    let msg_type = match vote.kind % 5 {
        0 => MessageType::NewBlockProposal,
        1 => MessageType::PrePrepare,
        2 => MessageType::Prepare,
        3 => MessageType::Commit,
        _ => MessageType::ViewChange,
    };
    let info = MessageInfo {
        msg_type,
        view: vote.view,
        height: vote.height,
        signer: PublicKey::from_hex(vote.signer),
        signature: Signature::from_hex(vote.signature),
    };
    let _ = info.verify_signature();
});
