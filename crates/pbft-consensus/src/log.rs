//! Message log.
//!
//! Verified votes and block candidates, keyed by (height, view). Each signer
//! contributes at most one vote per type per key, and each key keeps a single
//! best block candidate.

use crate::block::Block;
use crate::crypto::PublicKey;
use crate::message::{MessageInfo, MessageType};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Default)]
struct Entry {
    messages: HashMap<MessageType, HashMap<PublicKey, MessageInfo>>,
    block: Option<Block>,
}

/// Per-(height, view) storage of votes and block candidates.
#[derive(Debug, Default)]
pub struct MessageLog {
    entries: BTreeMap<(u64, u64), Entry>,
}

impl MessageLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a vote. Returns true if no vote of this type from this signer
    /// was logged for its (height, view) yet.
    pub fn add_message(&mut self, info: MessageInfo) -> bool {
        let by_signer = self
            .entries
            .entry((info.height, info.view))
            .or_default()
            .messages
            .entry(info.msg_type)
            .or_default();

        if by_signer.contains_key(&info.signer) {
            return false;
        }
        by_signer.insert(info.signer.clone(), info);
        true
    }

    /// Offers a block candidate. Returns true if the stored candidate improved.
    ///
    /// The first candidate is always stored. The same block arriving again
    /// contributes any signatures the stored copy lacks. A different block
    /// replaces the stored one only if it carries strictly more signatures.
    pub fn add_block(&mut self, height: u64, view: u64, block: Block) -> bool {
        let entry = self.entries.entry((height, view)).or_default();
        match &mut entry.block {
            None => {
                entry.block = Some(block);
                true
            }
            Some(current) if current.id() == block.id() => current.merge_sign_pairs(&block) > 0,
            Some(current) => {
                if block.signature_count() > current.signature_count() {
                    *current = block;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Returns all votes of a type for a (height, view), keyed by signer.
    pub fn find_by_type(
        &self,
        height: u64,
        view: u64,
        msg_type: MessageType,
    ) -> Option<&HashMap<PublicKey, MessageInfo>> {
        self.entries.get(&(height, view))?.messages.get(&msg_type)
    }

    /// Returns the number of distinct signers of a vote type.
    pub fn count(&self, height: u64, view: u64, msg_type: MessageType) -> usize {
        self.find_by_type(height, view, msg_type)
            .map_or(0, HashMap::len)
    }

    /// Returns one signer's vote of a type.
    pub fn find_by_signer(
        &self,
        height: u64,
        view: u64,
        msg_type: MessageType,
        signer: &PublicKey,
    ) -> Option<&MessageInfo> {
        self.find_by_type(height, view, msg_type)?.get(signer)
    }

    /// Returns the best block candidate.
    pub fn find_block(&self, height: u64, view: u64) -> Option<&Block> {
        self.entries.get(&(height, view))?.block.as_ref()
    }

    /// Drops every entry more than `retain` heights below `current_height`.
    ///
    /// Returns the number of (height, view) entries removed.
    pub fn garbage_collect(&mut self, current_height: u64, retain: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|&(height, _), _| height.saturating_add(retain) >= current_height);
        before - self.entries.len()
    }

    /// Returns the number of (height, view) entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is logged.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
