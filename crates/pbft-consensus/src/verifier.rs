//! Stateless message and block checks.
//!
//! Everything that enters the message log or the commit path goes through
//! here first. Checks fail closed: any mismatch rejects the whole message.

use crate::block::{Block, SignPair};
use crate::chain::Chain;
use crate::error::{ConsensusError, Result};
use crate::message::{ConsensusMessage, MessageInfo, MessageType};
use crate::validator::ValidatorSet;
use std::collections::HashSet;
use std::sync::Arc;

/// Signature, membership and quorum checks against the fixed validator set.
pub struct Verifier {
    validators: Arc<ValidatorSet>,
    genesis: Block,
    chain: Chain,
}

impl Verifier {
    /// Creates a verifier.
    ///
    /// `genesis` is the locally derived genesis block; height-0 blocks are
    /// compared against it instead of being signature-checked.
    pub fn new(validators: Arc<ValidatorSet>, genesis: Block, chain: Chain) -> Self {
        Self {
            validators,
            genesis,
            chain,
        }
    }

    /// Returns the validator set.
    pub fn validators(&self) -> &Arc<ValidatorSet> {
        &self.validators
    }

    /// Checks that an info is signed by a validator.
    pub fn verify_info(&self, info: &MessageInfo) -> Result<()> {
        if !self.validators.contains(&info.signer) {
            return Err(ConsensusError::UnknownSigner(info.signer.to_string()));
        }
        info.verify_signature()
    }

    /// Checks a consensus message, its piggy-backed infos and any attached block.
    pub fn verify_message(&self, msg: &ConsensusMessage) -> Result<()> {
        match msg {
            ConsensusMessage::Generic(generic) => {
                if generic.info.msg_type == MessageType::ViewChange {
                    return Err(ConsensusError::MalformedMessage(
                        "view change sent as generic message".into(),
                    ));
                }
                self.verify_info(&generic.info)?;
                for other in &generic.other_infos {
                    if other.signer != generic.info.signer {
                        return Err(ConsensusError::MalformedMessage(
                            "piggy-backed info from a different signer".into(),
                        ));
                    }
                    self.verify_info(other)?;
                }
                if let Some(block) = &generic.block {
                    self.verify_block(block)?;
                }
                Ok(())
            }
            ConsensusMessage::ViewChange(view_change) => {
                if view_change.info.msg_type != MessageType::ViewChange {
                    return Err(ConsensusError::MalformedMessage(format!(
                        "{} sent as view change",
                        view_change.info.msg_type
                    )));
                }
                self.verify_info(&view_change.info)
            }
        }
    }

    /// Checks a block's id, proposer signature and contents.
    ///
    /// A block for the next height is re-executed against the current ledger
    /// and must reproduce its receipts. Blocks further ahead cannot be
    /// executed yet, so only their transaction signatures, internal
    /// duplicates and receipt ids are checked; the commit path re-executes
    /// them when their turn comes.
    pub fn verify_block(&self, block: &Block) -> Result<()> {
        if block.height() == 0 {
            return self.verify_genesis(block, false);
        }
        self.verify_proposer(block)?;
        self.verify_contents(block)
    }

    /// Checks a block and that it carries a quorum of signatures.
    pub fn verify_quorum_block(&self, block: &Block) -> Result<()> {
        if block.height() == 0 {
            return self.verify_genesis(block, false);
        }
        self.verify_block(block)?;
        self.verify_quorum(block)
    }

    /// Checks a header-only block: id, proposer signature and quorum.
    pub fn verify_block_header(&self, block: &Block) -> Result<()> {
        if block.height() == 0 {
            return self.verify_genesis(block, true);
        }
        self.verify_proposer(block)?;
        self.verify_quorum(block)
    }

    /// Returns the distinct replica signatures that verify, proposer excluded.
    pub fn valid_sign_pairs(&self, block: &Block) -> Vec<SignPair> {
        let id = block.id();
        let mut seen = HashSet::new();
        block
            .sign_pairs
            .iter()
            .filter(|pair| {
                pair.signer != block.signer
                    && self.validators.contains(&pair.signer)
                    && !seen.contains(&pair.signer)
                    && pair.signer.verify(id.as_bytes(), &pair.signature).is_ok()
                    && seen.insert(pair.signer.clone())
            })
            .cloned()
            .collect()
    }

    fn verify_genesis(&self, block: &Block, header_only: bool) -> Result<()> {
        let matches = if header_only {
            block.header_only() == self.genesis.header_only()
        } else {
            *block == self.genesis
        };
        if matches {
            Ok(())
        } else {
            Err(ConsensusError::InvalidBlock("genesis mismatch".into()))
        }
    }

    fn verify_proposer(&self, block: &Block) -> Result<()> {
        if block.header.id() != block.id() {
            return Err(ConsensusError::InvalidBlock(format!(
                "{}: id does not match header",
                block.id()
            )));
        }
        if !self.validators.contains(&block.signer) {
            return Err(ConsensusError::UnknownSigner(block.signer.to_string()));
        }
        block.signer.verify(block.id().as_bytes(), &block.signature)
    }

    fn verify_contents(&self, block: &Block) -> Result<()> {
        if block.receipts.len() != block.transactions.len() {
            return Err(ConsensusError::InvalidBlock(format!(
                "{}: {} receipts for {} transactions",
                block.id(),
                block.receipts.len(),
                block.transactions.len()
            )));
        }
        if !block.verify_roots() {
            return Err(ConsensusError::InvalidBlock(format!(
                "{}: merkle root mismatch",
                block.id()
            )));
        }
        for (tx, receipt) in block.transactions.iter().zip(&block.receipts) {
            if receipt.tx_id != tx.id() {
                return Err(ConsensusError::InvalidBlock(format!(
                    "{}: receipt for {} does not match transaction {}",
                    block.id(),
                    receipt.tx_id,
                    tx.id()
                )));
            }
        }

        let head = self.chain.state();
        if block.height() == head.height + 1 {
            if block.previous() != head.block_id {
                return Err(ConsensusError::ParentMismatch {
                    expected: head.block_id.to_hex(),
                    actual: block.previous().to_hex(),
                });
            }
            let results = self.chain.executor().dry_run(&block.transactions);
            for (result, receipt) in results.into_iter().zip(&block.receipts) {
                if result? != *receipt {
                    return Err(ConsensusError::InvalidBlock(format!(
                        "{}: receipt mismatch for {}",
                        block.id(),
                        receipt.tx_id
                    )));
                }
            }
        } else {
            let mut seen = HashSet::new();
            for tx in &block.transactions {
                tx.verify()?;
                if !seen.insert(tx.id()) {
                    return Err(ConsensusError::DuplicateTransaction(tx.id().to_hex()));
                }
            }
        }

        Ok(())
    }

    fn verify_quorum(&self, block: &Block) -> Result<()> {
        let have = self.valid_sign_pairs(block).len() + 1;
        let need = self.validators.quorum();
        if have < need {
            return Err(ConsensusError::InsufficientQuorum { have, need });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Verifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Verifier")
            .field("validators", &self.validators.len())
            .field("genesis", &self.genesis.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockId;
    use crate::crypto::Keypair;
    use crate::execution::{Executor, Ledger};
    use crate::genesis::generate_devnet_genesis;
    use crate::mempool::Mempool;
    use crate::message::{GenericMessage, ViewChangeMessage};
    use crate::store::MemoryChainStore;
    use crate::transaction::{Address, Transaction};

    struct Fixture {
        verifier: Verifier,
        keys: Vec<Keypair>,
        ledger: Arc<Ledger>,
        genesis: Block,
    }

    fn fixture() -> Fixture {
        let (genesis_cfg, keys) = generate_devnet_genesis(4).unwrap();
        let genesis = genesis_cfg.block();
        let ledger = Arc::new(Ledger::with_balances(genesis_cfg.balances()));
        let chain = Chain::new(
            Arc::new(MemoryChainStore::new(genesis.clone())),
            ledger.clone(),
            Arc::new(Mempool::with_defaults()),
        );
        let validators = Arc::new(genesis_cfg.validator_set().unwrap());
        Fixture {
            verifier: Verifier::new(validators, genesis.clone(), chain),
            keys,
            ledger,
            genesis,
        }
    }

    fn proposal(f: &Fixture, height: u64, txs: Vec<Transaction>) -> Block {
        let receipts = f.ledger.dry_run(&txs).into_iter().map(|r| r.unwrap()).collect();
        let previous = if height == 1 {
            f.genesis.id()
        } else {
            BlockId::from_bytes([3; 32])
        };
        let mut block = Block::new(height, previous, 10, 0, txs, receipts);
        block.sign_as_primary(&f.keys[1]);
        block
    }

    fn transfer(f: &Fixture, amount: u64, nonce: u64) -> Transaction {
        let to = Address::from_public_key(&f.keys[3].public_key()).unwrap();
        Transaction::transfer(&f.keys[0], to, amount, nonce, 0).unwrap()
    }

    #[test]
    fn test_untampered_block_verifies() {
        let f = fixture();
        let block = proposal(&f, 1, vec![transfer(&f, 5, 0)]);
        assert!(f.verifier.verify_block(&block).is_ok());
    }

    #[test]
    fn test_header_tampering_detected() {
        let f = fixture();
        let block = proposal(&f, 1, vec![transfer(&f, 5, 0)]);

        let mutations: Vec<Box<dyn Fn(&mut Block)>> = vec![
            Box::new(|b| b.header.height += 1),
            Box::new(|b| b.header.timestamp += 1),
            Box::new(|b| b.header.previous = BlockId::from_bytes([9; 32])),
            Box::new(|b| b.header.tx_root[0] ^= 1),
            Box::new(|b| b.header.receipt_root[0] ^= 1),
        ];

        for mutate in mutations {
            let mut tampered = block.clone();
            mutate(&mut tampered);
            assert!(f.verifier.verify_block(&tampered).is_err());

            // Even with a recomputed id the proposer signature no longer matches.
            tampered.id = tampered.header.id();
            assert!(f.verifier.verify_block(&tampered).is_err());
        }
    }

    #[test]
    fn test_wrong_parent_rejected_for_next_height() {
        let f = fixture();
        let mut block = Block::new(1, BlockId::from_bytes([7; 32]), 10, 0, vec![], vec![]);
        block.sign_as_primary(&f.keys[1]);

        assert!(matches!(
            f.verifier.verify_block(&block),
            Err(ConsensusError::ParentMismatch { .. })
        ));
    }

    #[test]
    fn test_receipt_mismatch_rejected_for_next_height() {
        let f = fixture();
        let tx = transfer(&f, 5, 0);
        let mut receipts = f.ledger.dry_run(&[tx.clone()]).into_iter().map(|r| r.unwrap()).collect::<Vec<_>>();
        receipts[0].sender_balance += 1;
        let mut block = Block::new(1, f.genesis.id(), 10, 0, vec![tx], receipts);
        block.sign_as_primary(&f.keys[1]);

        assert!(matches!(
            f.verifier.verify_block(&block),
            Err(ConsensusError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_overspend_rejected_for_next_height() {
        let f = fixture();
        let tx = transfer(&f, 10_000_000, 0);
        let receipt = crate::transaction::Receipt {
            tx_id: tx.id(),
            sender_balance: 0,
            recipient_balance: 0,
        };
        let mut block = Block::new(1, f.genesis.id(), 10, 0, vec![tx], vec![receipt]);
        block.sign_as_primary(&f.keys[1]);

        assert!(matches!(
            f.verifier.verify_block(&block),
            Err(ConsensusError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_future_block_checks_duplicates() {
        let f = fixture();
        let tx = transfer(&f, 5, 0);
        let receipt = crate::transaction::Receipt {
            tx_id: tx.id(),
            sender_balance: 0,
            recipient_balance: 0,
        };
        let mut block = Block::new(
            3,
            BlockId::from_bytes([3; 32]),
            10,
            0,
            vec![tx.clone(), tx],
            vec![receipt.clone(), receipt],
        );
        block.sign_as_primary(&f.keys[1]);

        assert!(matches!(
            f.verifier.verify_block(&block),
            Err(ConsensusError::DuplicateTransaction(_))
        ));
    }

    #[test]
    fn test_non_validator_proposer_rejected() {
        let f = fixture();
        let mut block = proposal(&f, 1, vec![]);
        block.sign_as_primary(&Keypair::from_seed(77));
        assert!(matches!(
            f.verifier.verify_block(&block),
            Err(ConsensusError::UnknownSigner(_))
        ));
    }

    #[test]
    fn test_quorum_counting() {
        let f = fixture();
        let mut block = proposal(&f, 1, vec![]);

        // Primary alone: 1 of 3.
        assert!(matches!(
            f.verifier.verify_quorum_block(&block),
            Err(ConsensusError::InsufficientQuorum { have: 1, need: 3 })
        ));

        block.countersign(&f.keys[2]);
        // Duplicate pair and a non-validator pair do not count.
        let dup = block.sign_pairs[0].clone();
        block.sign_pairs.push(dup);
        block.countersign(&Keypair::from_seed(50));
        assert!(matches!(
            f.verifier.verify_quorum_block(&block),
            Err(ConsensusError::InsufficientQuorum { have: 2, need: 3 })
        ));

        block.countersign(&f.keys[3]);
        assert!(f.verifier.verify_quorum_block(&block).is_ok());
        assert_eq!(f.verifier.valid_sign_pairs(&block).len(), 2);
    }

    #[test]
    fn test_forged_sign_pair_ignored() {
        let f = fixture();
        let mut block = proposal(&f, 1, vec![]);
        block.countersign(&f.keys[2]);
        block.sign_pairs.push(SignPair {
            signer: f.keys[3].public_key(),
            signature: f.keys[3].sign(b"something else"),
        });

        assert_eq!(f.verifier.valid_sign_pairs(&block).len(), 1);
        assert!(f.verifier.verify_quorum_block(&block).is_err());
    }

    #[test]
    fn test_header_only_verification() {
        let f = fixture();
        let mut block = proposal(&f, 1, vec![transfer(&f, 5, 0)]);
        block.countersign(&f.keys[2]);
        block.countersign(&f.keys[3]);

        let header = block.header_only();
        assert!(f.verifier.verify_block_header(&header).is_ok());
        // Contents are gone, so full verification fails.
        assert!(f.verifier.verify_quorum_block(&header).is_err());
    }

    #[test]
    fn test_genesis_by_equality() {
        let f = fixture();
        assert!(f.verifier.verify_quorum_block(&f.genesis).is_ok());
        assert!(f.verifier.verify_block_header(&f.genesis.header_only()).is_ok());

        let other = Block::genesis(12345);
        assert!(f.verifier.verify_quorum_block(&other).is_err());
        assert!(f.verifier.verify_block_header(&other).is_err());
    }

    #[test]
    fn test_verify_message_checks_signers() {
        let f = fixture();
        let info = MessageInfo::signed(&f.keys[0], MessageType::Prepare, 1, 0);
        assert!(f.verifier.verify_message(&ConsensusMessage::vote(info)).is_ok());

        let outsider = MessageInfo::signed(&Keypair::from_seed(66), MessageType::Prepare, 1, 0);
        assert!(matches!(
            f.verifier.verify_message(&ConsensusMessage::vote(outsider)),
            Err(ConsensusError::UnknownSigner(_))
        ));
    }

    #[test]
    fn test_verify_message_rejects_bad_piggyback_and_block() {
        let f = fixture();
        let msg = ConsensusMessage::Generic(GenericMessage {
            info: MessageInfo::signed(&f.keys[1], MessageType::PrePrepare, 1, 0),
            other_infos: vec![MessageInfo::signed(&f.keys[2], MessageType::Prepare, 1, 0)],
            block: None,
        });
        assert!(matches!(
            f.verifier.verify_message(&msg),
            Err(ConsensusError::MalformedMessage(_))
        ));

        let mut block = proposal(&f, 1, vec![]);
        block.header.timestamp += 1;
        let msg = ConsensusMessage::Generic(GenericMessage {
            info: MessageInfo::signed(&f.keys[1], MessageType::PrePrepare, 1, 0),
            other_infos: vec![],
            block: Some(block),
        });
        assert!(f.verifier.verify_message(&msg).is_err());
    }

    #[test]
    fn test_verify_message_type_arms() {
        let f = fixture();
        let vc = MessageInfo::signed(&f.keys[0], MessageType::ViewChange, 1, 0);
        assert!(f
            .verifier
            .verify_message(&ConsensusMessage::ViewChange(ViewChangeMessage { info: vc.clone() }))
            .is_ok());
        assert!(f.verifier.verify_message(&ConsensusMessage::vote(vc)).is_err());

        let commit = MessageInfo::signed(&f.keys[0], MessageType::Commit, 1, 0);
        assert!(f
            .verifier
            .verify_message(&ConsensusMessage::ViewChange(ViewChangeMessage { info: commit }))
            .is_err());
    }
}
