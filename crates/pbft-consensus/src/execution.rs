//! Transaction execution.
//!
//! The [`Executor`] trait is what consensus needs from the execution layer:
//! a side-effect-free dry run for packaging and verifying blocks, and an
//! atomic apply at commit time. [`Ledger`] is the account-balance
//! implementation used by nodes.

use crate::error::{ConsensusError, Result};
use crate::transaction::{Address, Receipt, Transaction, TransactionId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Execution capability consumed by consensus.
pub trait Executor: Send + Sync {
    /// Executes `txs` in order against an isolated snapshot of current state.
    ///
    /// Returns one result per transaction. A failed transaction leaves the
    /// snapshot untouched for the ones after it. Nothing is persisted.
    fn dry_run(&self, txs: &[Transaction]) -> Vec<Result<Receipt>>;

    /// Applies `txs` in order. Either every transaction applies or none do.
    fn apply(&self, txs: &[Transaction]) -> Result<Vec<Receipt>>;
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<Address, u64>,
    applied: HashSet<TransactionId>,
}

/// Copy-on-write view over a ledger state.
struct Overlay<'a> {
    base: &'a LedgerState,
    balances: HashMap<Address, u64>,
    applied: HashSet<TransactionId>,
}

impl<'a> Overlay<'a> {
    fn new(base: &'a LedgerState) -> Self {
        Self {
            base,
            balances: HashMap::new(),
            applied: HashSet::new(),
        }
    }

    fn balance(&self, address: &Address) -> u64 {
        self.balances
            .get(address)
            .or_else(|| self.base.balances.get(address))
            .copied()
            .unwrap_or(0)
    }

    fn execute(&mut self, tx: &Transaction) -> Result<Receipt> {
        tx.verify()?;

        let id = tx.id();
        if self.applied.contains(&id) || self.base.applied.contains(&id) {
            return Err(ConsensusError::DuplicateTransaction(id.to_hex()));
        }
        if tx.amount == 0 {
            return Err(ConsensusError::InvalidTransaction(format!(
                "{id}: zero amount"
            )));
        }

        let sender_balance = self.balance(&tx.sender);
        if sender_balance < tx.amount {
            return Err(ConsensusError::InsufficientBalance {
                have: sender_balance,
                need: tx.amount,
            });
        }

        let receipt = if tx.sender == tx.recipient {
            Receipt {
                tx_id: id,
                sender_balance,
                recipient_balance: sender_balance,
            }
        } else {
            let recipient_balance = self
                .balance(&tx.recipient)
                .checked_add(tx.amount)
                .ok_or_else(|| {
                    ConsensusError::InvalidTransaction(format!("{id}: recipient balance overflow"))
                })?;
            let sender_balance = sender_balance - tx.amount;
            self.balances.insert(tx.sender.clone(), sender_balance);
            self.balances.insert(tx.recipient.clone(), recipient_balance);
            Receipt {
                tx_id: id,
                sender_balance,
                recipient_balance,
            }
        };

        self.applied.insert(id);
        Ok(receipt)
    }
}

/// In-memory account ledger.
#[derive(Debug, Default)]
pub struct Ledger {
    state: RwLock<LedgerState>,
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with initial balances.
    pub fn with_balances(balances: impl IntoIterator<Item = (Address, u64)>) -> Self {
        Self {
            state: RwLock::new(LedgerState {
                balances: balances.into_iter().collect(),
                applied: HashSet::new(),
            }),
        }
    }

    /// Returns the balance of an account.
    pub fn balance(&self, address: &Address) -> u64 {
        self.state.read().balances.get(address).copied().unwrap_or(0)
    }

    /// Returns true if the transaction has been applied.
    pub fn is_applied(&self, id: &TransactionId) -> bool {
        self.state.read().applied.contains(id)
    }
}

impl Executor for Ledger {
    fn dry_run(&self, txs: &[Transaction]) -> Vec<Result<Receipt>> {
        let state = self.state.read();
        let mut overlay = Overlay::new(&state);
        txs.iter().map(|tx| overlay.execute(tx)).collect()
    }

    fn apply(&self, txs: &[Transaction]) -> Result<Vec<Receipt>> {
        let mut state = self.state.write();

        let (receipts, balances, applied) = {
            let mut overlay = Overlay::new(&state);
            let receipts = txs
                .iter()
                .map(|tx| overlay.execute(tx))
                .collect::<Result<Vec<_>>>()?;
            (receipts, overlay.balances, overlay.applied)
        };

        state.balances.extend(balances);
        state.applied.extend(applied);

        tracing::trace!(count = receipts.len(), "applied transactions");

        Ok(receipts)
    }
}
