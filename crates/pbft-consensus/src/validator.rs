//! Validator set, quorum size and primary rotation.
//!
//! The set is fixed at genesis. Every validator has a stable index, and the
//! primary for a (height, view) pair rotates round-robin over those indices.

use crate::crypto::PublicKey;
use crate::error::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A validator in the consensus network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Validator {
    /// Position in the set.
    pub index: usize,

    /// Validator's public key (identity).
    pub public_key: PublicKey,

    /// Human-readable name.
    pub name: String,
}

/// Minimum number of distinct validators needed to advance a phase.
///
/// With `f = n / 3` tolerated faults the quorum is `2f + 1`. Sets too small to
/// tolerate any fault need every validator.
pub fn quorum_size(n: usize) -> usize {
    let f = n / 3;
    if f == 0 {
        n
    } else {
        2 * f + 1
    }
}

/// Index of the primary for a (height, view) pair in a set of `n`.
pub fn primary_index(height: u64, view: u64, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    (height.wrapping_add(view) % n as u64) as usize
}

/// The fixed validator set.
#[derive(Debug, Clone)]
pub struct ValidatorSet {
    validators: Vec<Validator>,
    index: HashMap<PublicKey, usize>,
}

impl ValidatorSet {
    /// Creates a validator set from (name, key) pairs in index order.
    pub fn new(members: impl IntoIterator<Item = (String, PublicKey)>) -> Result<Self> {
        let mut validators = Vec::new();
        let mut index = HashMap::new();

        for (name, public_key) in members {
            public_key.to_verification_key()?;
            let position = validators.len();
            if index.insert(public_key.clone(), position).is_some() {
                return Err(ConsensusError::InvalidGenesis(format!(
                    "duplicate validator pubkey: {public_key}"
                )));
            }
            validators.push(Validator {
                index: position,
                public_key,
                name,
            });
        }

        if validators.is_empty() {
            return Err(ConsensusError::InvalidGenesis("no validators".into()));
        }

        Ok(Self { validators, index })
    }

    /// Returns the number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Always false; construction rejects empty sets.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Returns the quorum size for this set.
    pub fn quorum(&self) -> usize {
        quorum_size(self.len())
    }

    /// Returns the validator at `index`.
    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Looks up a validator by key.
    pub fn find(&self, key: &PublicKey) -> Option<&Validator> {
        self.index.get(key).map(|&i| &self.validators[i])
    }

    /// Returns true if `key` belongs to a validator.
    pub fn contains(&self, key: &PublicKey) -> bool {
        self.index.contains_key(key)
    }

    /// Returns the primary for a (height, view) pair.
    pub fn primary(&self, height: u64, view: u64) -> &Validator {
        &self.validators[primary_index(height, view, self.len())]
    }

    /// Iterates validators in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use proptest::prelude::*;

    fn set(n: u64) -> ValidatorSet {
        ValidatorSet::new(
            (0..n).map(|i| (format!("validator-{}", i + 1), Keypair::from_seed(i).public_key())),
        )
        .unwrap()
    }

    #[test]
    fn test_quorum_table() {
        let table = [(1, 1), (2, 2), (3, 3), (4, 3), (5, 3), (6, 5), (7, 5), (10, 7)];
        for (n, quorum) in table {
            assert_eq!(quorum_size(n), quorum, "n = {n}");
        }
    }

    #[test]
    fn test_single_validator_is_always_primary() {
        for height in 0..10 {
            assert_eq!(primary_index(height, height * 3, 1), 0);
        }
    }

    #[test]
    fn test_primary_rotation() {
        let validators = set(4);
        assert_eq!(validators.primary(1, 0).index, 1);
        assert_eq!(validators.primary(2, 0).index, 2);
        assert_eq!(validators.primary(2, 1).index, 3);
        assert_eq!(validators.primary(3, 1).index, 0);
    }

    #[test]
    fn test_lookup() {
        let validators = set(4);
        let key = Keypair::from_seed(2).public_key();
        assert!(validators.contains(&key));
        assert_eq!(validators.find(&key).unwrap().index, 2);
        assert!(!validators.contains(&Keypair::from_seed(9).public_key()));
        assert_eq!(validators.quorum(), 3);
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(matches!(
            ValidatorSet::new(Vec::new()),
            Err(ConsensusError::InvalidGenesis(_))
        ));

        let key = Keypair::from_seed(1).public_key();
        let result = ValidatorSet::new(vec![("a".into(), key.clone()), ("b".into(), key)]);
        assert!(matches!(result, Err(ConsensusError::InvalidGenesis(_))));
    }

    #[test]
    fn test_rejects_malformed_key() {
        let result = ValidatorSet::new(vec![("a".into(), PublicKey::from_hex("nothex"))]);
        assert!(matches!(result, Err(ConsensusError::InvalidKey(_))));
    }

    proptest! {
        #[test]
        fn prop_quorum_bounds(n in 1usize..200) {
            let q = quorum_size(n);
            let f = n / 3;
            prop_assert!(q <= n);
            prop_assert!(q > f);
            // Any two quorums share a validator.
            prop_assert!(2 * q > n);
        }

        #[test]
        fn prop_primary_has_period_n(height in 0u64..1_000_000, view in 0u64..1_000, n in 1usize..50) {
            let p = primary_index(height, view, n);
            prop_assert!(p < n);
            prop_assert_eq!(p, primary_index(height + n as u64, view, n));
            prop_assert_eq!(p, primary_index(height, view + n as u64, n));
            prop_assert_eq!(primary_index(height + 1, view, n), primary_index(height, view + 1, n));
        }
    }
}
