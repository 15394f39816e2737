//! Relay selection
//!
//! Picks the ordered hop list for a new circuit out of a candidate pool.

use std::collections::HashSet;

use rand::seq::SliceRandom;

use hopwire_core::{CircuitBuildError, RelayEntry};

/// Maps a hop count and a candidate pool to an ordered path
pub trait RelaySelector: Send + Sync {
    fn select(&self, hops: usize, pool: &[RelayEntry]) -> Result<Vec<RelayEntry>, CircuitBuildError>;
}

/// Uniformly random path of distinct relays
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSelector;

impl RelaySelector for RandomSelector {
    fn select(&self, hops: usize, pool: &[RelayEntry]) -> Result<Vec<RelayEntry>, CircuitBuildError> {
        // The same relay may be listed under several addresses
        let mut seen = HashSet::new();
        let mut candidates: Vec<&RelayEntry> = pool
            .iter()
            .filter(|r| seen.insert(r.public_key))
            .collect();

        if candidates.len() < hops {
            return Err(CircuitBuildError::InsufficientRelays {
                need: hops,
                available: candidates.len(),
            });
        }

        candidates.shuffle(&mut rand::thread_rng());
        Ok(candidates.into_iter().take(hops).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopwire_core::{PublicKey, RelayRole};

    fn relay(id: u8) -> RelayEntry {
        RelayEntry {
            address: format!("tcp://relay{}.example:13490", id),
            public_key: PublicKey([id; 32]),
            role: RelayRole::Fronting,
        }
    }

    #[test]
    fn test_select_distinct_hops() {
        let pool: Vec<RelayEntry> = (1..=5).map(relay).collect();
        for hops in 1..=5 {
            let path = RandomSelector.select(hops, &pool).unwrap();
            assert_eq!(path.len(), hops);
            let keys: HashSet<_> = path.iter().map(|r| r.public_key).collect();
            assert_eq!(keys.len(), hops);
            assert!(path.iter().all(|r| pool.contains(r)));
        }
    }

    #[test]
    fn test_insufficient_relays() {
        let pool: Vec<RelayEntry> = (1..=2).map(relay).collect();
        assert_eq!(
            RandomSelector.select(3, &pool).unwrap_err(),
            CircuitBuildError::InsufficientRelays {
                need: 3,
                available: 2
            }
        );
    }

    #[test]
    fn test_duplicate_identities_count_once() {
        let mut alias = relay(1);
        alias.address = "tcp://alias.example:13490".to_string();
        let pool = vec![relay(1), alias];
        assert!(RandomSelector.select(2, &pool).is_err());
        assert_eq!(RandomSelector.select(1, &pool).unwrap().len(), 1);
    }

    #[test]
    fn test_paths_vary() {
        let pool: Vec<RelayEntry> = (1..=10).map(relay).collect();
        let first = RandomSelector.select(3, &pool).unwrap();
        let differs = (0..50).any(|_| RandomSelector.select(3, &pool).unwrap() != first);
        assert!(differs);
    }
}
