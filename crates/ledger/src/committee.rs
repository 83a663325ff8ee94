//! Committee queue machine: swap, remove, shuffle, and the randomness-seeded
//! shard assignment of new candidates.
//!
//! Committees and pending validators are queues of base58 key strings.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::hash::{hash_bytes, Hash32};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommitteeError {
    #[error("cannot swap zero validators")]
    SwapZeroOffset,
    #[error("no pending validator available for swapping")]
    NoPendingValidators,
    #[error("swap offset {offset} exceeds committee capacity {max}")]
    SwapOffsetTooLarge { offset: usize, max: usize },
    #[error("committee length {len} exceeds capacity {max} after swap")]
    CommitteeOversized { len: usize, max: usize },
    #[error("trying to remove more validators than the committee holds")]
    RemoveTooMany,
    #[error("removed validators are not a prefix of the committee (at position {position})")]
    RemoveMismatch { position: usize },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SwapOutcome {
    pub pending: Vec<String>,
    pub committee: Vec<String>,
    pub evicted: Vec<String>,
    pub incoming: Vec<String>,
}

/// Queue swap: when the committee is under capacity it is first topped up
/// from pending; the remaining offset then evicts the committee head and
/// enqueues the pending head in its place.
pub fn swap_validator(
    pending: &[String],
    committee: &[String],
    max_size: usize,
    offset: usize,
) -> Result<SwapOutcome, CommitteeError> {
    if offset == 0 {
        return Err(CommitteeError::SwapZeroOffset);
    }
    // Never swap more than pending can supply.
    let mut offset = offset.min(pending.len());
    if offset == 0 {
        return Err(CommitteeError::NoPendingValidators);
    }
    if offset > max_size {
        return Err(CommitteeError::SwapOffsetTooLarge { offset, max: max_size });
    }

    let mut pending = pending.to_vec();
    let mut committee = committee.to_vec();
    let mut incoming: Vec<String> = Vec::new();

    if committee.len() < max_size {
        let vacancy = max_size - committee.len();
        if vacancy >= offset {
            let moved: Vec<String> = pending.drain(..offset).collect();
            incoming.extend(moved.iter().cloned());
            committee.extend(moved);
            return Ok(SwapOutcome {
                pending,
                committee,
                evicted: Vec::new(),
                incoming,
            });
        }
        let moved: Vec<String> = pending.drain(..vacancy).collect();
        incoming.extend(moved.iter().cloned());
        committee.extend(moved);
        offset -= vacancy;
    }

    let evicted: Vec<String> = committee.drain(..offset).collect();
    let moved: Vec<String> = pending.drain(..offset).collect();
    incoming.extend(moved.iter().cloned());
    committee.extend(moved);

    if committee.len() > max_size {
        return Err(CommitteeError::CommitteeOversized {
            len: committee.len(),
            max: max_size,
        });
    }
    Ok(SwapOutcome {
        pending,
        committee,
        evicted,
        incoming,
    })
}

/// Remove an exact prefix of the validator queue.
pub fn remove_validator(
    validators: &[String],
    removed: &[String],
) -> Result<Vec<String>, CommitteeError> {
    if removed.len() > validators.len() {
        return Err(CommitteeError::RemoveTooMany);
    }
    for (position, validator) in removed.iter().enumerate() {
        if &validators[position] != validator {
            return Err(CommitteeError::RemoveMismatch { position });
        }
    }
    Ok(validators[removed.len()..].to_vec())
}

fn seeded_hash(candidate: &str, rand: i64) -> Hash32 {
    let mut seed = candidate.as_bytes().to_vec();
    seed.extend_from_slice(rand.to_string().as_bytes());
    hash_bytes(&seed)
}

/// Shard assignment formula: last byte of `H(candidate || decimal(rand))`
/// modulo the active shard count.
pub fn candidate_shard_id(candidate: &str, rand: i64, active_shards: usize) -> u8 {
    let hash = seeded_hash(candidate, rand);
    (hash[31] as usize % active_shards) as u8
}

/// Group candidates into their destination shards, preserving input order
/// within each shard queue.
pub fn assign_to_shards(
    candidates: &[String],
    rand: i64,
    active_shards: usize,
) -> BTreeMap<u8, Vec<String>> {
    let mut assigned: BTreeMap<u8, Vec<String>> = BTreeMap::new();
    for candidate in candidates {
        let shard_id = candidate_shard_id(candidate, rand, active_shards);
        assigned.entry(shard_id).or_default().push(candidate.clone());
    }
    assigned
}

/// Deterministic permutation: order candidates by their seeded hash.
pub fn shuffle_candidates(candidates: &[String], rand: i64) -> Vec<String> {
    let mut keyed: Vec<(Hash32, &String)> = candidates
        .iter()
        .map(|candidate| (seeded_hash(candidate, rand), candidate))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, candidate)| candidate.clone()).collect()
}

/// Producer slot for a round: `current[(proposer_idx + round) % len]`.
pub fn producer_position(committee_len: usize, proposer_idx: usize, round: u32) -> usize {
    (proposer_idx + round as usize) % committee_len
}

pub fn producer_for_round(committee: &[String], proposer_idx: usize, round: u32) -> Option<&String> {
    if committee.is_empty() {
        return None;
    }
    committee.get(producer_position(committee.len(), proposer_idx, round))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn swap_evicts_and_enqueues_in_order() {
        let out = swap_validator(&keys(&["E", "F", "G"]), &keys(&["A", "B", "C", "D"]), 4, 2).unwrap();
        assert_eq!(out.committee, keys(&["C", "D", "E", "F"]));
        assert_eq!(out.pending, keys(&["G"]));
        assert_eq!(out.evicted, keys(&["A", "B"]));
        assert_eq!(out.incoming, keys(&["E", "F"]));
    }

    #[test]
    fn swap_tops_up_before_evicting() {
        let out = swap_validator(&keys(&["E", "F", "G"]), &keys(&["A", "B"]), 4, 3).unwrap();
        // Two slots are filled, one eviction remains.
        assert_eq!(out.committee, keys(&["B", "E", "F", "G"]));
        assert_eq!(out.evicted, keys(&["A"]));
        assert_eq!(out.incoming, keys(&["E", "F", "G"]));
        assert!(out.pending.is_empty());
    }

    #[test]
    fn swap_zero_offset_errors() {
        assert_eq!(
            swap_validator(&keys(&["E"]), &keys(&["A"]), 4, 0),
            Err(CommitteeError::SwapZeroOffset)
        );
    }

    #[test]
    fn swap_without_pending_errors() {
        assert_eq!(
            swap_validator(&[], &keys(&["A"]), 4, 1),
            Err(CommitteeError::NoPendingValidators)
        );
    }

    #[test]
    fn remove_requires_exact_prefix() {
        let remaining = remove_validator(&keys(&["A", "B", "C"]), &keys(&["A", "B"])).unwrap();
        assert_eq!(remaining, keys(&["C"]));
        assert!(remove_validator(&keys(&["A", "B"]), &keys(&["B"])).is_err());
    }

    #[test]
    fn assignment_is_deterministic() {
        let first = candidate_shard_id("PUBKEY_X", 0, 8);
        let second = candidate_shard_id("PUBKEY_X", 0, 8);
        assert_eq!(first, second);
        assert!((first as usize) < 8);
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let candidates = keys(&["A", "B", "C", "D", "E"]);
        let shuffled = shuffle_candidates(&candidates, 42);
        assert_eq!(shuffled.len(), candidates.len());
        let mut sorted = shuffled.clone();
        sorted.sort();
        let mut original = candidates.clone();
        original.sort();
        assert_eq!(sorted, original);
        assert_eq!(shuffled, shuffle_candidates(&candidates, 42));
    }
}
