//! Immutable leaderboard snapshots and subscriber updates.
//!
//! A snapshot is built fully, then published by swapping a single reference;
//! it is never mutated in place. Ordering is score descending with ties
//! broken by ascending principal id, so repeated builds over the same
//! aggregates are byte-identical.

use serde::{Deserialize, Serialize};

use super::identity::PrincipalId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub principal_id: PrincipalId,
    pub score: i64,
    /// 1-based rank within the snapshot.
    pub rank: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    entries: Vec<LeaderboardEntry>,
    pub generated_at_ms: u64,
    pub ttl_ms: u64,
}

impl LeaderboardSnapshot {
    pub fn empty(generated_at_ms: u64, ttl_ms: u64) -> Self {
        Self {
            entries: Vec::new(),
            generated_at_ms,
            ttl_ms,
        }
    }

    /// Build from rows already ordered score-descending, id-ascending,
    /// truncated to K by the caller. Ranks are assigned positionally.
    pub fn from_ranked(rows: Vec<(PrincipalId, i64)>, generated_at_ms: u64, ttl_ms: u64) -> Self {
        let entries = rows
            .into_iter()
            .enumerate()
            .map(|(idx, (principal_id, score))| LeaderboardEntry {
                principal_id,
                score,
                rank: (idx + 1) as u32,
            })
            .collect();
        Self {
            entries,
            generated_at_ms,
            ttl_ms,
        }
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, principal_id: &PrincipalId) -> bool {
        self.rank_of(principal_id).is_some()
    }

    pub fn rank_of(&self, principal_id: &PrincipalId) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| &entry.principal_id == principal_id)
            .map(|entry| entry.rank)
    }

    /// Score of the last entry; `None` when the snapshot is empty.
    pub fn lowest_score(&self) -> Option<i64> {
        self.entries.last().map(|entry| entry.score)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.generated_at_ms.saturating_add(self.ttl_ms)
    }
}

/// One broadcast message. `sequence` is per subscriber connection, starts at
/// 1, and increases by 1 per delivered update, giving clients ordering and
/// gap detection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardUpdate {
    pub timestamp_ms: u64,
    pub entries: Vec<LeaderboardEntry>,
    pub changed_principals: Vec<PrincipalId>,
    pub sequence: u64,
}

/// True when the two snapshots differ in membership or rank order. Score
/// changes that leave the ordering intact do not count: broadcasts exist to
/// report ranking movement, and suppressing the rest bounds fan-out volume.
pub fn rank_order_changed(old: &LeaderboardSnapshot, new: &LeaderboardSnapshot) -> bool {
    if old.len() != new.len() {
        return true;
    }
    old.entries
        .iter()
        .zip(new.entries.iter())
        .any(|(a, b)| a.principal_id != b.principal_id)
}

/// Principals that entered, left, or moved rank between the two snapshots,
/// sorted ascending for deterministic payloads.
pub fn changed_principals(
    old: &LeaderboardSnapshot,
    new: &LeaderboardSnapshot,
) -> Vec<PrincipalId> {
    let mut changed: Vec<PrincipalId> = Vec::new();
    for entry in new.entries() {
        match old.rank_of(&entry.principal_id) {
            Some(rank) if rank == entry.rank => {}
            _ => changed.push(entry.principal_id.clone()),
        }
    }
    for entry in old.entries() {
        if !new.contains(&entry.principal_id) {
            changed.push(entry.principal_id.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}
