//! Top-K leaderboard cache over the ledger's aggregates.
//!
//! Snapshots are rebuilt, never mutated: a recompute reads a fresh ordered
//! set of aggregates, builds the new snapshot off-lock, then swaps one
//! reference. Readers keep the prior snapshot until the swap lands and never
//! observe a partially built view. Recomputes are serialized by a dedicated
//! mutex so an older build cannot overwrite a newer one.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use thiserror::Error;

use crate::core::{LeaderboardSnapshot, Limits, PrincipalId};
use crate::error::Transience;
use crate::service::clock::TimeSource;
use crate::service::ledger::{LedgerError, SqliteLedger};
use crate::service::metrics;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("leaderboard snapshot lock poisoned")]
    Poisoned,
}

impl CacheError {
    pub fn transience(&self) -> Transience {
        match self {
            CacheError::Ledger(err) => err.transience(),
            CacheError::Poisoned => Transience::Permanent,
        }
    }
}

pub struct LeaderboardCache {
    ledger: Arc<SqliteLedger>,
    clock: Arc<dyn TimeSource>,
    top_k: usize,
    ttl_ms: u64,
    snapshot: RwLock<Arc<LeaderboardSnapshot>>,
    /// Serializes recomputes; the snapshot RwLock is only held for the swap.
    recompute: Mutex<()>,
}

impl LeaderboardCache {
    /// Seeds the snapshot from the ledger so a restart over an existing
    /// database starts consistent instead of empty.
    pub fn new(
        ledger: Arc<SqliteLedger>,
        clock: Arc<dyn TimeSource>,
        limits: &Limits,
    ) -> Result<Self, CacheError> {
        let cache = Self {
            ledger,
            top_k: limits.top_k,
            ttl_ms: limits.snapshot_ttl_ms,
            snapshot: RwLock::new(Arc::new(LeaderboardSnapshot::empty(
                clock.now_ms(),
                limits.snapshot_ttl_ms,
            ))),
            recompute: Mutex::new(()),
            clock,
        };
        cache.recompute_and_swap()?;
        Ok(cache)
    }

    /// Current snapshot without a freshness check; rank lookups around a
    /// commit use this to avoid recursive recomputes.
    pub fn current(&self) -> Arc<LeaderboardSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            // A poisoned reader lock still holds a fully built snapshot.
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Current snapshot, recomputed first if the TTL lapsed. This is the
    /// fallback that bounds staleness even if change notifications are lost.
    pub fn query(&self) -> Result<Arc<LeaderboardSnapshot>, CacheError> {
        let snapshot = self.current();
        if !snapshot.is_expired(self.clock.now_ms()) {
            return Ok(snapshot);
        }
        let _serial = self.recompute.lock().map_err(|_| CacheError::Poisoned)?;
        // Another query may have refreshed while we waited for the serial lock.
        let snapshot = self.current();
        if !snapshot.is_expired(self.clock.now_ms()) {
            return Ok(snapshot);
        }
        let (_, fresh) = self.swap_locked()?;
        Ok(fresh)
    }

    /// Commit hook. Recomputes only when the commit can move the ranking:
    /// the principal is already in the snapshot, the board has spare room,
    /// or the new score beats the current lowest entry.
    pub fn on_commit(
        &self,
        principal_id: &PrincipalId,
        new_score: i64,
    ) -> Result<Option<(Arc<LeaderboardSnapshot>, Arc<LeaderboardSnapshot>)>, CacheError> {
        let snapshot = self.current();
        if !Self::commit_is_relevant(&snapshot, principal_id, new_score, self.top_k) {
            metrics::leaderboard_commit_skipped();
            return Ok(None);
        }
        self.recompute_and_swap().map(Some)
    }

    fn commit_is_relevant(
        snapshot: &LeaderboardSnapshot,
        principal_id: &PrincipalId,
        new_score: i64,
        top_k: usize,
    ) -> bool {
        if snapshot.contains(principal_id) {
            return true;
        }
        if snapshot.len() < top_k {
            return true;
        }
        match snapshot.lowest_score() {
            Some(lowest) => new_score > lowest,
            None => true,
        }
    }

    fn recompute_and_swap(
        &self,
    ) -> Result<(Arc<LeaderboardSnapshot>, Arc<LeaderboardSnapshot>), CacheError> {
        let _serial = self.recompute.lock().map_err(|_| CacheError::Poisoned)?;
        self.swap_locked()
    }

    /// Caller holds the recompute mutex.
    fn swap_locked(
        &self,
    ) -> Result<(Arc<LeaderboardSnapshot>, Arc<LeaderboardSnapshot>), CacheError> {
        let started = Instant::now();
        let rows = self.ledger.top(self.top_k)?;
        let fresh = Arc::new(LeaderboardSnapshot::from_ranked(
            rows,
            self.clock.now_ms(),
            self.ttl_ms,
        ));
        let mut guard = self.snapshot.write().map_err(|_| CacheError::Poisoned)?;
        let previous = std::mem::replace(&mut *guard, Arc::clone(&fresh));
        drop(guard);
        metrics::leaderboard_recompute(started.elapsed());
        Ok((previous, fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ActionId, ActionRecord, ActionType};
    use crate::test_harness::TestClock;

    fn commit(ledger: &SqliteLedger, action_id: &str, principal: &str, value: i64) -> i64 {
        let record = ActionRecord {
            action_id: ActionId::parse(action_id).unwrap(),
            principal_id: PrincipalId::new(principal).unwrap(),
            action_type: ActionType::parse("task_completion").unwrap(),
            value,
            occurred_at_ms: 1_000,
            applied_at_ms: 1_000,
        };
        match ledger.apply(&record).unwrap() {
            crate::core::ApplyOutcome::Committed { new_score } => new_score,
            other => panic!("expected commit, got {other:?}"),
        }
    }

    fn setup(top_k: usize) -> (Arc<SqliteLedger>, TestClock, LeaderboardCache) {
        let ledger = Arc::new(SqliteLedger::open_in_memory(1_000).unwrap());
        let clock = TestClock::new(1_000);
        let limits = Limits {
            top_k,
            ..Limits::default()
        };
        let cache =
            LeaderboardCache::new(Arc::clone(&ledger), Arc::new(clock.clone()), &limits).unwrap();
        (ledger, clock, cache)
    }

    #[test]
    fn seeds_from_existing_aggregates() {
        let ledger = Arc::new(SqliteLedger::open_in_memory(1_000).unwrap());
        commit(&ledger, "a1", "p1", 30);
        let clock = TestClock::new(1_000);
        let cache =
            LeaderboardCache::new(Arc::clone(&ledger), Arc::new(clock), &Limits::default())
                .unwrap();
        assert_eq!(cache.current().rank_of(&PrincipalId::new("p1").unwrap()), Some(1));
    }

    #[test]
    fn irrelevant_commit_leaves_snapshot_untouched() {
        let (ledger, _clock, cache) = setup(2);
        commit(&ledger, "a1", "p1", 100);
        cache.on_commit(&PrincipalId::new("p1").unwrap(), 100).unwrap();
        commit(&ledger, "a2", "p2", 90);
        cache.on_commit(&PrincipalId::new("p2").unwrap(), 90).unwrap();

        let before = cache.current();
        let score = commit(&ledger, "a3", "p3", 10);
        let outcome = cache
            .on_commit(&PrincipalId::new("p3").unwrap(), score)
            .unwrap();
        assert!(outcome.is_none());
        assert!(Arc::ptr_eq(&before, &cache.current()));
    }

    #[test]
    fn relevant_commit_recomputes_immediately() {
        let (ledger, _clock, cache) = setup(2);
        commit(&ledger, "a1", "p1", 100);
        cache.on_commit(&PrincipalId::new("p1").unwrap(), 100).unwrap();
        commit(&ledger, "a2", "p2", 90);
        cache.on_commit(&PrincipalId::new("p2").unwrap(), 90).unwrap();

        let score = commit(&ledger, "a3", "p3", 95);
        let (old, new) = cache
            .on_commit(&PrincipalId::new("p3").unwrap(), score)
            .unwrap()
            .expect("membership change recomputes");
        assert!(old.contains(&PrincipalId::new("p2").unwrap()));
        assert!(new.contains(&PrincipalId::new("p3").unwrap()));
        assert!(!new.contains(&PrincipalId::new("p2").unwrap()));
    }

    #[test]
    fn query_recomputes_only_after_ttl() {
        let (ledger, clock, cache) = setup(10);
        commit(&ledger, "a1", "p1", 10);

        // Within the TTL the stale snapshot is served as-is.
        let first = cache.query().unwrap();
        assert!(first.is_empty());

        clock.advance_ms(Limits::default().snapshot_ttl_ms + 1);
        let second = cache.query().unwrap();
        assert_eq!(second.rank_of(&PrincipalId::new("p1").unwrap()), Some(1));
        assert_eq!(second.generated_at_ms, clock.now_ms());
    }

    #[test]
    fn board_with_spare_room_accepts_any_commit() {
        let (ledger, _clock, cache) = setup(3);
        commit(&ledger, "a1", "p1", 100);
        cache.on_commit(&PrincipalId::new("p1").unwrap(), 100).unwrap();

        let score = commit(&ledger, "a2", "p2", 1);
        let outcome = cache.on_commit(&PrincipalId::new("p2").unwrap(), score).unwrap();
        assert!(outcome.is_some());
    }
}
