//! Admission control: validation, rate limiting, and advisory submission
//! locks.
//!
//! The advisory lock avoids wasted transactional work when the same action id
//! is submitted concurrently. It is not the correctness guarantee; the
//! ledger's uniqueness constraint is, so a lost or expired lock can never
//! cause a double apply.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::core::error::details::{
    LockContendedDetails, RateLimitedDetails, ValidationFailedDetails,
};
use crate::core::{
    ActionId, ActionPolicies, ActionPolicy, ActionType, ErrorCode, ErrorPayload, Limits,
    PrincipalId, SubmitRequest,
};
use crate::service::clock::TimeSource;

/// Per-action-type verification capability. The default implementation checks
/// the configured value bounds; richer verifiers are added by registration.
pub trait ActionVerifier: Send + Sync {
    fn verify(&self, principal_id: &PrincipalId, value: i64) -> bool;
}

struct BoundsVerifier {
    policy: ActionPolicy,
}

impl ActionVerifier for BoundsVerifier {
    fn verify(&self, _principal_id: &PrincipalId, value: i64) -> bool {
        self.policy.permits(value)
    }
}

pub struct VerifierRegistry {
    default: Box<dyn ActionVerifier>,
    verifiers: BTreeMap<ActionType, Box<dyn ActionVerifier>>,
}

impl VerifierRegistry {
    /// Bounds verifiers for every configured type, plus the default policy
    /// for types never registered.
    pub fn from_policies(policies: &ActionPolicies) -> Self {
        let mut verifiers: BTreeMap<ActionType, Box<dyn ActionVerifier>> = BTreeMap::new();
        for (action_type, policy) in &policies.actions {
            verifiers.insert(
                action_type.clone(),
                Box::new(BoundsVerifier { policy: *policy }),
            );
        }
        Self {
            default: Box::new(BoundsVerifier {
                policy: policies.default,
            }),
            verifiers,
        }
    }

    pub fn register(&mut self, action_type: ActionType, verifier: Box<dyn ActionVerifier>) {
        self.verifiers.insert(action_type, verifier);
    }

    pub fn verify(&self, action_type: &ActionType, principal_id: &PrincipalId, value: i64) -> bool {
        self.verifiers
            .get(action_type)
            .unwrap_or(&self.default)
            .verify(principal_id, value)
    }
}

/// Why a submission was turned away before reaching the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdmitRejection {
    Validation {
        action_type: ActionType,
        value: i64,
        min_value: i64,
        max_value: i64,
    },
    RateLimited {
        action_type: ActionType,
        limit: u32,
        window_ms: u64,
        retry_after_ms: u64,
    },
    /// Another submission for the same action id is in flight. Pending, not
    /// an error: callers surface it as a 409-equivalent.
    LockContended {
        action_id: ActionId,
    },
    Internal {
        reason: &'static str,
    },
}

impl AdmitRejection {
    pub fn to_error_payload(&self) -> ErrorPayload {
        match self {
            AdmitRejection::Validation {
                action_type,
                value,
                min_value,
                max_value,
            } => ErrorPayload::new(
                ErrorCode::ValidationFailed,
                "value outside configured bounds",
                false,
            )
            .with_details(ValidationFailedDetails {
                action_type: action_type.clone(),
                value: *value,
                min_value: *min_value,
                max_value: *max_value,
            }),
            AdmitRejection::RateLimited {
                action_type,
                limit,
                window_ms,
                retry_after_ms,
            } => ErrorPayload::new(ErrorCode::RateLimited, "rate window exceeded", true)
                .with_retry_after(*retry_after_ms)
                .with_details(RateLimitedDetails {
                    action_type: action_type.clone(),
                    limit: *limit,
                    window_ms: *window_ms,
                }),
            AdmitRejection::LockContended { action_id } => {
                ErrorPayload::new(ErrorCode::LockContended, "submission already in flight", true)
                    .with_details(LockContendedDetails {
                        action_id: action_id.clone(),
                    })
            }
            AdmitRejection::Internal { reason } => {
                ErrorPayload::new(ErrorCode::Internal, *reason, false)
            }
        }
    }
}

struct LockEntry {
    token: u64,
    acquired_at_ms: u64,
}

struct LockMap {
    next_token: u64,
    held: HashMap<ActionId, LockEntry>,
}

/// TTL-bounded advisory locks keyed by action id.
///
/// Acquisition fails fast instead of queuing. Expired entries are taken over
/// in place, so a crashed holder cannot block retries of the same action id
/// past the TTL.
pub struct LockTable {
    ttl_ms: u64,
    clock: Arc<dyn TimeSource>,
    inner: Arc<Mutex<LockMap>>,
}

impl LockTable {
    pub fn new(ttl_ms: u64, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            ttl_ms,
            clock,
            inner: Arc::new(Mutex::new(LockMap {
                next_token: 1,
                held: HashMap::new(),
            })),
        }
    }

    pub fn try_acquire(&self, action_id: &ActionId) -> Result<LockGuard, AdmitRejection> {
        let now_ms = self.clock.now_ms();
        let mut map = self
            .inner
            .lock()
            .map_err(|_| AdmitRejection::Internal {
                reason: "lock table poisoned",
            })?;
        if let Some(entry) = map.held.get(action_id)
            && now_ms < entry.acquired_at_ms.saturating_add(self.ttl_ms)
        {
            return Err(AdmitRejection::LockContended {
                action_id: action_id.clone(),
            });
        }
        let token = map.next_token;
        map.next_token += 1;
        map.held.insert(
            action_id.clone(),
            LockEntry {
                token,
                acquired_at_ms: now_ms,
            },
        );
        Ok(LockGuard {
            inner: Arc::clone(&self.inner),
            action_id: action_id.clone(),
            token,
        })
    }

    #[cfg(test)]
    fn held_count(&self) -> usize {
        self.inner.lock().expect("lock table poisoned").held.len()
    }
}

/// Releases the lock on drop, on every exit path. The token check keeps a
/// stale guard (expired and taken over) from releasing the new holder.
pub struct LockGuard {
    inner: Arc<Mutex<LockMap>>,
    action_id: ActionId,
    token: u64,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.inner.lock()
            && map.held.get(&self.action_id).map(|e| e.token) == Some(self.token)
        {
            map.held.remove(&self.action_id);
        }
    }
}

struct WindowCounter {
    window_start_ms: u64,
    count: u32,
}

enum RateCheckError {
    Limited { retry_after_ms: u64 },
    Poisoned,
}

/// Fixed-window counters per (principal, action type). Windows expire on
/// their own; an expired counter is reset in place on next touch.
pub struct RateLimiter {
    window_ms: u64,
    clock: Arc<dyn TimeSource>,
    inner: Mutex<HashMap<(PrincipalId, ActionType), WindowCounter>>,
}

impl RateLimiter {
    pub fn new(window_ms: u64, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            window_ms,
            clock,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Rejection leaves the counter untouched; only an admitted submission
    /// counts against the window.
    fn check(
        &self,
        principal_id: &PrincipalId,
        action_type: &ActionType,
        limit: u32,
    ) -> Result<(), RateCheckError> {
        let now_ms = self.clock.now_ms();
        let windows = self.inner.lock().map_err(|_| RateCheckError::Poisoned)?;
        let Some(counter) = windows.get(&(principal_id.clone(), action_type.clone())) else {
            return Ok(());
        };
        let window_end = counter.window_start_ms.saturating_add(self.window_ms);
        if now_ms >= window_end {
            return Ok(());
        }
        if counter.count >= limit {
            return Err(RateCheckError::Limited {
                retry_after_ms: window_end - now_ms,
            });
        }
        Ok(())
    }

    fn note(&self, principal_id: &PrincipalId, action_type: &ActionType) {
        let now_ms = self.clock.now_ms();
        let Ok(mut windows) = self.inner.lock() else {
            return;
        };
        let counter = windows
            .entry((principal_id.clone(), action_type.clone()))
            .or_insert(WindowCounter {
                window_start_ms: now_ms,
                count: 0,
            });
        if now_ms >= counter.window_start_ms.saturating_add(self.window_ms) {
            counter.window_start_ms = now_ms;
            counter.count = 0;
        }
        counter.count += 1;
    }
}

/// A granted submission: the advisory lock is held for the lifetime of the
/// permit and released when it drops.
pub struct SubmissionPermit {
    _guard: LockGuard,
}

pub struct Gatekeeper {
    policies: ActionPolicies,
    verifiers: VerifierRegistry,
    locks: LockTable,
    rate: RateLimiter,
    default_max_per_window: u32,
    rate_window_ms: u64,
}

impl Gatekeeper {
    pub fn new(limits: &Limits, policies: ActionPolicies, clock: Arc<dyn TimeSource>) -> Self {
        let verifiers = VerifierRegistry::from_policies(&policies);
        Self {
            verifiers,
            locks: LockTable::new(limits.lock_ttl_ms, Arc::clone(&clock)),
            rate: RateLimiter::new(limits.rate_window_ms, clock),
            default_max_per_window: limits.max_actions_per_window,
            rate_window_ms: limits.rate_window_ms,
            policies,
        }
    }

    pub fn register_verifier(&mut self, action_type: ActionType, verifier: Box<dyn ActionVerifier>) {
        self.verifiers.register(action_type, verifier);
    }

    /// Validate, rate-check, lock, count. The rate counter is incremented
    /// only after the lock is held, so rejected and contended submissions
    /// never consume budget.
    pub fn admit(
        &self,
        principal_id: &PrincipalId,
        request: &SubmitRequest,
    ) -> Result<SubmissionPermit, AdmitRejection> {
        let policy = self.policies.policy_for(&request.action_type);

        if !self
            .verifiers
            .verify(&request.action_type, principal_id, request.value)
        {
            return Err(AdmitRejection::Validation {
                action_type: request.action_type.clone(),
                value: request.value,
                min_value: policy.min_value,
                max_value: policy.max_value,
            });
        }

        let limit = policy.max_per_window.unwrap_or(self.default_max_per_window);
        match self.rate.check(principal_id, &request.action_type, limit) {
            Ok(()) => {}
            Err(RateCheckError::Limited { retry_after_ms }) => {
                return Err(AdmitRejection::RateLimited {
                    action_type: request.action_type.clone(),
                    limit,
                    window_ms: self.rate_window_ms,
                    retry_after_ms,
                });
            }
            Err(RateCheckError::Poisoned) => {
                return Err(AdmitRejection::Internal {
                    reason: "rate window lock poisoned",
                });
            }
        }

        let guard = self.locks.try_acquire(&request.action_id)?;
        self.rate.note(principal_id, &request.action_type);
        Ok(SubmissionPermit { _guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::TestClock;

    fn pid(s: &str) -> PrincipalId {
        PrincipalId::new(s).unwrap()
    }

    fn request(action_id: &str, value: i64) -> SubmitRequest {
        SubmitRequest {
            action_id: ActionId::parse(action_id).unwrap(),
            action_type: ActionType::parse("task_completion").unwrap(),
            value,
            occurred_at_ms: 1_000,
        }
    }

    fn gatekeeper(clock: &TestClock) -> Gatekeeper {
        Gatekeeper::new(
            &Limits::default(),
            ActionPolicies::default(),
            Arc::new(clock.clone()),
        )
    }

    #[test]
    fn lock_contended_while_held_released_on_drop() {
        let clock = TestClock::new(1_000);
        let table = LockTable::new(10_000, Arc::new(clock.clone()));
        let id = ActionId::parse("a1").unwrap();

        let guard = table.try_acquire(&id).expect("first acquire");
        assert!(matches!(
            table.try_acquire(&id),
            Err(AdmitRejection::LockContended { .. })
        ));

        drop(guard);
        assert_eq!(table.held_count(), 0);
        table.try_acquire(&id).expect("acquire after release");
    }

    #[test]
    fn expired_lock_is_taken_over_and_stale_guard_is_inert() {
        let clock = TestClock::new(1_000);
        let table = LockTable::new(10_000, Arc::new(clock.clone()));
        let id = ActionId::parse("a1").unwrap();

        let stale = table.try_acquire(&id).expect("first acquire");
        clock.advance_ms(10_000);

        let fresh = table.try_acquire(&id).expect("takeover after ttl");
        // The stale guard must not release the new holder's entry.
        drop(stale);
        assert!(matches!(
            table.try_acquire(&id),
            Err(AdmitRejection::LockContended { .. })
        ));
        drop(fresh);
        assert_eq!(table.held_count(), 0);
    }

    #[test]
    fn rejected_submissions_do_not_consume_rate_budget() {
        let clock = TestClock::new(1_000);
        let gate = gatekeeper(&clock);
        let p = pid("p1");

        for i in 0..10 {
            let permit = gate
                .admit(&p, &request(&format!("a{i}"), 5))
                .expect("within budget");
            drop(permit);
        }
        for _ in 0..3 {
            assert!(matches!(
                gate.admit(&p, &request("a-extra", 5)),
                Err(AdmitRejection::RateLimited { .. })
            ));
        }
        // The window resets after rate_window_ms despite the rejections.
        clock.advance_ms(60_000);
        gate.admit(&p, &request("a-fresh", 5)).expect("new window");
    }

    #[test]
    fn rate_rejection_reports_retry_after() {
        let clock = TestClock::new(1_000);
        let gate = gatekeeper(&clock);
        let p = pid("p1");

        for i in 0..10 {
            drop(gate.admit(&p, &request(&format!("a{i}"), 5)).unwrap());
        }
        clock.advance_ms(10_000);
        match gate.admit(&p, &request("a-late", 5)) {
            Err(AdmitRejection::RateLimited { retry_after_ms, .. }) => {
                assert_eq!(retry_after_ms, 50_000);
            }
            other => panic!("expected RateLimited, got {:?}", other.err()),
        }
    }

    #[test]
    fn out_of_bounds_value_is_validation_failed() {
        let clock = TestClock::new(1_000);
        let gate = gatekeeper(&clock);

        match gate.admit(&pid("p1"), &request("a1", 0)) {
            Err(AdmitRejection::Validation { min_value, .. }) => assert_eq!(min_value, 1),
            other => panic!("expected Validation, got {:?}", other.err()),
        }
        assert!(matches!(
            gate.admit(&pid("p1"), &request("a1", 100_000)),
            Err(AdmitRejection::Validation { .. })
        ));
    }

    #[test]
    fn registered_verifier_overrides_bounds() {
        struct DenyAll;
        impl ActionVerifier for DenyAll {
            fn verify(&self, _principal_id: &PrincipalId, _value: i64) -> bool {
                false
            }
        }

        let clock = TestClock::new(1_000);
        let mut gate = gatekeeper(&clock);
        gate.register_verifier(
            ActionType::parse("task_completion").unwrap(),
            Box::new(DenyAll),
        );

        assert!(matches!(
            gate.admit(&pid("p1"), &request("a1", 5)),
            Err(AdmitRejection::Validation { .. })
        ));
    }
}
