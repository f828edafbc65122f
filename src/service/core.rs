//! The service facade.
//!
//! Wires the submit pipeline: gatekeeper (validate, rate-limit, lock) →
//! ledger (atomic apply with bounded retry) → leaderboard impact → notifier
//! broadcast, with the anomaly monitor observing commits out-of-band. The
//! transport collaborator calls `submit`, `leaderboard`, and `subscribe`
//! with an already-verified principal.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::core::error::details::{DuplicateActionDetails, OverloadedDetails, ServiceUnavailableDetails};
use crate::core::{
    ActionRecord, ActionType, ApplyOutcome, ErrorCode, ErrorPayload, LeaderboardSnapshot,
    PrincipalId, SubmitReceipt, SubmitRequest,
};
use crate::service::anomaly::{AnomalyMonitor, AuditSink, TracingAuditSink};
use crate::service::clock::{SystemClock, TimeSource};
use crate::service::gatekeeper::{ActionVerifier, AdmitRejection, Gatekeeper};
use crate::service::leaderboard::LeaderboardCache;
use crate::service::ledger::{LedgerError, SqliteLedger};
use crate::service::metrics;
use crate::service::notifier::{ChangeNotifier, NotifierLimits, NotifyError, UpdateSubscription};
use crate::service::retry::RetryPolicy;

pub struct ScoreService {
    clock: Arc<dyn TimeSource>,
    gatekeeper: Gatekeeper,
    ledger: Arc<SqliteLedger>,
    cache: LeaderboardCache,
    notifier: ChangeNotifier,
    anomaly: AnomalyMonitor,
    retry: RetryPolicy,
}

impl ScoreService {
    pub fn open(config: &Config, db_path: &Path) -> crate::Result<Self> {
        let ledger = SqliteLedger::open(db_path, config.limits.sqlite_busy_timeout_ms)?;
        Self::assemble(
            config,
            ledger,
            Arc::new(SystemClock),
            Arc::new(TracingAuditSink),
        )
    }

    pub fn open_in_memory(config: &Config) -> crate::Result<Self> {
        let ledger = SqliteLedger::open_in_memory(config.limits.sqlite_busy_timeout_ms)?;
        Self::assemble(
            config,
            ledger,
            Arc::new(SystemClock),
            Arc::new(TracingAuditSink),
        )
    }

    /// Full wiring with injected clock and audit sink; the harness and the
    /// embedding process both build through here.
    pub fn assemble(
        config: &Config,
        ledger: SqliteLedger,
        clock: Arc<dyn TimeSource>,
        audit: Arc<dyn AuditSink>,
    ) -> crate::Result<Self> {
        let ledger = Arc::new(ledger);
        let gatekeeper = Gatekeeper::new(
            &config.limits,
            config.policies.clone(),
            Arc::clone(&clock),
        );
        let cache = LeaderboardCache::new(Arc::clone(&ledger), Arc::clone(&clock), &config.limits)?;
        let notifier = ChangeNotifier::new(
            NotifierLimits::from_limits(&config.limits),
            Arc::clone(&clock),
        );
        let anomaly = AnomalyMonitor::start(
            config.anomaly,
            config.limits.anomaly_history_len,
            config.limits.anomaly_queue_max_events,
            audit,
        );
        let retry = RetryPolicy::from_limits(&config.limits);
        Ok(Self {
            clock,
            gatekeeper,
            ledger,
            cache,
            notifier,
            anomaly,
            retry,
        })
    }

    /// Register a richer verifier for one action type. Call during wiring,
    /// before the service is shared.
    pub fn register_verifier(&mut self, action_type: ActionType, verifier: Box<dyn ActionVerifier>) {
        self.gatekeeper.register_verifier(action_type, verifier);
    }

    /// Apply one score action at most once.
    ///
    /// Deterministic rejections (validation, rate limit, contention,
    /// duplicate) return synchronously with stable codes; transient ledger
    /// failures are retried internally before surfacing
    /// `service_unavailable`. The advisory lock is held for the duration and
    /// released on every path when the permit drops.
    pub fn submit(
        &self,
        principal_id: &PrincipalId,
        request: &SubmitRequest,
    ) -> Result<SubmitReceipt, Box<ErrorPayload>> {
        let _permit = match self.gatekeeper.admit(principal_id, request) {
            Ok(permit) => permit,
            Err(rejection) => {
                metrics::submit_rejected(rejection_metric(&rejection));
                return Err(Box::new(rejection.to_error_payload()));
            }
        };

        let previous_rank = self.cache.current().rank_of(principal_id);
        let record = ActionRecord {
            action_id: request.action_id.clone(),
            principal_id: principal_id.clone(),
            action_type: request.action_type.clone(),
            value: request.value,
            occurred_at_ms: request.occurred_at_ms,
            applied_at_ms: self.clock.now_ms(),
        };

        let outcome = self.retry.run(
            "ledger apply",
            |err: &LedgerError| err.transience().is_retryable(),
            || self.ledger.apply(&record),
        );
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) if err.transience().is_retryable() => {
                metrics::submit_unavailable();
                tracing::error!(
                    action_id = %record.action_id,
                    error = %err,
                    "ledger retry budget exhausted"
                );
                return Err(Box::new(
                    ErrorPayload::new(
                        ErrorCode::ServiceUnavailable,
                        "store unavailable, retry later",
                        true,
                    )
                    .with_details(ServiceUnavailableDetails {
                        attempts: self.retry.max_retries + 1,
                    }),
                ));
            }
            Err(err) => {
                tracing::error!(
                    action_id = %record.action_id,
                    error = %err,
                    "ledger apply failed"
                );
                return Err(Box::new(ErrorPayload::new(
                    ErrorCode::Internal,
                    "ledger apply failed",
                    false,
                )));
            }
        };

        match outcome {
            ApplyOutcome::Duplicate => {
                metrics::submit_duplicate();
                Err(Box::new(
                    ErrorPayload::new(
                        ErrorCode::DuplicateAction,
                        "action already applied",
                        false,
                    )
                    .with_details(DuplicateActionDetails {
                        action_id: record.action_id.clone(),
                    }),
                ))
            }
            ApplyOutcome::Committed { new_score } => {
                match self.cache.on_commit(principal_id, new_score) {
                    Ok(Some((old, new))) => {
                        if let Err(err) = self.notifier.publish(&old, &new) {
                            tracing::warn!(error = %err, "leaderboard broadcast failed");
                        }
                    }
                    Ok(None) => {}
                    // The commit stands; the TTL recompute bounds staleness.
                    Err(err) => {
                        tracing::warn!(error = %err, "leaderboard refresh failed");
                    }
                }
                self.anomaly.observe(
                    principal_id,
                    &record.action_type,
                    record.value,
                    record.applied_at_ms,
                );
                metrics::submit_committed();
                tracing::debug!(
                    principal = %principal_id,
                    action_id = %record.action_id,
                    new_score,
                    "action committed"
                );
                Ok(SubmitReceipt {
                    new_score,
                    new_rank: self.cache.current().rank_of(principal_id),
                    previous_rank,
                })
            }
        }
    }

    /// Current leaderboard, no staler than the configured TTL.
    pub fn leaderboard(&self) -> Result<Arc<LeaderboardSnapshot>, Box<ErrorPayload>> {
        self.cache.query().map_err(|err| {
            tracing::error!(error = %err, "leaderboard query failed");
            Box::new(ErrorPayload::new(
                ErrorCode::Internal,
                "leaderboard unavailable",
                true,
            ))
        })
    }

    pub fn subscribe(&self) -> Result<UpdateSubscription, Box<ErrorPayload>> {
        self.notifier.subscribe().map_err(|err| match err {
            NotifyError::SubscriberLimitReached { max_subscribers } => Box::new(
                ErrorPayload::new(ErrorCode::Overloaded, "subscriber limit reached", true)
                    .with_details(OverloadedDetails {
                        max_subscribers: max_subscribers as u64,
                    }),
            ),
            NotifyError::LockPoisoned => Box::new(ErrorPayload::new(
                ErrorCode::Internal,
                "notifier unavailable",
                false,
            )),
        })
    }

    /// Read surface for operational glue and tests.
    pub fn ledger(&self) -> &SqliteLedger {
        &self.ledger
    }

    /// Stops the anomaly worker. Committed state is already durable.
    pub fn shutdown(&self) {
        self.anomaly.shutdown();
    }
}

fn rejection_metric(rejection: &AdmitRejection) -> &'static str {
    match rejection {
        AdmitRejection::Validation { .. } => "submit_validation_failed",
        AdmitRejection::RateLimited { .. } => "submit_rate_limited",
        AdmitRejection::LockContended { .. } => "submit_lock_contended",
        AdmitRejection::Internal { .. } => "submit_internal_error",
    }
}
