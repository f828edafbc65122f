//! Test support: manual clock, collecting audit sink, and a service builder
//! over an in-memory ledger. Not part of the stable API surface.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use crate::config::Config;
use crate::core::{ActionId, ActionType, PrincipalId, SubmitRequest};
use crate::service::ScoreService;
use crate::service::anomaly::{AnomalyFlag, AuditSink};
use crate::service::clock::TimeSource;
use crate::service::ledger::SqliteLedger;

/// Manually driven clock shared across every TTL consumer in a test.
#[derive(Clone)]
pub struct TestClock {
    now: Arc<AtomicU64>,
}

impl TestClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl TimeSource for TestClock {
    fn now_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Audit sink that keeps every flag for assertions.
#[derive(Default)]
pub struct VecAuditSink {
    flags: Mutex<Vec<AnomalyFlag>>,
}

impl VecAuditSink {
    pub fn flags(&self) -> Vec<AnomalyFlag> {
        self.flags.lock().expect("audit sink poisoned").clone()
    }
}

impl AuditSink for VecAuditSink {
    fn record(&self, flag: AnomalyFlag) {
        self.flags.lock().expect("audit sink poisoned").push(flag);
    }
}

/// A fully wired service on an in-memory ledger with injected clock and
/// audit sink.
pub struct TestWorld {
    pub clock: TestClock,
    pub audit: Arc<VecAuditSink>,
    pub service: ScoreService,
}

pub fn world(config: Config) -> TestWorld {
    let clock = TestClock::new(1_000);
    let audit = Arc::new(VecAuditSink::default());
    let ledger =
        SqliteLedger::open_in_memory(config.limits.sqlite_busy_timeout_ms).expect("open ledger");
    let service = ScoreService::assemble(
        &config,
        ledger,
        Arc::new(clock.clone()),
        Arc::clone(&audit) as Arc<dyn AuditSink>,
    )
    .expect("assemble service");
    TestWorld {
        clock,
        audit,
        service,
    }
}

pub fn principal(s: &str) -> PrincipalId {
    PrincipalId::new(s).expect("test principal id")
}

pub fn unique_action_id() -> ActionId {
    ActionId::parse(&Uuid::new_v4().to_string()).expect("uuid action id")
}

/// A `task_completion` request with a fresh globally unique action id.
pub fn request(value: i64) -> SubmitRequest {
    SubmitRequest {
        action_id: unique_action_id(),
        action_type: ActionType::parse("task_completion").expect("test action type"),
        value,
        occurred_at_ms: 1_000,
    }
}
