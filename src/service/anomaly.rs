//! Advisory anomaly monitor.
//!
//! Observes committed actions from a background thread fed by a bounded
//! channel. The write path hands observations over with `try_send` and moves
//! on: overflow drops the observation (counted), and a flag never rejects or
//! undoes an already-committed action.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::core::{ActionType, PrincipalId};
use crate::service::metrics;

/// Pattern thresholds. The shipped rule: more than `burst_count` actions of
/// at least `high_value_threshold` within the trailing `burst_window_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub high_value_threshold: i64,
    pub burst_count: u32,
    pub burst_window_ms: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            high_value_threshold: 500,
            burst_count: 5,
            burst_window_ms: 10_000,
        }
    }
}

/// Advisory flag emitted to the audit collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub principal_id: PrincipalId,
    pub rule: String,
    pub count: u32,
    pub window_ms: u64,
    pub flagged_at_ms: u64,
}

/// Fire-and-forget sink owned by the audit/alerting collaborator.
pub trait AuditSink: Send + Sync {
    fn record(&self, flag: AnomalyFlag);
}

/// Default sink: structured warning in the log stream.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, flag: AnomalyFlag) {
        tracing::warn!(
            principal = %flag.principal_id,
            rule = %flag.rule,
            count = flag.count,
            window_ms = flag.window_ms,
            "anomaly flagged"
        );
    }
}

struct Observation {
    principal_id: PrincipalId,
    action_type: ActionType,
    value: i64,
    timestamp_ms: u64,
}

enum MonitorCommand {
    Observe(Observation),
    Shutdown,
}

pub struct AnomalyMonitor {
    tx: Sender<MonitorCommand>,
    dropped: Arc<AtomicU64>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl AnomalyMonitor {
    pub fn start(
        config: AnomalyConfig,
        history_len: usize,
        queue_max_events: usize,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        let (tx, rx) = crossbeam::channel::bounded(queue_max_events.max(1));
        let worker = thread::Builder::new()
            .name("podium-anomaly".to_string())
            .spawn(move || run_monitor_loop(config, history_len.max(1), rx, sink))
            .expect("spawn anomaly monitor");
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Never blocks. A full queue drops the observation and counts it.
    pub fn observe(
        &self,
        principal_id: &PrincipalId,
        action_type: &ActionType,
        value: i64,
        timestamp_ms: u64,
    ) {
        let command = MonitorCommand::Observe(Observation {
            principal_id: principal_id.clone(),
            action_type: action_type.clone(),
            value,
            timestamp_ms,
        });
        match self.tx.try_send(command) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::anomaly_observation_dropped();
            }
        }
    }

    pub fn dropped_observations(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drain and stop the worker. Idempotent; drop calls it too.
    pub fn shutdown(&self) {
        let _ = self.tx.send(MonitorCommand::Shutdown);
        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for AnomalyMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct PrincipalHistory {
    recent: VecDeque<(i64, u64)>,
    last_flagged_at_ms: Option<u64>,
}

fn run_monitor_loop(
    config: AnomalyConfig,
    history_len: usize,
    rx: Receiver<MonitorCommand>,
    sink: Arc<dyn AuditSink>,
) {
    let mut histories: HashMap<PrincipalId, PrincipalHistory> = HashMap::new();
    while let Ok(command) = rx.recv() {
        match command {
            MonitorCommand::Observe(obs) => {
                let history =
                    histories
                        .entry(obs.principal_id.clone())
                        .or_insert(PrincipalHistory {
                            recent: VecDeque::with_capacity(history_len),
                            last_flagged_at_ms: None,
                        });
                if history.recent.len() >= history_len {
                    history.recent.pop_front();
                }
                history.recent.push_back((obs.value, obs.timestamp_ms));
                tracing::trace!(
                    principal = %obs.principal_id,
                    action_type = %obs.action_type,
                    value = obs.value,
                    "observation recorded"
                );

                if let Some(flag) = evaluate(&config, &obs, history) {
                    history.last_flagged_at_ms = Some(flag.flagged_at_ms);
                    metrics::anomaly_flagged();
                    sink.record(flag);
                }
            }
            MonitorCommand::Shutdown => break,
        }
    }
}

fn evaluate(
    config: &AnomalyConfig,
    obs: &Observation,
    history: &PrincipalHistory,
) -> Option<AnomalyFlag> {
    let window_start = obs.timestamp_ms.saturating_sub(config.burst_window_ms);
    let count = history
        .recent
        .iter()
        .filter(|(value, ts)| *value >= config.high_value_threshold && *ts >= window_start)
        .count() as u32;
    if count <= config.burst_count {
        return None;
    }
    // One flag per window for a sustained burst.
    if let Some(last) = history.last_flagged_at_ms
        && obs.timestamp_ms.saturating_sub(last) < config.burst_window_ms
    {
        return None;
    }
    Some(AnomalyFlag {
        principal_id: obs.principal_id.clone(),
        rule: "high_value_burst".to_string(),
        count,
        window_ms: config.burst_window_ms,
        flagged_at_ms: obs.timestamp_ms,
    })
}
