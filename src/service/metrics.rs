//! Minimal metrics emission helpers.
//!
//! These helpers emit structured metrics via tracing by default. A test sink
//! can be installed to capture emissions in unit tests.

use std::sync::{Arc, RwLock};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetricValue {
    Counter(u64),
    Histogram(u64),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricEvent {
    pub name: &'static str,
    pub value: MetricValue,
}

pub trait MetricSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

struct TracingSink;

impl MetricSink for TracingSink {
    fn record(&self, event: MetricEvent) {
        match event.value {
            MetricValue::Counter(value) => {
                tracing::info!(target: "metrics", metric = event.name, value);
            }
            MetricValue::Histogram(value) => {
                tracing::info!(target: "metrics", metric = event.name, value);
            }
        }
    }
}

static METRIC_SINK: std::sync::OnceLock<RwLock<Arc<dyn MetricSink>>> = std::sync::OnceLock::new();

fn sink() -> Arc<dyn MetricSink> {
    METRIC_SINK
        .get_or_init(|| RwLock::new(Arc::new(TracingSink)))
        .read()
        .expect("metrics sink lock poisoned")
        .clone()
}

pub fn set_sink(new_sink: Arc<dyn MetricSink>) {
    let lock = METRIC_SINK.get_or_init(|| RwLock::new(Arc::new(TracingSink)));
    *lock.write().expect("metrics sink lock poisoned") = new_sink;
}

fn emit(name: &'static str, value: MetricValue) {
    sink().record(MetricEvent { name, value });
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn submit_committed() {
    emit("submit_committed", MetricValue::Counter(1));
}

pub fn submit_duplicate() {
    emit("submit_duplicate", MetricValue::Counter(1));
}

pub fn submit_rejected(code: &'static str) {
    emit(code, MetricValue::Counter(1));
}

pub fn submit_unavailable() {
    emit("submit_unavailable", MetricValue::Counter(1));
}

pub fn leaderboard_recompute(duration: Duration) {
    emit("leaderboard_recompute", MetricValue::Counter(1));
    emit(
        "leaderboard_recompute_duration",
        MetricValue::Histogram(duration_ms(duration)),
    );
}

pub fn leaderboard_commit_skipped() {
    emit("leaderboard_commit_skipped", MetricValue::Counter(1));
}

pub fn broadcast_published(delivered: usize, dropped: usize) {
    emit("broadcast_published", MetricValue::Counter(1));
    emit(
        "broadcast_delivered",
        MetricValue::Counter(delivered as u64),
    );
    if dropped > 0 {
        emit("broadcast_subscribers_dropped", MetricValue::Counter(dropped as u64));
    }
}

pub fn broadcast_suppressed() {
    emit("broadcast_suppressed", MetricValue::Counter(1));
}

pub fn anomaly_flagged() {
    emit("anomaly_flagged", MetricValue::Counter(1));
}

pub fn anomaly_observation_dropped() {
    emit("anomaly_observation_dropped", MetricValue::Counter(1));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureSink {
        events: Mutex<Vec<MetricEvent>>,
    }

    impl MetricSink for CaptureSink {
        fn record(&self, event: MetricEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn installed_sink_captures_emissions() {
        let capture = Arc::new(CaptureSink::default());
        set_sink(capture.clone());

        submit_committed();
        broadcast_published(3, 1);

        let events = capture.events.lock().unwrap();
        assert!(events.iter().any(|e| e.name == "submit_committed"));
        assert!(
            events
                .iter()
                .any(|e| e.name == "broadcast_delivered"
                    && e.value == MetricValue::Counter(3))
        );
        assert!(events.iter().any(|e| e.name == "broadcast_subscribers_dropped"));
    }
}
