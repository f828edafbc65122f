//! The runtime: gatekeeper, ledger, leaderboard cache, change notifier,
//! anomaly monitor, and the service facade that wires them together.

pub mod anomaly;
pub mod clock;
pub mod core;
pub mod gatekeeper;
pub mod leaderboard;
pub mod ledger;
pub mod metrics;
pub mod notifier;
pub mod retry;

pub use anomaly::{AnomalyConfig, AnomalyFlag, AnomalyMonitor, AuditSink};
pub use clock::{SystemClock, TimeSource};
pub use self::core::ScoreService;
pub use gatekeeper::{ActionVerifier, Gatekeeper, VerifierRegistry};
pub use leaderboard::{CacheError, LeaderboardCache};
pub use ledger::{LedgerError, SqliteLedger};
pub use notifier::{ChangeNotifier, DropReason, NotifyError, UpdateSubscription};
pub use retry::RetryPolicy;
