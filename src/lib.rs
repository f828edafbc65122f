#![forbid(unsafe_code)]

pub mod config;
pub mod core;
pub mod error;
pub mod service;
pub mod telemetry;
pub mod test_harness;

pub use error::{Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience
pub use crate::core::{
    ActionId, ActionPolicies, ActionPolicy, ActionRecord, ActionType, ApplyOutcome, ErrorCode,
    ErrorPayload, LeaderboardEntry, LeaderboardSnapshot, LeaderboardUpdate, Limits, PrincipalId,
    ScoreAggregate, SubmitReceipt, SubmitRequest,
};
pub use crate::service::{ScoreService, UpdateSubscription};
