//! Action records and score aggregates.

use serde::{Deserialize, Serialize};

use super::identity::{ActionId, ActionType, PrincipalId};

/// A single committed scoring event. Immutable once written; exactly one
/// record exists per logical action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: ActionId,
    pub principal_id: PrincipalId,
    pub action_type: ActionType,
    pub value: i64,
    /// Client-reported event time.
    pub occurred_at_ms: u64,
    /// Server commit time.
    pub applied_at_ms: u64,
}

/// Per-principal running total, owned and mutated only by the ledger under
/// transaction.
///
/// Invariant: `current_score` equals the sum of `value` over every committed
/// record for `principal_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreAggregate {
    pub principal_id: PrincipalId,
    pub current_score: i64,
    pub total_actions: u64,
    pub last_action_at_ms: u64,
}

/// Ledger apply outcome. Transient store failures are errors, not outcomes;
/// a duplicate is a normal, non-retryable result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Committed { new_score: i64 },
    Duplicate,
}

/// Score update request from the transport collaborator, after identity
/// verification. The principal arrives separately, already verified.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub action_id: ActionId,
    pub action_type: ActionType,
    #[serde(alias = "score_increment")]
    pub value: i64,
    #[serde(alias = "occurred_at")]
    pub occurred_at_ms: u64,
}

/// Successful submission receipt. Ranks are relative to the top-K snapshot
/// and absent when the principal is outside it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub new_score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_rank: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_rank: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_request_decodes_from_wire_shape() {
        let json = r#"{
            "action_id": "a-123",
            "action_type": "task_completion",
            "score_increment": 50,
            "occurred_at": 1700000000000
        }"#;
        let req: SubmitRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.action_id.as_str(), "a-123");
        assert_eq!(req.value, 50);
        assert_eq!(req.occurred_at_ms, 1_700_000_000_000);
    }

    #[test]
    fn receipt_omits_absent_ranks() {
        let receipt = SubmitReceipt {
            new_score: 10,
            new_rank: None,
            previous_rank: None,
        };
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(!json.contains("new_rank"));
        assert!(!json.contains("previous_rank"));
    }
}
