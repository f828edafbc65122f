//! Core capability errors plus the protocol error surface.
//!
//! Core errors represent domain/refusal states, not library implementation
//! details. Protocol codes are the stable strings the transport collaborator
//! puts on the wire.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::Transience;

/// Invalid identifier.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("principal id `{raw}` is invalid: {reason}")]
    Principal { raw: String, reason: String },
    #[error("action id `{raw}` is invalid: {reason}")]
    Action { raw: String, reason: String },
    #[error("action type `{raw}` is invalid: {reason}")]
    ActionType { raw: String, reason: String },
}

/// Canonical error enum for core capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure domain/input failures.
        Transience::Permanent
    }
}

// =============================================================================
// Protocol error codes + payload
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Submission outcomes
    ValidationFailed,
    RateLimited,
    LockContended,
    DuplicateAction,

    // Operational
    Overloaded,
    SubscriberLagged,
    ServiceUnavailable,

    // Request framing
    InvalidRequest,

    // Generic internal
    Internal,

    Unknown(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::ValidationFailed => "validation_failed",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::LockContended => "lock_contended",
            ErrorCode::DuplicateAction => "duplicate_action",
            ErrorCode::Overloaded => "overloaded",
            ErrorCode::SubscriberLagged => "subscriber_lagged",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::Internal => "internal",
            ErrorCode::Unknown(code) => code.as_str(),
        }
    }

    pub fn parse(code: &str) -> Self {
        match code {
            "validation_failed" => ErrorCode::ValidationFailed,
            "rate_limited" => ErrorCode::RateLimited,
            "lock_contended" => ErrorCode::LockContended,
            "duplicate_action" => ErrorCode::DuplicateAction,
            "overloaded" => ErrorCode::Overloaded,
            "subscriber_lagged" => ErrorCode::SubscriberLagged,
            "service_unavailable" => ErrorCode::ServiceUnavailable,
            "invalid_request" => ErrorCode::InvalidRequest,
            "internal" => ErrorCode::Internal,
            other => ErrorCode::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ErrorCode::parse(s))
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(ErrorCode::parse(&raw))
    }
}

/// Structured failure returned to callers. Always carries a stable code,
/// never a raw internal fault.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            retry_after_ms: None,
            details: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }

    pub fn with_details<T: Serialize>(mut self, details: T) -> Self {
        self.details = serialize_optional(details);
        self
    }

    pub fn details_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.details {
            Some(value) => serde_json::from_value(value.clone()).map(Some),
            None => Ok(None),
        }
    }
}

fn serialize_optional<T: Serialize>(value: T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(Value::Null) => None,
        Ok(value) => Some(value),
        Err(_) => None,
    }
}

// =============================================================================
// Typed error details
// =============================================================================

pub mod details {
    use serde::{Deserialize, Serialize};

    use super::super::{ActionId, ActionType};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ValidationFailedDetails {
        pub action_type: ActionType,
        pub value: i64,
        pub min_value: i64,
        pub max_value: i64,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct RateLimitedDetails {
        pub action_type: ActionType,
        pub limit: u32,
        pub window_ms: u64,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LockContendedDetails {
        pub action_id: ActionId,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DuplicateActionDetails {
        pub action_id: ActionId,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OverloadedDetails {
        pub max_subscribers: u64,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SubscriberLaggedDetails {
        pub max_queue_updates: u64,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ServiceUnavailableDetails {
        pub attempts: u32,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InvalidRequestDetails {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub field: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub reason: Option<String>,
    }
}
