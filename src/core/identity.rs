//! Identity atoms.
//!
//! PrincipalId: the identity score actions are submitted for
//! ActionId: client-generated, globally unique per logical action
//! ActionType: scoring category, keys policies and rate windows

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{CoreError, InvalidId};

const MAX_ID_LEN: usize = 128;
const MAX_ACTION_TYPE_LEN: usize = 64;

/// Principal identifier - opaque, issued by the identity collaborator.
///
/// The core trusts it as already verified; validation is purely structural.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() {
            return Err(InvalidId::Principal {
                raw: s,
                reason: "empty".into(),
            }
            .into());
        }
        if s.len() > MAX_ID_LEN {
            return Err(InvalidId::Principal {
                raw: s,
                reason: format!("longer than {MAX_ID_LEN} bytes"),
            }
            .into());
        }
        if s.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(InvalidId::Principal {
                raw: s,
                reason: "contains whitespace or control characters".into(),
            }
            .into());
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrincipalId({:?})", self.0)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Action identifier - the replay-prevention key.
///
/// Client-generated and globally unique (not just per principal). The ledger
/// enforces uniqueness; this type only rejects ids that could never be valid.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.is_empty() {
            return Err(InvalidId::Action {
                raw: s.to_string(),
                reason: "empty".into(),
            }
            .into());
        }
        if s.len() > MAX_ID_LEN {
            return Err(InvalidId::Action {
                raw: s.to_string(),
                reason: format!("longer than {MAX_ID_LEN} bytes"),
            }
            .into());
        }
        if !s.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(InvalidId::Action {
                raw: s.to_string(),
                reason: "contains non-printable or non-ascii characters".into(),
            }
            .into());
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionId({:?})", self.0)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Action type - lowercase snake identifier, e.g. `task_completion`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionType(String);

impl ActionType {
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        if s.is_empty() {
            return Err(InvalidId::ActionType {
                raw: s.to_string(),
                reason: "empty".into(),
            }
            .into());
        }
        if s.len() > MAX_ACTION_TYPE_LEN {
            return Err(InvalidId::ActionType {
                raw: s.to_string(),
                reason: format!("longer than {MAX_ACTION_TYPE_LEN} bytes"),
            }
            .into());
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(InvalidId::ActionType {
                raw: s.to_string(),
                reason: "must be lowercase alphanumeric with underscores".into(),
            }
            .into());
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionType({:?})", self.0)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
