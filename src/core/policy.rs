//! Per-action-type policies.
//!
//! New action types are added by configuration, not by editing a central
//! dispatch: unknown types fall back to the default policy.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::identity::ActionType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionPolicy {
    pub min_value: i64,
    pub max_value: i64,
    /// Overrides `Limits::max_actions_per_window` for this type when set.
    pub max_per_window: Option<u32>,
}

impl ActionPolicy {
    pub fn permits(&self, value: i64) -> bool {
        value >= self.min_value && value <= self.max_value
    }
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            min_value: 1,
            max_value: 1_000,
            max_per_window: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ActionPolicies {
    pub default: ActionPolicy,
    pub actions: BTreeMap<ActionType, ActionPolicy>,
}

impl ActionPolicies {
    pub fn from_toml_str(input: &str) -> Result<Self, ActionPoliciesError> {
        let policies: ActionPolicies = toml::from_str(input)?;
        policies.validate()?;
        Ok(policies)
    }

    pub fn validate(&self) -> Result<(), ActionPoliciesError> {
        for (action_type, policy) in
            std::iter::once((None, &self.default)).chain(self.actions.iter().map(|(t, p)| (Some(t), p)))
        {
            if policy.min_value > policy.max_value {
                return Err(ActionPoliciesError::EmptyRange {
                    action_type: action_type.cloned(),
                    min_value: policy.min_value,
                    max_value: policy.max_value,
                });
            }
        }
        Ok(())
    }

    pub fn policy_for(&self, action_type: &ActionType) -> &ActionPolicy {
        self.actions.get(action_type).unwrap_or(&self.default)
    }
}

#[derive(Debug, Error)]
pub enum ActionPoliciesError {
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
    #[error("policy for {action_type:?} has empty range {min_value}..={max_value}")]
    EmptyRange {
        action_type: Option<ActionType>,
        min_value: i64,
        max_value: i64,
    },
}
